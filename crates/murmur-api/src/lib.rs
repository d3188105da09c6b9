//! HTTP surface of the polling protocol.

pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod presence;
pub mod rooms;
pub mod routes;
pub mod typing;
pub mod unread;
pub mod users;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
pub use routes::router;
