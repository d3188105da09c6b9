use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{messages, presence, rooms, typing, unread, users};

/// Every HTTP route. Everything except auth, health and the online list
/// needs a bearer token.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/users/online", get(presence::list_online))
        .route("/health", get(health));

    let protected_routes = Router::new()
        .route("/messages", get(messages::get_messages).post(messages::send_message))
        .route("/messages/read", post(messages::mark_read))
        .route("/unread-messages", get(unread::get_unread).post(unread::mark_peer_read))
        .route("/typing", get(typing::get_typing).post(typing::set_typing))
        .route("/auth/verify", get(auth::verify))
        .route("/users/online", post(presence::heartbeat))
        .route("/users/by-username", get(users::by_username))
        .route("/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/rooms/by-name", get(rooms::room_by_name))
        .route("/rooms/{room_id}/join", post(rooms::join_room))
        .route("/direct-messages", get(rooms::direct_messages))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock};

    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use murmur_cache::CacheLayer;
    use murmur_crypto::MessageCodec;
    use murmur_db::Database;
    use murmur_engine::Engine;

    use super::*;
    use crate::auth::AppStateInner;

    fn codec() -> Arc<MessageCodec> {
        static CODEC: OnceLock<Arc<MessageCodec>> = OnceLock::new();
        CODEC.get_or_init(|| Arc::new(MessageCodec::new("api-test-secret"))).clone()
    }

    fn app() -> Router {
        let cache = CacheLayer::local();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = Arc::new(AppStateInner {
            engine: Engine::new(db, codec(), cache.unread.clone()),
            typing: cache.typing,
            jwt_secret: "test-jwt-secret".into(),
        });
        router(state)
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Option<String>, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let cache_control = res
            .headers()
            .get(header::CACHE_CONTROL)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, cache_control, json)
    }

    /// Register a user and return `(user_id, token)`.
    async fn register(app: &Router, username: &str) -> (String, String) {
        let (status, _, body) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": username, "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["userId"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = app();
        let res = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn protected_routes_need_a_token() {
        let app = app();
        let (status, _, body) = call(&app, "GET", "/messages?roomId=x", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _, _) = call(&app, "GET", "/unread-messages", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_and_login() {
        let app = app();
        let (user_id, _) = register(&app, "alice").await;

        let (status, _, _) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "another one" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userId"], user_id.as_str());

        let (status, _, _) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn direct_message_round_trip() {
        let app = app();
        let (alice_id, alice) = register(&app, "alice").await;
        let (bob_id, bob) = register(&app, "bob").await;

        let (status, _, body) =
            call(&app, "GET", &format!("/direct-messages?userId={}", bob_id), Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        let room_id = body["room"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["room"]["isDirect"], true);
        assert_eq!(body["messages"], json!([]));

        let (status, _, body) = call(
            &app,
            "POST",
            "/messages",
            Some(&alice),
            Some(json!({ "content": "hi bob", "roomId": room_id })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"]["type"], "TEXT");
        assert_eq!(body["message"]["content"], "hi bob");

        let (_, no_store, body) = call(&app, "GET", "/unread-messages", Some(&bob), None).await;
        assert_eq!(no_store.as_deref(), Some("no-store"));
        assert_eq!(body["unreadCounts"][&alice_id], 1);

        let (status, no_store, body) =
            call(&app, "GET", &format!("/messages?roomId={}", room_id), Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(no_store.as_deref(), Some("no-store"));
        assert_eq!(body["messages"][0]["content"], "hi bob");
        assert_eq!(body["messages"][0]["senderUsername"], "alice");

        let (_, _, body) = call(&app, "GET", "/unread-messages", Some(&bob), None).await;
        assert_eq!(body["unreadCounts"][&alice_id], 0);
    }

    #[tokio::test]
    async fn bad_requests_and_hidden_rooms() {
        let app = app();
        let (_, alice) = register(&app, "alice").await;
        let (_, bob) = register(&app, "bob").await;

        let (status, _, body) = call(&app, "GET", "/messages", Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "roomId is required");

        let (status, _, _) = call(&app, "POST", "/messages", Some(&alice), Some(json!({ "roomId": "r" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, body) = call(
            &app,
            "POST",
            "/rooms",
            Some(&alice),
            Some(json!({ "name": "secret", "isPrivate": true })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let secret_id = body["room"]["id"].as_str().unwrap().to_string();

        let (status, _, _) =
            call(&app, "POST", &format!("/rooms/{}/join", secret_id), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) =
            call(&app, "GET", &format!("/messages?roomId={}", secret_id), Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn concurrent_duplicate_registrations_conflict() {
        let app = app();
        let attempts = (0..4).map(|_| {
            let app = app.clone();
            tokio::spawn(async move {
                call(
                    &app,
                    "POST",
                    "/auth/register",
                    None,
                    Some(json!({ "username": "alice", "password": "correct horse" })),
                )
                .await
                .0
            })
        });
        let mut statuses = Vec::new();
        for attempt in attempts.collect::<Vec<_>>() {
            statuses.push(attempt.await.unwrap());
        }
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
        assert!(statuses.iter().all(|s| *s == StatusCode::CREATED || *s == StatusCode::CONFLICT));
    }

    #[tokio::test]
    async fn lookups_by_username_and_room_name() {
        let app = app();
        let (alice_id, alice) = register(&app, "alice").await;
        let (_, bob) = register(&app, "bob").await;

        let (status, _, body) = call(&app, "GET", "/users/by-username?username=alice", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], alice_id.as_str());
        assert_eq!(body["user"]["username"], "alice");
        assert!(body["user"].get("password").is_none());

        let (status, _, body) = call(&app, "GET", "/users/by-username", Some(&bob), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "username is required");

        let (status, _, _) = call(&app, "GET", "/users/by-username?username=mallory", Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = call(&app, "GET", "/users/by-username?username=alice", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        for (name, private) in [("general", false), ("secret", true)] {
            let (status, _, _) = call(
                &app,
                "POST",
                "/rooms",
                Some(&alice),
                Some(json!({ "name": name, "isPrivate": private })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, _, body) = call(&app, "GET", "/rooms/by-name?name=general", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["room"]["name"], "general");

        let (status, _, body) = call(&app, "GET", "/rooms/by-name", Some(&bob), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name is required");

        let (status, _, _) = call(&app, "GET", "/rooms/by-name?name=secret", Some(&bob), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _, _) = call(&app, "GET", "/rooms/by-name?name=secret", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn verify_returns_the_token_owner() {
        let app = app();
        let (alice_id, alice) = register(&app, "alice").await;

        let (status, _, body) = call(&app, "GET", "/auth/verify", Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], alice_id.as_str());
        assert_eq!(body["user"]["username"], "alice");

        let (status, _, _) = call(&app, "GET", "/auth/verify", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // correctly signed, but the account does not exist
        let orphan = auth::create_token("test-jwt-secret", "deleted-user", "ghost").unwrap();
        let (status, _, body) = call(&app, "GET", "/auth/verify", Some(&orphan), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");
    }

    #[tokio::test]
    async fn typing_and_presence() {
        let app = app();
        let (alice_id, alice) = register(&app, "alice").await;
        let (_, bob) = register(&app, "bob").await;

        let (status, _, body) = call(
            &app,
            "POST",
            "/typing",
            Some(&alice),
            Some(json!({ "roomId": "r1", "isTyping": true, "username": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        let (_, _, body) = call(&app, "GET", "/typing?roomId=r1", Some(&bob), None).await;
        assert_eq!(body["users"], json!(["alice"]));
        let (_, _, body) = call(&app, "GET", "/typing?roomId=r1", Some(&alice), None).await;
        assert_eq!(body["users"], json!([]));

        let (status, _, _) = call(
            &app,
            "POST",
            "/users/online",
            Some(&alice),
            Some(json!({ "isOnline": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = call(&app, "GET", "/users/online", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["users"].as_array().unwrap().len(), 1);
        assert_eq!(body["users"][0]["id"], alice_id.as_str());
        assert_eq!(body["users"][0]["isOnline"], true);
    }
}
