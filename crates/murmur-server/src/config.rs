use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

/// Placeholder secrets that must not reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const DEV_MESSAGE_KEY: &str = "dev-insecure-message-key";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub message_key: String,
    pub redis_url: Option<String>,
    pub cache_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match get("MURMUR_PORT") {
            Some(raw) => raw.parse().with_context(|| format!("MURMUR_PORT={} is not a port", raw))?,
            None => 3000,
        };
        let cache_timeout_ms: u64 = match get("MURMUR_CACHE_TIMEOUT_MS") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("MURMUR_CACHE_TIMEOUT_MS={} is not a number", raw))?,
            None => 500,
        };

        Ok(Self {
            host: get("MURMUR_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("MURMUR_DB_PATH").unwrap_or_else(|| "murmur.db".into()).into(),
            jwt_secret: get("MURMUR_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            message_key: get("MURMUR_MSG_ENC_KEY").unwrap_or_else(|| DEV_MESSAGE_KEY.into()),
            redis_url: get("REDIS_URL")
                .or_else(|| get("UPSTASH_REDIS_URL"))
                .filter(|url| !url.trim().is_empty()),
            cache_timeout: Duration::from_millis(cache_timeout_ms),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().with_context(|| format!("invalid listen address {}", addr))
    }

    pub fn jwt_secret_is_placeholder(&self) -> bool {
        self.jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&self.jwt_secret.as_str())
    }

    pub fn message_key_is_default(&self) -> bool {
        self.message_key == DEV_MESSAGE_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.addr().unwrap().to_string(), "0.0.0.0:3000");
        assert_eq!(cfg.db_path, PathBuf::from("murmur.db"));
        assert_eq!(cfg.cache_timeout, Duration::from_millis(500));
        assert!(cfg.redis_url.is_none());
        assert!(cfg.jwt_secret_is_placeholder());
        assert!(cfg.message_key_is_default());
    }

    #[test]
    fn upstash_url_is_a_fallback() {
        let cfg = config(&[("UPSTASH_REDIS_URL", "rediss://up:6379")]).unwrap();
        assert_eq!(cfg.redis_url.as_deref(), Some("rediss://up:6379"));

        let cfg = config(&[
            ("REDIS_URL", "redis://local:6379"),
            ("UPSTASH_REDIS_URL", "rediss://up:6379"),
        ])
        .unwrap();
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://local:6379"));
    }

    #[test]
    fn bad_numbers_are_errors() {
        assert!(config(&[("MURMUR_PORT", "http")]).is_err());
        assert!(config(&[("MURMUR_CACHE_TIMEOUT_MS", "-1")]).is_err());
    }
}
