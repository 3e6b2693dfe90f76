use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub identity_url: String,
    pub identity_timeout: Duration,
    pub selection_seed: Option<u64>,
    pub admins: HashSet<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("LUNCHBOX_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!(
                "LUNCHBOX_JWT_SECRET is unset or still a placeholder. \
                 It must match the secret the identity service signs tokens with."
            );
        }

        let port = parse_or(&get, "LUNCHBOX_PORT", 3000)?;
        let timeout_ms = parse_or(&get, "LUNCHBOX_IDENTITY_TIMEOUT_MS", 2000)?;
        let selection_seed = get("LUNCHBOX_SELECTION_SEED")
            .map(|v| {
                v.parse::<u64>()
                    .with_context(|| format!("LUNCHBOX_SELECTION_SEED must be a u64, got {:?}", v))
            })
            .transpose()?;

        let admins = get("LUNCHBOX_ADMIN_USERS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();

        Ok(Self {
            host: get("LUNCHBOX_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("LUNCHBOX_DB_PATH")
                .unwrap_or_else(|| "lunchbox.db".into())
                .into(),
            jwt_secret,
            identity_url: get("LUNCHBOX_IDENTITY_URL").unwrap_or_else(|| "http://localhost:8081".into()),
            identity_timeout: Duration::from_millis(timeout_ms),
            selection_seed,
            admins,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(v) => v
            .parse()
            .with_context(|| format!("{} could not be parsed from {:?}", key, v)),
        None => Ok(default),
    }
}
