use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, bail};
use tracing::{info, warn};

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const DEV_SECRET: &str = "dev-secret-change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let environment: Environment = try_load(&lookup, "BAZAAR_ENV", "development")?;

        let jwt_secret = match lookup("BAZAAR_JWT_SECRET").filter(|s| !s.trim().is_empty()) {
            Some(secret) => secret,
            None if environment == Environment::Development => {
                warn!("BAZAAR_JWT_SECRET not set, using the development secret");
                DEV_SECRET.to_string()
            }
            None => bail!("BAZAAR_JWT_SECRET must be set in production"),
        };
        if environment == Environment::Production
            && PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str())
        {
            bail!("BAZAAR_JWT_SECRET is still a placeholder; set a random secret");
        }

        let token_ttl_hours: i64 = try_load(&lookup, "BAZAAR_TOKEN_TTL_HOURS", "24")?;
        if token_ttl_hours <= 0 {
            bail!("BAZAAR_TOKEN_TTL_HOURS must be positive");
        }

        Ok(Self {
            environment,
            jwt_secret,
            token_ttl_hours,
            db_path: try_load(&lookup, "BAZAAR_DB_PATH", "bazaar.db")?,
            upload_dir: try_load(&lookup, "BAZAAR_UPLOAD_DIR", "./uploads")?,
            host: try_load(&lookup, "BAZAAR_HOST", "0.0.0.0")?,
            port: try_load(&lookup, "BAZAAR_PORT", "5000")?,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours)
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn try_load<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value '{raw}': {e}"))
}
