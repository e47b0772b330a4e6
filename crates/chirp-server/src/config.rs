use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result, bail};

use chirp_gateway::GatewayConfig;

const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Reads `CHIRP_*` variables from the environment (after `.env`).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = lookup("CHIRP_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("CHIRP_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let db_path: PathBuf = lookup("CHIRP_DB_PATH").unwrap_or_else(|| "chirp.db".into()).into();
        let host = lookup("CHIRP_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse(&lookup, "CHIRP_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            subscriber_buffer: parse(&lookup, "CHIRP_SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            fanout_workers: parse(&lookup, "CHIRP_FANOUT_WORKERS", defaults.fanout_workers)?,
            fanout_queue: parse(&lookup, "CHIRP_FANOUT_QUEUE", defaults.fanout_queue)?,
        };

        Ok(Self {
            jwt_secret,
            db_path,
            addr,
            gateway,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        None => Ok(default),
    }
}
