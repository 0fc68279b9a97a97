use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use huddle_gateway::GatewayConfig;
use tracing::warn;

const DEV_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read once at startup from `HUDDLE_*` variables
/// (a `.env` file is honoured).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub addr: SocketAddr,
    pub gateway: GatewayConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("HUDDLE_JWT_SECRET").unwrap_or_else(|| {
            warn!("HUDDLE_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let db_path = var("HUDDLE_DB_PATH").unwrap_or_else(|| "huddle.db".into());
        let host = var("HUDDLE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = parse_or(&var, "HUDDLE_PORT", 3000)?;

        let defaults = GatewayConfig::default();
        let gateway = GatewayConfig {
            handshake_timeout: Duration::from_secs(parse_or(
                &var,
                "HUDDLE_HANDSHAKE_TIMEOUT_SECS",
                defaults.handshake_timeout.as_secs(),
            )?),
            heartbeat_interval: Duration::from_secs(parse_or(
                &var,
                "HUDDLE_HEARTBEAT_SECS",
                defaults.heartbeat_interval.as_secs(),
            )?),
            ..defaults
        };

        // tokio::time::interval panics on a zero period
        if gateway.heartbeat_interval.is_zero() {
            bail!("HUDDLE_HEARTBEAT_SECS must be at least 1");
        }
        if gateway.handshake_timeout.is_zero() {
            bail!("HUDDLE_HANDSHAKE_TIMEOUT_SECS must be at least 1");
        }
        if gateway.max_missed_heartbeats == 0 {
            bail!("max_missed_heartbeats must be at least 1");
        }

        let addr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", host, port))?;

        Ok(Self {
            jwt_secret,
            db_path: PathBuf::from(db_path),
            addr,
            gateway,
        })
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw.parse().with_context(|| format!("{} is not valid: '{}'", key, raw)),
        None => Ok(default),
    }
}
