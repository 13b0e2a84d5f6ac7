use std::net::SocketAddr;

use anyhow::Context;

const DEFAULT_DATABASE_URL: &str = "sqlite://safarichat.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_ORIGINS: &str = "http://localhost:3000,http://localhost:3001";
const DEFAULT_OUTBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub allowed_origins: Vec<String>,
    /// Events buffered per realtime connection before further ones are dropped.
    pub outbox_capacity: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = bind_addr
            .parse()
            .with_context(|| format!("BIND_ADDR is not a socket address: {bind_addr}"))?;

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ORIGINS.to_owned())
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_owned)
            .collect();

        let outbox_capacity = match lookup("OUTBOX_CAPACITY") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|cap| *cap > 0)
                .with_context(|| format!("OUTBOX_CAPACITY must be a positive integer, got {raw}"))?,
            None => DEFAULT_OUTBOX_CAPACITY,
        };

        Ok(Config {
            database_url,
            bind_addr,
            allowed_origins,
            outbox_capacity,
        })
    }
}
