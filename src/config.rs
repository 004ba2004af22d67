// ⚙️ Runtime configuration
//
// CARS_DATABASE_PATH       SQLite file            (default: cars.db)
// CARS_BIND_ADDR           HTTP listen address    (default: 0.0.0.0:3000)
// CARS_TICK_INTERVAL_SECS  reconciliation period  (default: 3600)

use anyhow::{bail, Context as AnyhowContext, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::scheduler::DEFAULT_TICK_INTERVAL;

pub const DATABASE_PATH_VAR: &str = "CARS_DATABASE_PATH";
pub const BIND_ADDR_VAR: &str = "CARS_BIND_ADDR";
pub const TICK_INTERVAL_VAR: &str = "CARS_TICK_INTERVAL_SECS";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub database_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub tick_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("cars.db"),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup(DATABASE_PATH_VAR) {
            config.database_path = PathBuf::from(path);
        }

        if let Some(addr) = lookup(BIND_ADDR_VAR) {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("{} is not a socket address: {:?}", BIND_ADDR_VAR, addr))?;
        }

        if let Some(secs) = lookup(TICK_INTERVAL_VAR) {
            let secs: u64 = secs
                .trim()
                .parse()
                .with_context(|| format!("{} is not a number of seconds: {:?}", TICK_INTERVAL_VAR, secs))?;
            if secs == 0 {
                bail!("{} must be greater than zero", TICK_INTERVAL_VAR);
            }
            config.tick_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
