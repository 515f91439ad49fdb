use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8710";

/// Snapshot file name inside the data directory
pub const SNAPSHOT_FILE: &str = "encounters.json";

/// Request bodies above this size are rejected
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Service configuration, read from the environment
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Keep a JSON snapshot of the store in `data_dir`
    pub persist: bool,
    pub body_limit: usize,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let addr = lookup("ENCOUNTER_SERVICE_ADDR").unwrap_or_else(|| DEFAULT_ADDR.to_string());
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid ENCOUNTER_SERVICE_ADDR: {}", addr))?;

        let data_dir = match lookup("ENCOUNTER_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .context("Failed to get home directory")?
                .join(".consultscribe")
                .join("service"),
        };

        let persist = match lookup("ENCOUNTER_PERSIST").as_deref() {
            None => true,
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            Some(other) => anyhow::bail!("Invalid ENCOUNTER_PERSIST: {}", other),
        };

        Ok(Self {
            addr,
            data_dir,
            persist,
            body_limit: DEFAULT_BODY_LIMIT,
        })
    }

    /// Snapshot path when persistence is enabled
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.persist.then(|| self.data_dir.join(SNAPSHOT_FILE))
    }
}
