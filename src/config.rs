//! Configuration (A3): CLI-derived session parameters.
//!
//! There is no on-disk config file for this core -- the relay is the
//! sole source of session parameters once connected -- but the struct
//! is shaped the way the corpus separates its own `Config::load()` from
//! its callers, so a layered file/env source could be added later
//! without disturbing call sites.

use std::path::PathBuf;

/// Resolved, read-only session configuration built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub simple: bool,
    pub resume: bool,
    pub log_enabled: bool,
    pub log_path: PathBuf,
}

impl Config {
    /// Build from the parsed CLI flags, applying the
    /// `TELEPRESENCE_LOG_FILE` environment override the same way the
    /// corpus lets `BOTSTER_LOG_FILE` override its own fixed log path.
    pub fn new(host: String, port: u16, simple: bool, resume: bool, log_enabled: bool) -> Self {
        let log_path = std::env::var("TELEPRESENCE_LOG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp/telepresence-client.log"));

        Self {
            host,
            port,
            simple,
            resume,
            log_enabled,
            log_path,
        }
    }
}
