use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,

    /// Root of the checked-out desired-state repository.
    pub source_root: PathBuf,

    /// Base URL of the metrics provider, if analysis is in use.
    pub metrics_url: Option<String>,

    /// Per-application refresh tick.
    pub refresh_interval: Duration,

    /// Timeout applied to every external call (source read, cluster
    /// call, metrics query).
    pub external_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("DRIFT_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = std::env::var("DRIFT_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("DRIFT_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let source_root = std::env::var("DRIFT_SOURCE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./desired-state"));

        let metrics_url = std::env::var("DRIFT_METRICS_URL").ok();

        let refresh_interval = Duration::from_secs(
            std::env::var("DRIFT_REFRESH_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        );

        let external_timeout = Duration::from_secs(
            std::env::var("DRIFT_EXTERNAL_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        );

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            source_root,
            metrics_url,
            refresh_interval,
            external_timeout,
        })
    }
}
