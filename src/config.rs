use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use serde::Deserialize;

/// Address the listener binds when only a port is configured.
pub const DEFAULT_LISTEN_IP: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub listen: SocketAddr,
    pub max_body_bytes: Option<usize>,
    pub logging: Option<LoggingConfig>,
}

impl Config {
    /// Builds a config that listens on all interfaces at `port` and writes
    /// records under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            storage: StorageConfig {
                log_dir: log_dir.into(),
            },
            listen: SocketAddr::new(DEFAULT_LISTEN_IP, port),
            max_body_bytes: None,
            logging: None,
        }
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: Option<usize>) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = Some(logging);
        self
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}
