use std::net::SocketAddr;

use clap::{Parser, builder::NonEmptyStringValueParser};
use request_sink::{
    config::{Config, LogFormat, LoggingConfig},
    logging,
};

#[derive(Debug, Parser)]
#[command(
    name = "request-sink",
    version,
    about = "Store every inbound HTTP request as a JSON file"
)]
struct Cli {
    /// Directory that receives one JSON file per captured request.
    #[arg(long, env = "LOG_DIR", value_parser = NonEmptyStringValueParser::new())]
    log_dir: String,
    /// TCP port to listen on, bound on all interfaces.
    #[arg(long, env = "PORT")]
    port: u16,
    /// Reject request bodies larger than this many bytes. Unbounded when unset.
    #[arg(long, env = "MAX_BODY_BYTES")]
    max_body_bytes: Option<usize>,
    /// Log level (trace, debug, info, warn, error, off).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,
    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn into_config(self) -> Config {
        Config::new(self.log_dir, self.port)
            .with_max_body_bytes(self.max_body_bytes)
            .with_logging(LoggingConfig {
                level: self.log_level,
                format: self.log_format,
            })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config();
    logging::init(&config)?;

    let server = request_sink::server::serve(&config).await?;
    eprintln!("{}", startup_summary(&config, server.listen_addr));
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");
    server.shutdown().await;

    Ok(())
}

fn startup_summary(config: &Config, listen_addr: SocketAddr) -> String {
    let max_body_bytes = config
        .max_body_bytes
        .map(|limit| limit.to_string())
        .unwrap_or_else(|| "unbounded".to_owned());

    format!(
        "startup config: listen={}, log_dir={}, max_body_bytes={}",
        listen_addr,
        config.storage.log_dir.display(),
        max_body_bytes
    )
}
