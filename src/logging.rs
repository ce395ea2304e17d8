use anyhow::anyhow;
use tracing_subscriber::{
    filter::LevelFilter,
    fmt::{
        SubscriberBuilder,
        format::{Format, Json, JsonFields},
    },
};

use crate::config::{Config, LogFormat, LoggingConfig};

const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the process-wide subscriber. Must be called at most once.
pub fn init(config: &Config) -> anyhow::Result<()> {
    let logging = config.logging.clone().unwrap_or_default();
    let level = logging.level_filter()?;

    match logging.output_format() {
        LogFormat::Json => json_subscriber(level).try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(true)
            .pretty()
            .try_init(),
    }
    .map_err(|err| anyhow!("initialize logging subscriber: {err}"))
}

/// One JSON object per event. Fields of the innermost span (the
/// `sink.request` span carries `method` and `url`) are flattened under
/// `span`; the full span stack is omitted.
fn json_subscriber(
    level: LevelFilter,
) -> SubscriberBuilder<JsonFields, Format<Json>, LevelFilter> {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .json()
        .with_current_span(true)
        .with_span_list(false)
}

impl LoggingConfig {
    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        let raw_level = self.level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL);
        raw_level
            .trim()
            .to_ascii_lowercase()
            .parse::<LevelFilter>()
            .map_err(|_| {
                anyhow!(
                    "invalid log level `{raw_level}`; expected one of trace, debug, info, warn, error, off"
                )
            })
    }

    pub fn output_format(&self) -> LogFormat {
        self.format.unwrap_or(LogFormat::Json)
    }
}
