//! Logging initialization for scanlog-daemon.
//!
//! Every accepted connection runs inside a `connection` span carrying the
//! `peer` and `connection_id` fields. Both output formats attach those
//! fields to each event logged inside the span, so a stored file can be
//! traced back to the connection that produced it.

use std::fmt;

use anyhow::Result;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use scanlog_core::config::GeneralConfig;

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, with the current span as a `span` object.
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl LogFormat {
    /// Parse the `general.log_format` value.
    ///
    /// # Errors
    ///
    /// Returns an error for anything other than `"json"` or `"pretty"`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(anyhow::anyhow!(
                "unknown log format '{}', expected 'json' or 'pretty'",
                other
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Pretty => f.write_str("pretty"),
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called exactly once, before any tracing macros are used.
/// `RUST_LOG` takes precedence over `config.log_level`.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let format = LogFormat::parse(&config.log_format)?;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    Registry::default()
        .with(fmt_layer(format, std::io::stdout))
        .with(env_filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize {} tracing subscriber: {}", format, e))
}

/// Build the fmt layer for `format`.
///
/// JSON output carries the `connection` span as a `span` object on every
/// event. Pretty output prints the span fields under each event and logs
/// one line when a connection span closes, with its busy and idle time.
fn fmt_layer<W>(format: LogFormat, writer: W) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(false),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(true)
                .with_span_events(FmtSpan::CLOSE),
        ),
    }
}
