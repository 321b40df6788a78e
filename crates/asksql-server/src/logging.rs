//! Structured logging for the asksql server
//!
//! - Human-readable console logging for development
//! - JSON logging for production
//! - Daily rolling log files
//! - One `ask` span per question carrying its request id

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "asksql-server.log";

/// Third-party crates that are noisy below `warn`
const QUIET_TARGETS: [&str; 6] = [
    "hyper=warn",
    "hyper_util=warn",
    "reqwest=warn",
    "tower_http=warn",
    "h2=warn",
    "tokio=warn",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
    Compact,
}

impl LogFormat {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("json") => LogFormat::Json,
            Some("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl LogOutput {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Stdout,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("LOG_OUTPUT").ok().as_deref())
    }
}

/// Build the level filter from `RUST_LOG` (default `info`), keeping
/// third-party crates quiet unless `RUST_LOG` names them.
fn env_filter() -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let requested = std::env::var("RUST_LOG").unwrap_or_default();

    for directive in QUIET_TARGETS {
        let target = directive.split('=').next().unwrap_or(directive);
        if requested.contains(target) {
            continue;
        }
        if let Ok(parsed) = directive.parse() {
            filter = filter.add_directive(parsed);
        }
    }
    filter
}

fn stdout_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

/// Initialize logging from the environment
///
/// Environment variables:
/// - `RUST_LOG`: Log level (e.g., "debug", "info", "asksql_engine=debug")
/// - `LOG_FORMAT`: Output format ("pretty", "json", "compact")
/// - `LOG_OUTPUT`: Where to write logs ("stdout", "file", "both")
/// - `LOG_DIR`: Directory for log files (default: "./logs")
///
/// ```bash
/// # Production: JSON to file with info level
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/asksql asksql serve
///
/// # Debugging the pipeline
/// RUST_LOG=asksql_engine=debug,asksql_duck=debug LOG_FORMAT=compact asksql ask "how many orders?"
/// ```
pub fn init() {
    let format = LogFormat::from_env();
    let output = LogOutput::from_env();
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "./logs".to_string());

    let file_layer = match output {
        LogOutput::File | LogOutput::Both => {
            std::fs::create_dir_all(&log_dir).ok();
            let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
            Some(
                fmt::layer()
                    .with_writer(file_appender)
                    .with_ansi(false)
                    .boxed(),
            )
        }
        LogOutput::Stdout => None,
    };

    let console_layer = match output {
        LogOutput::Stdout | LogOutput::Both => Some(stdout_layer(format)),
        LogOutput::File => None,
    };

    tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(format = ?format, output = ?output, "Logging system initialized");
    if output != LogOutput::Stdout {
        tracing::debug!(directory = %log_dir, "Writing log files");
    }
}

/// Helper macro for logging with structured fields
///
/// ```ignore
/// log_event!(
///     level: tracing::Level::INFO,
///     event: "schema_refreshed",
///     tables: 3
/// );
/// ```
#[macro_export]
macro_rules! log_event {
    (level: $level:expr, event: $event:expr $(, $key:ident: $value:expr)* $(,)?) => {
        tracing::event!(
            $level,
            event = $event
            $(, $key = ?$value)*
        );
    };
}
