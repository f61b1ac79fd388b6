use crate::build_info;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::field::Empty;
use tracing::Span;
use tracing_log::LogTracer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE_NAME: &str = "history_ingest";

/// Output format for runtime logs, selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    /// Anything other than `text` is JSON.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("text") {
            Self::Text
        } else {
            Self::Json
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

/// Identity of one command invocation, attached to every event it emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingContext {
    pub command: &'static str,
    pub environment: String,
    pub run_id: String,
    pub format: LogFormat,
}

impl LoggingContext {
    pub fn new(command: &'static str) -> Self {
        Self {
            command,
            environment: std::env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
            run_id: run_id(command),
            format: LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_default()),
        }
    }

    /// Root span for the command. Ledger fields start empty and are filled with
    /// [`Span::record`] once the command knows what it is looking at.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "command_run",
            service = SERVICE_NAME,
            command = self.command,
            environment = %self.environment,
            run_id = %self.run_id,
            build = build_info::VERSION_WITH_COMMIT,
            sequence = Empty,
            importer_version = Empty,
        )
    }
}

/// Installs the process-wide subscriber and returns the command's context.
///
/// `log` records from diesel and deadpool are forwarded into `tracing`. `RUST_LOG` overrides
/// `default_level`.
pub fn init_logging(command: &'static str, default_level: &str) -> LoggingContext {
    let context = LoggingContext::new(command);
    let _ = LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = match context.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .flatten_event(true),
            )
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    tracing::debug!(
        event = "logging_initialized",
        command = context.command,
        run_id = %context.run_id,
        build_commit = build_info::short_commit_hash(),
        log_format = context.format.as_str(),
        "initialized logging"
    );

    context
}

fn run_id(command: &str) -> String {
    let epoch_millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default();
    format!("{command}-{}-{epoch_millis}", std::process::id())
}

/// Strips credentials and query parameters from a database URL so it can be logged.
///
/// `postgres://user:secret@db:5432/core?sslmode=require` becomes `postgres://db:5432/core`.
pub fn redact_db_url(url: &str) -> String {
    let (scheme, rest) = match url.split_once("://") {
        Some((scheme, rest)) => (Some(scheme), rest),
        None => (None, url),
    };
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };
    let host = authority.rsplit('@').next().unwrap_or_default();

    match scheme {
        Some(scheme) => format!("{scheme}://{host}{path}"),
        None => format!("{host}{path}"),
    }
}

/// Messages of `err` and every error in its `source()` chain, outermost first.
pub fn error_chain(err: &(dyn StdError + 'static)) -> Vec<String> {
    std::iter::successors(Some(err), |&current| current.source())
        .map(ToString::to_string)
        .collect()
}

/// Multi-line report for stderr and the `error_report` log field: the error chain, then a
/// backtrace when `RUST_BACKTRACE` enables one.
pub fn format_error_report(err: &(dyn StdError + 'static)) -> String {
    let mut lines = error_chain(err).into_iter();
    let mut report = format!("error: {}", lines.next().unwrap_or_default());
    for (depth, cause) in lines.enumerate() {
        report.push_str(&format!("\ncaused by ({}): {cause}", depth + 1));
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        report.push_str(&format!("\nbacktrace:\n{backtrace}"));
    }
    report
}
