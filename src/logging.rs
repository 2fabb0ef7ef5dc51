//! Structured logging bootstrap.
//!
//! Replaces the source project's standalone colorized shell logger
//! (spec section 9, REDESIGN FLAGS) with a `tracing` subscriber: ANSI
//! colors render only when stdout is a TTY, plain structured fields
//! otherwise (journald-friendly), with an optional full-JSON mode for
//! log aggregators.
use std::io::IsTerminal;
use std::path::Path;

use tracing_subscriber::EnvFilter;

/// Guard returned by [`init`]; dropping it flushes the non-blocking file
/// writer. Keep it alive for the lifetime of the process.
pub struct LoggingGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global tracing subscriber.
///
/// `KGSM_LOG` (falling back to `info`) selects the level filter.
/// `KGSM_LOG_FORMAT=json` forces JSON output even on a TTY.
/// When `file_log_dir` is `Some`, a second non-blocking writer appends
/// to `<dir>/kgsm.log`.
pub fn init(file_log_dir: Option<&Path>) -> LoggingGuard {
    let filter = EnvFilter::try_from_env("KGSM_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let force_json = std::env::var("KGSM_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let ansi = std::io::stdout().is_terminal() && !force_json;

    let registry = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false);

    let file_guard = if let Some(dir) = file_log_dir {
        let appender = tracing_appender::rolling::never(dir, "kgsm.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        registry.json().with_writer(writer).init();
        Some(guard)
    } else if force_json {
        registry.json().init();
        None
    } else {
        registry.init();
        None
    };

    LoggingGuard {
        _file_guard: file_guard,
    }
}
