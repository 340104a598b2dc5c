//! Optional structured log sink.
//!
//! When `create` receives logging options, a non-blocking file appender is
//! installed as the global tracing subscriber. Without them every span and
//! event is a no-op. The returned guard must be kept alive for the lifetime
//! of the handle or buffered lines are lost.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

pub fn init_tracing(log_file_path: &Path, log_level: Option<&str>) -> Result<WorkerGuard> {
    let directory = log_file_path.parent().unwrap_or(Path::new("."));
    let file_name = log_file_path
        .file_name()
        .ok_or_else(|| Error::InvalidArgument("log_file_path has no file name".into()))?;

    std::fs::create_dir_all(directory)?;

    let appender = tracing_appender::rolling::never(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_new(log_level.unwrap_or("info"))
        .map_err(|e| Error::InvalidArgument(format!("invalid log level: {e}")))?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .finish();

    // A second handle in the same process keeps the first subscriber; that
    // is fine, logs just go to the first sink.
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }

    install_panic_hook();
    Ok(guard)
}

/// Route panics (worker threads included) into the log before unwinding.
pub fn install_panic_hook() {
    static INSTALLED: std::sync::Once = std::sync::Once::new();
    INSTALLED.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(panic = %info, "Thread panicked");
            previous(info);
        }));
    });
}
