use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use plsync_core::{io, paths};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log to stderr and append to `<log_dir>/plsync.log`.
///
/// `RUST_LOG` directives are layered over `default_level`. A log file that
/// cannot be opened only costs the file layer.
pub fn init(log_dir: &Path, default_level: tracing::Level) {
    let filter = EnvFilter::from_default_env().add_directive(default_level.into());
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let log_path = paths::log_file_path(log_dir);
    let file = io::ensure_dir(log_dir).ok().and_then(|_| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .ok()
    });

    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .with(file_layer)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            tracing::warn!(path = %log_path.display(), "cannot open log file; logging to stderr only");
        }
    }
}
