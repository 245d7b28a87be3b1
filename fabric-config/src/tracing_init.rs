//! Structured logging bootstrap, gated behind the `tracing-init` feature so
//! the base crate stays lean for callers that only want layered config
//! loading: an `EnvFilter`-driven stderr layer (human text by default, JSON
//! when asked for) plus an optional daily rolling file sink under the XDG
//! data dir.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Holds the rolling-file-appender's background flush thread alive; drop it
/// only at process exit.
pub struct TracingGuard(#[allow(dead_code)] tracing_appender::non_blocking::WorkerGuard);

/// Initializes the global `tracing` subscriber for `app_name` (used only to
/// pick the log directory). `json` selects the JSON event formatter over
/// human-readable text, mirroring callers keying off `FABRIC_LOG_FORMAT`.
/// Returns `None` when no writable log directory was found — stderr logging
/// still works, there's just no file sink.
pub fn init(app_name: &str, json: bool) -> Option<TracingGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer: Box<dyn Layer<Registry> + Send + Sync> = if json {
        tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        tracing_subscriber::fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file_layer, guard) = match log_dir(app_name) {
        Some(dir) if std::fs::create_dir_all(&dir).is_ok() => {
            let appender = tracing_appender::rolling::daily(&dir, format!("{app_name}.log"));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer: Box<dyn Layer<Registry> + Send + Sync> =
                tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };

    Registry::default().with(filter).with(stderr_layer).with(file_layer).init();
    guard.map(TracingGuard)
}

fn log_dir(app_name: &str) -> Option<std::path::PathBuf> {
    dirs::data_dir().map(|d| d.join(app_name).join("logs"))
}
