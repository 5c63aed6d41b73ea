use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "peercall_core=debug,peercall_media=info,peercall_relay=info,info";

/// Installs the process-wide subscriber: stderr plus an append-only
/// `<data_dir>/peercall.log`. `RUST_LOG` overrides the default filter.
///
/// Called at the start of `CallApp::new()`. Only the first call in a process
/// installs anything.
pub fn init_logging(data_dir: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    let log_path = std::path::Path::new(data_dir).join("peercall.log");
    let _ = std::fs::create_dir_all(data_dir);
    let file_layer = if let Ok(file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true),
        )
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();
}
