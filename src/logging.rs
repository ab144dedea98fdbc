//! Logging bootstrap. Called once, in the watcher process, before any worker
//! is forked: the installed `tracing` dispatcher is plain process memory, so
//! every forked child inherits it and never calls [`init`] itself.

use std::path::Path;

use tracing_subscriber::EnvFilter;

pub fn init(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file {}: {e}", path.display()));
            builder.with_writer(std::sync::Mutex::new(file)).init();
        }
        None => {
            builder.with_writer(std::io::stderr).init();
        }
    }
}
