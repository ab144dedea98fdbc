//! Command-line surface, mirroring the flags of the original watcher script
//! one for one.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "httpd", about = "A small static-file HTTP/1.1 server")]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value = "localhost")]
    pub address: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    pub port: u16,

    /// Log file; defaults to stderr when omitted.
    #[arg(short, long)]
    pub log: Option<PathBuf>,

    /// Number of worker processes to run.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Document root to serve.
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,
}

impl Args {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}
