//! Error types for the parts of the server that fail as a whole rather than
//! per-connection. Per-connection syscall failures (`accept`, `recv`, `send`,
//! `read`, `open`) are handled inline as `io::Error` against the disposition
//! table in the reactor and connection modules; they never reach here.

use std::io;
use std::path::PathBuf;

/// Failure setting up the shared listening socket. Always fatal: raised
/// before any worker is forked, so the process exits non-zero without
/// spawning children.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("failed to create socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to set {option}: {source}")]
    SetSockOpt {
        option: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("invalid listen address {addr:?}: {source}")]
    Address {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to canonicalize document root {path:?}: {source}")]
    DocumentRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Internal failure during response planning. Never propagated past a
/// connection: the response builder always catches these and emits a 500
/// disposition with empty body headers, per the error handling design.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("uri contained invalid utf-8")]
    InvalidUtf8,

    #[error("failed to stat path: {0}")]
    Stat(#[source] io::Error),

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[source] io::Error),
}
