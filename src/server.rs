//! Listening-socket setup and the per-worker `Server`: the thin seam
//! between the supervisor (which owns the listen fd across forks) and the
//! reactor (which owns everything else).

use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BindError;
use crate::reactor::{sys, Reactor};

/// Creates, configures, binds, and listens on `address:port`. Called once,
/// in the parent, before any `fork(2)`, so every worker shares the same
/// underlying socket.
pub fn bind_listener(address: &str, port: u16) -> Result<RawFd, BindError> {
    let (domain, storage, len) = sys::sys_parse_sockaddr(address, port).map_err(|source| {
        BindError::Address {
            addr: format!("{address}:{port}"),
            source,
        }
    })?;

    let fd = sys::sys_socket(domain).map_err(BindError::Socket)?;

    sys::sys_set_reuseaddr(fd).map_err(|source| BindError::SetSockOpt {
        option: "SO_REUSEADDR",
        source,
    })?;
    sys::sys_set_reuseport(fd).map_err(|source| BindError::SetSockOpt {
        option: "SO_REUSEPORT",
        source,
    })?;

    sys::sys_bind(fd, &storage, len).map_err(|source| BindError::Bind {
        addr: format!("{address}:{port}"),
        source,
    })?;
    sys::sys_listen(fd, 128).map_err(BindError::Listen)?;

    Ok(fd)
}

/// One worker's reactor, running over a listen fd inherited from the
/// parent.
pub struct Server {
    reactor: Reactor,
}

impl Server {
    pub fn from_listener(listen_fd: RawFd, root: PathBuf, client_timeout: Duration) -> io::Result<Self> {
        Ok(Self {
            reactor: Reactor::new(listen_fd, root, client_timeout)?,
        })
    }

    pub fn run(&mut self) {
        self.reactor.run();
    }

    pub fn shutdown(&mut self) {
        self.reactor.shutdown();
    }
}
