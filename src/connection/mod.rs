//! The per-connection state machine: an explicit two-variant `Phase` rather
//! than swapping handler objects in place, so there is exactly one actor per
//! fd for the lifetime of the connection and no "which object currently
//! owns this fd" subtlety to track.

pub mod read;
pub mod write;

use std::net::Shutdown;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use crate::afr::AsyncFileReader;
use crate::reactor::poller::{Event, Interest};
use crate::reactor::sys::{sys_close, sys_shutdown};

pub enum Phase {
    Read {
        buffer: Vec<u8>,
        scan_cursor: usize,
    },
    Write {
        out: Vec<u8>,
        file_attached: bool,
    },
}

pub enum Outcome {
    Continue,
    Close,
}

/// Owns exactly one client socket, from `accept` to close.
pub struct Connection {
    fd: RawFd,
    created_at: Instant,
    phase: Phase,
    closed: bool,
}

impl Connection {
    pub fn new(fd: RawFd, created_at: Instant) -> Self {
        Self {
            fd,
            created_at,
            phase: Phase::Read {
                buffer: Vec::new(),
                scan_cursor: 0,
            },
            closed: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn interest(&self) -> Interest {
        match self.phase {
            Phase::Read { .. } => Interest::READ,
            Phase::Write { .. } => Interest::WRITE,
        }
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Dispatches one readiness event. The reactor is responsible for
    /// re-registering this connection's fd with the interest that
    /// [`Connection::interest`] now reports when `Outcome::Continue` follows
    /// a phase transition.
    pub fn act(&mut self, event: Event, root: &std::path::Path, afr: &AsyncFileReader) -> Outcome {
        if event.error_or_hangup {
            return Outcome::Close;
        }

        match self.phase {
            Phase::Read { .. } => {
                if !event.readable {
                    return Outcome::Continue;
                }
                match read::on_readable(self, root, afr) {
                    read::ReadOutcome::Continue | read::ReadOutcome::Transitioned => {
                        Outcome::Continue
                    }
                    read::ReadOutcome::Close => Outcome::Close,
                }
            }
            Phase::Write { .. } => {
                if !event.writable {
                    return Outcome::Continue;
                }
                match write::on_writable(self, afr) {
                    write::WriteOutcome::Continue => Outcome::Continue,
                    write::WriteOutcome::Done => Outcome::Close,
                }
            }
        }
    }

    /// Tears the connection down. Idempotent: the teacher's own close paths
    /// sometimes ran twice, so this guards against a second shutdown on an
    /// already-closed fd.
    pub fn close(&mut self, afr: &AsyncFileReader) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Phase::Write {
            file_attached: true,
            ..
        } = self.phase
        {
            afr.unregister(self.fd);
        }

        sys_shutdown(self.fd, Shutdown::Both);
        sys_close(self.fd);
    }
}
