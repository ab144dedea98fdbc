//! The reactor: a single-threaded readiness loop over the listening socket
//! and every client connection. Grounded on the same shape as a synchronous,
//! dispatch-by-event-not-by-future reactor — registration is keyed directly
//! by fd (every fd maps to at most one actor, so the fd itself doubles as
//! the epoll token) rather than through an indirection slab.

pub mod poller;
pub mod sys;

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::afr::AsyncFileReader;
use crate::connection::{Connection, Outcome};
use poller::{Event, Poller};
use sys::{sys_accept, sys_close};

const POLL_TIMEOUT: Duration = Duration::from_millis(5);
const ACCEPT_MAX_TRIES: u32 = 4;

pub struct Reactor {
    poller: Poller,
    listen_fd: RawFd,
    connections: HashMap<RawFd, Connection>,
    root: PathBuf,
    afr: std::sync::Arc<AsyncFileReader>,
    events: Vec<Event>,
    client_timeout: Duration,
    running: bool,
}

impl Reactor {
    pub fn new(listen_fd: RawFd, root: PathBuf, client_timeout: Duration) -> io::Result<Self> {
        let mut poller = Poller::new()?;
        poller.register(listen_fd, listen_fd as usize, poller::Interest::READ)?;

        Ok(Self {
            poller,
            listen_fd,
            connections: HashMap::new(),
            root,
            afr: AsyncFileReader::start(),
            events: Vec::with_capacity(256),
            client_timeout,
            running: true,
        })
    }

    /// Runs until [`Reactor::shutdown`] is called (normally from a signal
    /// handler observed by the caller between iterations).
    pub fn run(&mut self) {
        while self.running && !crate::shutdown::requested() {
            if let Err(e) = self.poller.poll(POLL_TIMEOUT, &mut self.events) {
                warn!(error = %e, "poll failed");
                continue;
            }

            let events = std::mem::take(&mut self.events);
            for event in &events {
                self.dispatch(*event);
            }
            self.events = events;

            self.sweep_timeouts();
        }
    }

    pub fn running(&self) -> bool {
        self.running
    }

    fn dispatch(&mut self, event: Event) {
        let fd = event.token as RawFd;

        if fd == self.listen_fd {
            if event.readable {
                self.accept_with_retry();
            }
            return;
        }

        if event.error_or_hangup {
            self.close_connection(fd);
            return;
        }

        let Some(conn) = self.connections.get_mut(&fd) else {
            // Stale token: the connection is already gone. Defensively drop
            // the registration so epoll stops reporting it.
            self.poller.deregister(fd);
            return;
        };

        match conn.act(event, &self.root, &self.afr) {
            Outcome::Close => self.close_connection(fd),
            Outcome::Continue => {
                let interest = conn.interest();
                if let Err(e) = self.poller.register(fd, fd as usize, interest) {
                    warn!(error = %e, fd, "failed to re-register connection");
                    self.close_connection(fd);
                }
            }
        }
    }

    fn accept_with_retry(&mut self) {
        for attempt in 1..=ACCEPT_MAX_TRIES {
            match sys_accept(self.listen_fd) {
                Ok(fd) => {
                    let conn = Connection::new(fd, Instant::now());
                    if let Err(e) = self.poller.register(fd, fd as usize, conn.interest()) {
                        warn!(error = %e, fd, "failed to register accepted connection");
                        sys_close(fd);
                        return;
                    }
                    self.connections.insert(fd, conn);
                    return;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if attempt < ACCEPT_MAX_TRIES {
                        std::thread::sleep(Duration::from_millis(10 * attempt as u64));
                    }
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    return;
                }
            }
        }
        debug!("accept gave up after {ACCEPT_MAX_TRIES} would-block retries");
    }

    fn sweep_timeouts(&mut self) {
        let now = Instant::now();
        let expired: Vec<RawFd> = self
            .connections
            .iter()
            .filter(|(_, conn)| conn.elapsed(now) > self.client_timeout)
            .map(|(fd, _)| *fd)
            .collect();

        for fd in expired {
            debug!(fd, "client timed out");
            self.close_connection(fd);
        }
    }

    fn close_connection(&mut self, fd: RawFd) {
        if let Some(mut conn) = self.connections.remove(&fd) {
            conn.close(&self.afr);
        }
        self.poller.deregister(fd);
    }

    /// Stops the loop, closes every open client socket, and joins the AFR
    /// thread. Called once, on worker shutdown.
    pub fn shutdown(&mut self) {
        self.running = false;
        let fds: Vec<RawFd> = self.connections.keys().copied().collect();
        for fd in fds {
            self.close_connection(fd);
        }
        self.afr.finish();
        sys_close(self.listen_fd);
    }
}
