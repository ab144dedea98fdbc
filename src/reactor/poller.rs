//! Linux `epoll`-based readiness poller.
//!
//! Registration follows the explicit `modify`-vs-`add` discipline: a file
//! descriptor is added with `EPOLL_CTL_ADD` the first time it's seen and
//! modified with `EPOLL_CTL_MOD` on every subsequent call, so the stored
//! interest always reflects the most recent registration.

use std::collections::HashSet;
use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub error_or_hangup: bool,
}

pub struct Poller {
    epoll: RawFd,
    registered: HashSet<RawFd>,
    events: Vec<epoll_event>,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll,
            registered: HashSet::new(),
            events: Vec::with_capacity(256),
        })
    }

    fn flags(interest: Interest) -> u32 {
        // Error/hang-up are implicit and always included.
        let mut flags = (EPOLLERR | EPOLLHUP) as u32;
        if interest.read {
            flags |= EPOLLIN as u32;
        }
        if interest.write {
            flags |= EPOLLOUT as u32;
        }
        flags
    }

    pub fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: Self::flags(interest),
            u64: token as u64,
        };
        let op = if self.registered.insert(fd) {
            EPOLL_CTL_ADD
        } else {
            EPOLL_CTL_MOD
        };
        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub fn deregister(&mut self, fd: RawFd) {
        if self.registered.remove(&fd) {
            unsafe {
                epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut());
            }
        }
    }

    pub fn poll(&mut self, timeout: Duration, out: &mut Vec<Event>) -> io::Result<()> {
        let timeout_ms = timeout.as_millis() as i32;

        unsafe {
            self.events.set_len(self.events.capacity());
        }

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        out.clear();

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        for ev in &self.events {
            out.push(Event {
                token: ev.u64 as usize,
                readable: ev.events & EPOLLIN as u32 != 0,
                writable: ev.events & EPOLLOUT as u32 != 0,
                error_or_hangup: ev.events & (EPOLLERR | EPOLLHUP) as u32 != 0,
            });
        }

        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

unsafe impl Send for Poller {}
