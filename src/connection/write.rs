//! The WRITE-RESPONSE half of the state machine: drains the header block,
//! then the AFR-backed file body (if any), then finishes.

use std::io;

use super::{Connection, Phase};
use crate::afr::AsyncFileReader;
use crate::reactor::sys::{sys_write, IO_BUF_SIZE};

pub enum WriteOutcome {
    Continue,
    Done,
}

pub fn on_writable(conn: &mut Connection, afr: &AsyncFileReader) -> WriteOutcome {
    let Phase::Write { out, file_attached } = &mut conn.phase else {
        unreachable!("on_writable called outside the write phase")
    };

    if !out.is_empty() {
        let to_send = out.len().min(IO_BUF_SIZE);
        let n = sys_write(conn.fd, &out[..to_send]);
        if n < 0 {
            let err = io::Error::last_os_error();
            return match err.kind() {
                io::ErrorKind::WouldBlock => WriteOutcome::Continue,
                io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => WriteOutcome::Done,
                _ => WriteOutcome::Done,
            };
        }
        out.drain(..n as usize);
        return WriteOutcome::Continue;
    }

    if *file_attached {
        let (mut bytes, eof) = afr.read(conn.fd);
        out.append(&mut bytes);
        if eof {
            *file_attached = false;
        }
        return WriteOutcome::Continue;
    }

    WriteOutcome::Done
}
