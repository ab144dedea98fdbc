//! The READ-REQUEST half of the state machine: buffers inbound bytes,
//! locates the end of the header block, and hands off to the response
//! builder.

use std::io;
use std::path::{Path, PathBuf};

use super::{Connection, Phase};
use crate::afr::AsyncFileReader;
use crate::reactor::sys::{sys_read, IO_BUF_MAXSIZE, IO_BUF_SIZE};
use crate::response::{self, Plan};

const HEADER_DELIM: &[u8] = b"\r\n\r\n";

pub enum ReadOutcome {
    Continue,
    Transitioned,
    Close,
}

pub fn on_readable(conn: &mut Connection, root: &Path, afr: &AsyncFileReader) -> ReadOutcome {
    let fd = conn.fd;

    let header_end = {
        let Phase::Read { buffer, scan_cursor } = &mut conn.phase else {
            unreachable!("on_readable called outside the read phase")
        };

        let mut chunk = [0u8; IO_BUF_SIZE];
        let n = sys_read(fd, &mut chunk);

        if n < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                ReadOutcome::Continue
            } else {
                ReadOutcome::Close
            };
        }
        if n == 0 {
            // Peer closed before sending a complete request.
            return ReadOutcome::Close;
        }

        let search_from = *scan_cursor;
        buffer.extend_from_slice(&chunk[..n as usize]);
        if buffer.len() > IO_BUF_MAXSIZE {
            return ReadOutcome::Close;
        }

        match find_subslice(&buffer[search_from..], HEADER_DELIM) {
            Some(pos) => Some(search_from + pos),
            None => {
                *scan_cursor = buffer.len().saturating_sub(HEADER_DELIM.len() - 1);
                None
            }
        }
    };

    let Some(header_end) = header_end else {
        return ReadOutcome::Continue;
    };

    let headers = match &conn.phase {
        Phase::Read { buffer, .. } => buffer[..header_end].to_vec(),
        Phase::Write { .. } => unreachable!(),
    };

    let plan = build_plan(root, &headers);
    transition(conn, plan, afr);
    ReadOutcome::Transitioned
}

fn first_line(block: &[u8]) -> &[u8] {
    let line = match block.iter().position(|&b| b == b'\n') {
        Some(pos) => &block[..pos],
        None => block,
    };
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn build_plan(root: &Path, headers: &[u8]) -> Plan {
    let line = first_line(headers);
    let mut parts = line.splitn(3, |&b| b == b' ');
    let method = parts.next().unwrap_or(b"");
    let uri = parts.next();

    match uri {
        Some(uri) if !method.is_empty() => response::plan_response(root, method, uri),
        // No method/URI to parse: malformed request line.
        _ => response::plain(500),
    }
}

fn transition(conn: &mut Connection, plan: Plan, afr: &AsyncFileReader) {
    let mut file_attached = false;

    if let Some(path) = plan.body_path {
        if let Ok(file) = std::fs::File::open(&path) {
            afr.register(conn.fd, file);
            file_attached = true;
        }
    }

    conn.phase = Phase::Write {
        out: plan.headers,
        file_attached,
    };
}

/// Finds `needle` in `haystack`, scanning from the start of the slice
/// passed in (callers pass the already-trimmed suffix that needs
/// re-scanning).
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_delimiter_across_the_whole_slice() {
        let haystack = b"GET / HTTP/1.1\r\n\r\n";
        assert_eq!(find_subslice(haystack, HEADER_DELIM), Some(14));
    }

    #[test]
    fn first_line_strips_cr() {
        assert_eq!(first_line(b"GET / HTTP/1.1\r\nHost: x\r\n"), b"GET / HTTP/1.1");
    }
}
