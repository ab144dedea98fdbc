//! The async file reader: a dedicated background thread that prefetches
//! file content into per-connection buffers so the reactor thread never
//! blocks on disk.
//!
//! Coordination follows the same parked-count-plus-condvar shape as the
//! teacher's work-stealing injector, adapted from a task-stealing queue to
//! a single-consumer prefetch queue: one `Mutex` guards queue membership,
//! one `Condvar` wakes the background thread, and each entry carries its
//! own lock so a `read()` call and the producer's read pass never block on
//! each other's queue bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::io::Read;
use std::os::fd::RawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::reactor::sys::{AFR_HIGH_WATER_MARK, IO_BUF_SIZE};

struct EntryInner {
    file: Option<File>,
    buffer: Vec<u8>,
    read_total: u64,
    eof: bool,
}

struct Entry {
    fd: RawFd,
    inner: Mutex<EntryInner>,
}

struct State {
    readers: HashMap<RawFd, Arc<Entry>>,
    queue: VecDeque<Arc<Entry>>,
    queued: HashSet<RawFd>,
    running: bool,
}

/// Handle to the background prefetch thread. Cloned freely; all operations
/// are thread-safe.
pub struct AsyncFileReader {
    state: Mutex<State>,
    cv: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl AsyncFileReader {
    pub fn start() -> Arc<Self> {
        let afr = Arc::new(Self {
            state: Mutex::new(State {
                readers: HashMap::new(),
                queue: VecDeque::new(),
                queued: HashSet::new(),
                running: true,
            }),
            cv: Condvar::new(),
            thread: Mutex::new(None),
        });

        let worker = {
            let afr = afr.clone();
            std::thread::Builder::new()
                .name("afr".into())
                .spawn(move || afr.run())
                .expect("failed to spawn async file reader thread")
        };
        *afr.thread.lock().unwrap() = Some(worker);
        afr
    }

    /// Registers `file` under `fd`, enqueueing it for an immediate first
    /// read pass.
    pub fn register(&self, fd: RawFd, file: File) {
        let entry = Arc::new(Entry {
            fd,
            inner: Mutex::new(EntryInner {
                file: Some(file),
                buffer: Vec::new(),
                read_total: 0,
                eof: false,
            }),
        });

        let mut state = self.state.lock().unwrap();
        state.readers.insert(fd, entry.clone());
        state.queue.push_back(entry);
        state.queued.insert(fd);
        self.cv.notify_one();
    }

    /// Cancels prefetch for `fd`. Takes effect no later than the producer's
    /// next pass over the entry, which closes the file.
    pub fn unregister(&self, fd: RawFd) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.readers.remove(&fd) else {
            return;
        };
        entry.inner.lock().unwrap().eof = true;

        if state.queued.insert(fd) {
            state.queue.push_back(entry);
            self.cv.notify_one();
        }
    }

    /// Drains whatever has been prefetched for `fd`. Returns `(bytes, true)`
    /// once the entry has reached EOF (after which it's gone), or
    /// `(bytes, false)` if more may still arrive.
    pub fn read(&self, fd: RawFd) -> (Vec<u8>, bool) {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.readers.get(&fd).cloned() else {
            return (Vec::new(), true);
        };

        let (buffer, eof) = {
            let mut inner = entry.inner.lock().unwrap();
            let buffer = std::mem::take(&mut inner.buffer);
            (buffer, inner.eof)
        };

        if eof {
            state.readers.remove(&fd);
            return (buffer, true);
        }

        if state.queued.insert(fd) {
            state.queue.push_back(entry);
            self.cv.notify_one();
        }
        (buffer, false)
    }

    /// Stops the background thread and joins it, closing any files still
    /// open. Safe to call once during worker shutdown.
    pub fn finish(&self) {
        {
            let mut state = self.state.lock().unwrap();
            for entry in state.readers.values() {
                entry.inner.lock().unwrap().eof = true;
            }
            state.running = false;
            self.cv.notify_all();
        }

        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let mut state = self.state.lock().unwrap();
        state.readers.clear();
        state.queue.clear();
        state.queued.clear();
    }

    fn run(&self) {
        loop {
            let entry = {
                let mut state = self.state.lock().unwrap();
                loop {
                    if !state.running {
                        return;
                    }
                    if let Some(entry) = state.queue.pop_front() {
                        break entry;
                    }
                    state = self.cv.wait(state).unwrap();
                }
            };

            let (eof, buffer_len) = {
                let mut inner = entry.inner.lock().unwrap();
                if inner.eof {
                    inner.file = None;
                } else {
                    let mut chunk = [0u8; IO_BUF_SIZE];
                    match inner.file.as_mut().expect("entry has a file while not eof").read(&mut chunk) {
                        Ok(0) => {
                            inner.eof = true;
                            inner.file = None;
                        }
                        Ok(n) => {
                            inner.read_total += n as u64;
                            inner.buffer.extend_from_slice(&chunk[..n]);
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(_) => {
                            inner.eof = true;
                            inner.file = None;
                        }
                    }
                }
                (inner.eof, inner.buffer.len())
            };

            let mut state = self.state.lock().unwrap();
            if !eof && buffer_len < AFR_HIGH_WATER_MARK {
                state.queue.push_back(entry);
            } else {
                state.queued.remove(&entry.fd);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn wait_until<F: FnMut() -> bool>(mut pred: F) {
        for _ in 0..200 {
            if pred() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        panic!("condition never became true");
    }

    #[test]
    fn reads_a_small_file_to_eof() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let fd = {
            use std::os::fd::AsRawFd;
            tmp.as_file().as_raw_fd()
        };

        let afr = AsyncFileReader::start();
        let file = tmp.reopen().unwrap();
        afr.register(fd, file);

        let mut collected = Vec::new();
        let mut done = false;
        wait_until(|| {
            let (mut bytes, eof) = afr.read(fd);
            collected.append(&mut bytes);
            done = eof;
            eof
        });
        assert!(done);
        assert_eq!(collected, b"hello world");
        afr.finish();
    }

    #[test]
    fn unregister_stops_delivering_new_bytes() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![7u8; 1024]).unwrap();
        let fd = {
            use std::os::fd::AsRawFd;
            tmp.as_file().as_raw_fd()
        };

        let afr = AsyncFileReader::start();
        afr.register(fd, tmp.reopen().unwrap());
        afr.unregister(fd);

        wait_until(|| afr.read(fd).1);
        afr.finish();
    }
}
