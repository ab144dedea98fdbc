//! The fork-based worker pool. One listening socket, bound once in this
//! (parent) process, shared by every forked child; no IPC between workers,
//! matching the single-process reactor's own no-shared-state design one
//! level up.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cli::Args;
use crate::server::{self, Server};
use crate::{logging, shutdown};

const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);
const REAP_INTERVAL: Duration = Duration::from_millis(500);

/// Binds the shared listener, forks `args.worker_count()` children, and
/// watches over them until a shutdown signal arrives. Exits the process
/// directly; never returns normally.
pub fn run(args: Args) -> ! {
    logging::init(args.log.as_deref());

    let root = std::fs::canonicalize(&args.root)
        .map_err(|source| crate::error::BindError::DocumentRoot {
            path: args.root.clone(),
            source,
        })
        .unwrap_or_else(|e| {
            error!(error = %e, "failed to resolve document root");
            std::process::exit(1);
        });

    let listen_fd = server::bind_listener(&args.address, args.port).unwrap_or_else(|e| {
        error!(error = %e, "failed to bind listening socket");
        std::process::exit(1);
    });

    shutdown::install();
    info!("starting watcher");

    let worker_count = args.worker_count();
    let mut children: Vec<libc::pid_t> = Vec::new();

    loop {
        while children.len() < worker_count && !shutdown::requested() {
            match spawn_worker(listen_fd, &root) {
                Some(pid) => {
                    info!(pid, "new child created");
                    children.push(pid);
                }
                None => {
                    warn!("fork failed, backing off");
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }

        if shutdown::requested() {
            break;
        }

        reap_exited(&mut children);
        std::thread::sleep(REAP_INTERVAL);
    }

    info!("watcher stop, forwarding shutdown to children");
    for &pid in &children {
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
    for pid in children {
        let mut status: i32 = 0;
        unsafe {
            libc::waitpid(pid, &mut status, 0);
        }
        info!(pid, "joined");
    }

    std::process::exit(0);
}

/// Forks one child. Returns the child's pid in the parent; the child runs
/// its `Server` to completion and calls `process::exit` itself, so this
/// function never returns `Some` twice for the same fork. The child inherits
/// the parent's already-initialized `tracing` dispatcher across the fork, so
/// it does not call [`logging::init`] again.
fn spawn_worker(listen_fd: i32, root: &PathBuf) -> Option<libc::pid_t> {
    match unsafe { libc::fork() } {
        -1 => None,
        0 => {
            run_child(listen_fd, root.clone());
            unreachable!("run_child always exits the process");
        }
        pid => Some(pid),
    }
}

fn run_child(listen_fd: i32, root: PathBuf) -> ! {
    shutdown::install();

    let mut server = Server::from_listener(listen_fd, root, CLIENT_TIMEOUT).unwrap_or_else(|e| {
        error!(error = %e, "worker failed to initialize reactor");
        std::process::exit(1);
    });

    server.run();
    server.shutdown();
    std::process::exit(0);
}

fn reap_exited(children: &mut Vec<libc::pid_t>) {
    loop {
        let mut status: i32 = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        children.retain(|&p| p != pid);
        info!(pid, exit_status = status, "child exited; will respawn");
    }
}
