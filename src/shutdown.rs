//! A single global flag set by a `SIGINT`/`SIGTERM` handler, checked by the
//! reactor's run loop and the supervisor's watch loop. Kept separate from
//! both so neither has to own signal disposition on the other's behalf.

use std::sync::atomic::{AtomicBool, Ordering};

static REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_signal(_: i32) {
    REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs the handler for the calling process. Safe to call once per
/// process (parent and each forked child call it independently).
pub fn install() {
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

pub fn requested() -> bool {
    REQUESTED.load(Ordering::SeqCst)
}
