//! Process-wide shutdown state shared with the signal handler.
//!
//! `Lifecycle` holds the shutdown flag plus the descriptors of the listening
//! socket and the current client socket. `request_shutdown` is the only
//! writer of the flag and is async-signal-safe: it touches nothing but atomics
//! and `shutdown(2)`. Disabling a socket wakes a thread blocked in `accept`
//! or `recv` on it, while the owning Rust value stays the only place that
//! closes the descriptor.
//!
//! `shutdown(2)` on a listening socket waking `accept` is Linux behaviour.
//! Other platforms reject it with `ENOTCONN` and only have the `EINTR` from
//! handlers installed without `SA_RESTART`. That still ends a blocked `recv`,
//! but std retries an interrupted `accept` internally, so there the listener
//! wait lasts until the next connection arrives.

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

const NO_FD: RawFd = -1;

/// Shutdown flag and the sockets to disable when it is raised.
#[derive(Debug)]
pub struct Lifecycle {
    shutdown: AtomicBool,
    listener_fd: AtomicI32,
    client_fd: AtomicI32,
}

impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            listener_fd: AtomicI32::new(NO_FD),
            client_fd: AtomicI32::new(NO_FD),
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Raise the shutdown flag and disable every registered socket.
    ///
    /// Safe to call from a signal handler: no allocation, no locks, no
    /// logging.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        disable(self.client_fd.swap(NO_FD, Ordering::SeqCst));
        disable(self.listener_fd.swap(NO_FD, Ordering::SeqCst));
    }

    /// Register the listening socket until the returned guard is dropped.
    pub fn watch_listener(&self, fd: RawFd) -> FdRegistration<'_> {
        FdRegistration::new(&self.listener_fd, fd, &self.shutdown)
    }

    /// Register the current client socket until the returned guard is dropped.
    pub fn watch_client(&self, fd: RawFd) -> FdRegistration<'_> {
        FdRegistration::new(&self.client_fd, fd, &self.shutdown)
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a descriptor registered in a `Lifecycle` slot.
///
/// Must be dropped before the descriptor is closed.
#[derive(Debug)]
pub struct FdRegistration<'a> {
    slot: &'a AtomicI32,
}

impl<'a> FdRegistration<'a> {
    fn new(slot: &'a AtomicI32, fd: RawFd, shutdown: &AtomicBool) -> Self {
        slot.store(fd, Ordering::SeqCst);
        // A request that landed before the store never saw this descriptor
        if shutdown.load(Ordering::SeqCst) {
            disable(slot.swap(NO_FD, Ordering::SeqCst));
        }
        Self { slot }
    }
}

impl Drop for FdRegistration<'_> {
    fn drop(&mut self) {
        self.slot.store(NO_FD, Ordering::SeqCst);
    }
}

fn disable(fd: RawFd) {
    if fd >= 0 {
        // SAFETY: shutdown(2) is async-signal-safe and only changes socket
        // state; a stale descriptor yields an ignored error.
        unsafe {
            libc::shutdown(fd, libc::SHUT_RDWR);
        }
    }
}
