//! SIGINT/SIGTERM handling.
//!
//! Handlers are installed without `SA_RESTART`, so a blocked call on the
//! receiving thread returns `EINTR`. The handler itself only forwards to
//! `Lifecycle::request_shutdown`.

use super::lifecycle::Lifecycle;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Signals that trigger a graceful shutdown.
pub const SHUTDOWN_SIGNALS: [libc::c_int; 2] = [libc::SIGINT, libc::SIGTERM];

/// Lifecycle the handler forwards to. Null until `install` runs.
static TARGET: AtomicPtr<Lifecycle> = AtomicPtr::new(ptr::null_mut());

extern "C" fn handle_shutdown_signal(_signo: libc::c_int) {
    let target = TARGET.load(Ordering::SeqCst);
    if !target.is_null() {
        // SAFETY: TARGET only ever holds a pointer derived from a
        // `&'static Lifecycle`.
        unsafe { (*target).request_shutdown() };
    }
}

/// Route SIGINT and SIGTERM to `lifecycle`.
///
/// Installing again replaces the previous target.
pub fn install(lifecycle: &'static Lifecycle) -> io::Result<()> {
    TARGET.store(
        lifecycle as *const Lifecycle as *mut Lifecycle,
        Ordering::SeqCst,
    );

    for signo in SHUTDOWN_SIGNALS {
        // SAFETY: the sigaction struct is fully initialized before use and
        // the handler only performs async-signal-safe operations.
        let rc = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = handle_shutdown_signal as extern "C" fn(libc::c_int) as usize;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);
            libc::sigaction(signo, &action, ptr::null_mut())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(test)]
extern "C" fn ignore_signal(_signo: libc::c_int) {}

/// Install a do-nothing handler for `signo` without `SA_RESTART`, so
/// delivering it to a thread blocked in I/O makes the call fail with `EINTR`.
#[cfg(test)]
pub(crate) fn install_interrupting(signo: libc::c_int) {
    // SAFETY: same as `install`; the handler does nothing.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = ignore_signal as extern "C" fn(libc::c_int) as usize;
        action.sa_flags = 0;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signo, &action, ptr::null_mut())
    };
    assert_eq!(rc, 0, "sigaction failed: {}", io::Error::last_os_error());
}

/// Deliver SIGUSR1 to `thread` `times` times, pausing between deliveries.
#[cfg(test)]
pub(crate) fn interrupt_thread(thread: libc::pthread_t, times: usize) {
    install_interrupting(libc::SIGUSR1);
    for _ in 0..times {
        // SAFETY: the target thread is alive for the duration of the test
        let rc = unsafe { libc::pthread_kill(thread, libc::SIGUSR1) };
        assert_eq!(rc, 0);
        std::thread::sleep(std::time::Duration::from_millis(20));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigterm_requests_shutdown() {
        static LIFECYCLE: Lifecycle = Lifecycle::new();

        install(&LIFECYCLE).unwrap();
        assert!(!LIFECYCLE.is_shutting_down());

        // raise() runs the handler on this thread before returning
        let rc = unsafe { libc::raise(libc::SIGTERM) };
        assert_eq!(rc, 0);
        assert!(LIFECYCLE.is_shutting_down());
    }
}
