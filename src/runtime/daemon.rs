//! Detaching from the controlling terminal.

use std::io;

/// Run the rest of the process as a daemon.
///
/// Forks (the parent exits with status 0), starts a new session, changes the
/// working directory to `/` and points stdin/stdout/stderr at `/dev/null`.
/// Open descriptors such as an already-bound listening socket are inherited
/// unchanged. Must be called while the process is still single-threaded.
pub fn detach() -> io::Result<()> {
    // SAFETY: daemon(3) only forks and rearranges the standard descriptors;
    // the caller guarantees no other threads exist yet.
    let rc = unsafe { libc::daemon(0, 0) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
