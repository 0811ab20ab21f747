//! Logging setup.
//!
//! Events are formatted by `tracing-subscriber` and, by default, handed to
//! `syslog(3)` under the `aesdsocket` ident with the priority taken from the
//! event level. `RUST_LOG` overrides the configured level.

use crate::config::LogTarget;
use std::ffi::{CStr, CString};
use std::io;
use tracing::{Level, Metadata};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const IDENT: &CStr = c"aesdsocket";

/// Install the global subscriber.
pub fn init(level: &str, target: LogTarget) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match target {
        LogTarget::Syslog => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_writer(Syslog::open())
            .init(),
        LogTarget::Stderr => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init(),
    }
}

/// `MakeWriter` that sends each formatted event to the system log.
#[derive(Debug)]
pub struct Syslog {
    _private: (),
}

impl Syslog {
    /// Open the connection to the system logger (`LOG_USER`, with PID).
    pub fn open() -> Self {
        // SAFETY: IDENT is a 'static C string, as openlog(3) requires.
        unsafe { libc::openlog(IDENT.as_ptr(), libc::LOG_PID, libc::LOG_USER) };
        Self { _private: () }
    }
}

impl<'a> MakeWriter<'a> for Syslog {
    type Writer = SyslogLine;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogLine::new(libc::LOG_INFO)
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        SyslogLine::new(priority(meta.level()))
    }
}

/// One log line, emitted to syslog when dropped.
pub struct SyslogLine {
    priority: libc::c_int,
    buf: Vec<u8>,
}

impl SyslogLine {
    fn new(priority: libc::c_int) -> Self {
        Self {
            priority,
            buf: Vec::with_capacity(128),
        }
    }
}

impl io::Write for SyslogLine {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SyslogLine {
    fn drop(&mut self) {
        let Some(message) = to_message(&self.buf) else {
            return;
        };
        // SAFETY: both pointers are valid NUL-terminated strings and the
        // format consumes exactly one string argument.
        unsafe { libc::syslog(self.priority, c"%s".as_ptr(), message.as_ptr()) };
    }
}

fn priority(level: &Level) -> libc::c_int {
    match *level {
        Level::ERROR => libc::LOG_ERR,
        Level::WARN => libc::LOG_WARNING,
        Level::INFO => libc::LOG_INFO,
        Level::DEBUG | Level::TRACE => libc::LOG_DEBUG,
    }
}

/// Trim the trailing newline and drop interior NULs.
fn to_message(buf: &[u8]) -> Option<CString> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    if line.is_empty() {
        return None;
    }
    let bytes: Vec<u8> = line.iter().copied().filter(|&b| b != 0).collect();
    CString::new(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(priority(&Level::ERROR), libc::LOG_ERR);
        assert_eq!(priority(&Level::WARN), libc::LOG_WARNING);
        assert_eq!(priority(&Level::INFO), libc::LOG_INFO);
        assert_eq!(priority(&Level::DEBUG), libc::LOG_DEBUG);
        assert_eq!(priority(&Level::TRACE), libc::LOG_DEBUG);
    }

    #[test]
    fn test_message_trimming() {
        assert_eq!(
            to_message(b" INFO Accepted connection from 127.0.0.1\n").unwrap(),
            CString::new(" INFO Accepted connection from 127.0.0.1").unwrap()
        );
        assert_eq!(to_message(b"a\0b").unwrap(), CString::new("ab").unwrap());
        assert!(to_message(b"\n").is_none());
        assert!(to_message(b"").is_none());
    }

    #[test]
    fn test_line_buffers_writes() {
        use std::io::Write;

        let mut line = SyslogLine::new(libc::LOG_DEBUG);
        line.write_all(b"part one, ").unwrap();
        line.write_all(b"part two\n").unwrap();
        assert_eq!(line.buf, b"part one, part two\n");
        // Cleared so dropping the test line does not reach the system log
        line.buf.clear();
    }
}
