//! Blocking runtime for the record log server.
//!
//! - `buffer`: per-connection packet accumulation and record framing
//! - `connection`: receive/append/echo loop for one client
//! - `lifecycle`: shutdown flag and socket registrations shared with signals
//! - `signal`: SIGINT/SIGTERM installation
//! - `daemon`: detaching after the listener is bound

mod buffer;
mod connection;
pub mod daemon;
mod lifecycle;
pub mod signal;

pub(crate) use connection::Connection;
pub(crate) use lifecycle::Lifecycle;
