//! # User-space DCCP implementation
//! The Datagram Congestion Control Protocol is an unreliable,
//! connection-oriented transport providing congestion-controlled
//! datagram delivery. It suits real-time media that prefers loss over
//! retransmission but still must behave fairly on shared networks.
//! This crate implements the endpoint lifecycle with CCID3 (TFRC)
//! congestion control on the sender side.
//!
//! ## Connection lifecycle
//! A client moves through REQUEST and PARTOPEN into OPEN, a server
//! through LISTEN and RESPOND. Teardown runs through CLOSING and
//! TIMEWAIT. Every timeout and backoff is a spawned task that sleeps,
//! reacquires the connection lock and re-checks the state it guards:
//! a timer whose state has moved on is a no-op.
//!
//! One deviation from RFC 4340 section 8.1.5 is kept on purpose: the
//! PARTOPEN timer emits a Sync besides the Ack. The forced SyncAck
//! moves the client to OPEN even when the server has no data to send,
//! so a one-directional flow does not strand the client in PARTOPEN.
//!
//! ## Concurrency
//! Each connection owns a read loop, a write loop and the timer tasks
//! of the current state. All protocol variables live behind one lock
//! which is never held across a link send. The codec runs lock free
//! on owned buffers; its results are merged under the lock.
//!
//! ## References
//! [0]: RFC 4340, Datagram Congestion Control Protocol
//! [1]: RFC 4342, Profile for CCID 3
//! [2]: RFC 5348, TCP Friendly Rate Control
#![deny(missing_docs)]
mod backoff;
mod conn;
mod dispatch;
mod gotostate;
mod socket;
mod user;

pub use crate::backoff::{BackOff, Expired};
pub use crate::conn::{Conn, ConnBuilder};
pub use crate::socket::{Socket, State};

use failure::Fail;

/// Maximum segment lifetime.
pub const MSL: u64 = 120_000_000_000;

/// Initial re-send period for client Request resends.
pub const REQUEST_BACKOFF_FIRST: u64 = 1_000_000_000;
/// Request re-sends quit after two minutes.
pub const REQUEST_BACKOFF_MAX: u64 = 120_000_000_000;
/// Request re-send period never grows past ten seconds.
pub const REQUEST_BACKOFF_FREQ: u64 = 10_000_000_000;

/// Initial PARTOPEN timer period, RFC 4340 section 8.1.5.
pub const PARTOPEN_BACKOFF_FIRST: u64 = 200_000_000;
/// The PARTOPEN timer gives up after four maximum segment lifetimes.
pub const PARTOPEN_BACKOFF_MAX: u64 = 4 * MSL;

/// Timeout in the RESPOND state.
pub const RESPOND_TIMEOUT: u64 = 30_000_000_000;
/// Timeout in the LISTEN state.
pub const LISTEN_TIMEOUT: u64 = 120_000_000_000;

/// Close re-sends stop after two maximum segment lifetimes.
pub const CLOSING_BACKOFF_MAX: u64 = 2 * MSL;
/// Close re-send period never grows past the maximum backoff
/// interval of the rate calculator.
pub const CLOSING_BACKOFF_FREQ: u64 = 64_000_000_000;

/// Quiet period after an acknowledged teardown.
pub const TIMEWAIT_TIMEOUT: u64 = 2 * MSL;

/// Default round-trip estimate until the handshake supplies a sample.
pub const RTT_DEFAULT: u64 = 200_000_000;

/// Connection-level errors. Per-packet codec errors drop the packet
/// and never surface here; these are the sticky errors a torn or
/// closed connection keeps returning.
#[derive(Clone, Copy, Debug, Eq, Fail, PartialEq)]
pub enum Error {
    /// The connection was never established or was torn down
    /// abnormally.
    #[fail(display = "i/o error")]
    Io,
    /// The connection was closed normally.
    #[fail(display = "end of file")]
    Eof,
    /// The descriptor is no longer usable for writing.
    #[fail(display = "bad file descriptor")]
    Ebadf,
}

/// Connection result type.
pub type Result<T> = std::result::Result<T, Error>;
