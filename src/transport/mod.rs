//! Transport Link
//!
//! A duplex byte stream to the target. The protocol client only ever talks
//! through [`Transport`], so the TCP link and the in-process simulator are
//! interchangeable.

pub mod tcp;

pub use tcp::TcpTransport;

use crate::error::Result;
use std::io;

/// Default TCP port of the Gecko debug stub
pub const DEFAULT_PORT: u16 = 7331;

/// Byte stream to a Gecko target.
pub trait Transport: Send {
    /// Open the link. Calling this on an open link is a no-op.
    fn connect(&mut self) -> Result<()>;

    /// Close the link. Calling this on a closed link is a no-op.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    /// Write all of `data`.
    fn send(&mut self, data: &[u8]) -> io::Result<()>;

    /// Write a prefix of `data` and return its length. An error means none
    /// of `data` went out.
    fn send_partial(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Fill all of `buf`. A read that times out or ends mid-frame fails with
    /// a [transient](is_transient) error; the bytes already consumed are lost.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Return one byte if the target has already pushed one, without blocking.
    fn try_recv_byte(&mut self) -> io::Result<Option<u8>>;

    /// Drop any bytes waiting on the input side.
    fn purge(&mut self) -> Result<()>;
}

/// Whether an I/O error is a short or garbled transfer worth retrying in place.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::Interrupted
            | io::ErrorKind::InvalidData
    )
}
