//! The binary framing codec for the TCP wire is an external collaborator
//! (§1: "assumed to deliver complete message payloads as opaque byte
//! arrays"). This module defines the narrow `FrameTransport` seam the
//! `Connection` reader/writer threads use, plus one concrete
//! length-prefixed implementation so the crate is runnable standalone; a
//! production deployment is free to swap in whatever codec the peer
//! actually speaks.

use std::io::{self, Read, Write};

use crate::net::TcpStream;

/// Maximum frame size accepted by [`LengthPrefixed`], guarding against a
/// corrupt or hostile length prefix causing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Reads and writes complete message frames over a connected stream.
pub trait FrameTransport: Send {
    /// Block until one complete frame has been read, or the peer closed
    /// the connection (`Ok` of length 0 at EOF is surfaced as an error,
    /// since a frame transport has no concept of a valid empty frame).
    fn recv_frame(&mut self) -> io::Result<Vec<u8>>;

    /// Write one complete frame.
    fn send_frame(&mut self, data: &[u8]) -> io::Result<()>;
}

/// A simple `u32` big-endian length prefix followed by that many payload
/// bytes. This is the gateway's own default; it is not part of the
/// dispatch core's contract and exists only so the binary has something
/// to run against out of the box.
pub struct LengthPrefixed<S> {
    stream: S,
}

impl<S> LengthPrefixed<S>
where
    S: TcpStream,
{
    /// Wrap `stream` in the length-prefixed framing.
    pub fn new(stream: S) -> Self {
        LengthPrefixed { stream }
    }
}

impl<S> FrameTransport for LengthPrefixed<S>
where
    S: TcpStream,
{
    fn recv_frame(&mut self) -> io::Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf)?;
        let len = u32::from_be_bytes(len_buf);
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
            ));
        }
        let mut payload = vec![0u8; len as usize];
        self.stream.read_exact(&mut payload)?;
        Ok(payload)
    }

    fn send_frame(&mut self, data: &[u8]) -> io::Result<()> {
        let len = u32::try_from(data.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "frame payload too large")
        })?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(data)?;
        self.stream.flush()
    }
}
