//! TODO: fold in `set_read_timeout`/`set_write_timeout` once the framing
//! codec needs to bound partial-frame stalls.

use std::io::{Read, Result, Write};
use std::net::{Shutdown, SocketAddr};

/// A connected byte stream, abstracted so tests can substitute an
/// in-memory pair (`crate::net::mock`) for a real `std::net::TcpStream`.
pub trait TcpStream: Read + Write + Send {
    /// Open a new connection to `addr`.
    fn connect(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    /// The remote address of this connection.
    fn peer_addr(&self) -> Result<SocketAddr>;

    /// Shut down the read, write, or both halves of this connection.
    fn shutdown(&self, how: Shutdown) -> Result<()>;

    /// Enable or disable Nagle's algorithm.
    fn set_nodelay(&self, nodelay: bool) -> Result<()>;

    /// A cheap clone sharing the same underlying socket, so reader and
    /// writer threads can each own a handle.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;
}

impl TcpStream for std::net::TcpStream {
    #[inline]
    fn connect(addr: SocketAddr) -> Result<Self> {
        Self::connect(addr)
    }

    #[inline]
    fn peer_addr(&self) -> Result<SocketAddr> {
        Self::peer_addr(self)
    }

    #[inline]
    fn shutdown(&self, how: Shutdown) -> Result<()> {
        Self::shutdown(self, how)
    }

    #[inline]
    fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        Self::set_nodelay(self, nodelay)
    }

    #[inline]
    fn try_clone(&self) -> Result<Self> {
        Self::try_clone(self)
    }
}
