use std::io::Result;
use std::net::SocketAddr;

use super::tcp_stream::TcpStream;

/// A bound listening socket, abstracted for the same reason as
/// [`TcpStream`](super::tcp_stream::TcpStream).
pub trait TcpListener<S: TcpStream> {
    /// Bind a new listener to `addr`.
    fn bind(addr: SocketAddr) -> Result<Self>
    where
        Self: Sized;

    /// Block until a peer connects, returning its stream and address.
    fn accept(&self) -> Result<(S, SocketAddr)>;

    /// The address this listener is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;
}

type STcpListener = std::net::TcpListener;
type STcpStream = std::net::TcpStream;

impl TcpListener<STcpStream> for STcpListener {
    #[inline]
    fn bind(addr: SocketAddr) -> Result<Self> {
        Self::bind(addr)
    }

    #[inline]
    fn accept(&self) -> Result<(STcpStream, SocketAddr)> {
        Self::accept(self)
    }

    #[inline]
    fn local_addr(&self) -> Result<SocketAddr> {
        Self::local_addr(self)
    }
}
