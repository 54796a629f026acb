//! An in-memory, in-process "socket", so `Connection`, the accept loop, and
//! the `NONPERS` dialer can be exercised in tests without a real TCP
//! listener. Two [`DuplexStream`] handles, built with [`pair`], read what
//! the other writes -- a minimal loopback pipe.

use std::collections::VecDeque;
use std::io::{self, Read, Result, Write};
use std::net::{Shutdown, SocketAddr};
use std::sync::{Arc, Condvar, Mutex};

use super::tcp_stream::TcpStream;

#[derive(Default)]
struct Pipe {
    buf: Mutex<VecDeque<u8>>,
    closed: Mutex<bool>,
    ready: Condvar,
}

impl Pipe {
    fn write_bytes(&self, data: &[u8]) {
        let mut buf = self.buf.lock().unwrap();
        buf.extend(data.iter().copied());
        self.ready.notify_all();
    }

    fn close(&self) {
        *self.closed.lock().unwrap() = true;
        self.ready.notify_all();
    }

    fn read_bytes(&self, out: &mut [u8]) -> usize {
        let mut buf = self.buf.lock().unwrap();
        loop {
            if !buf.is_empty() {
                let n = out.len().min(buf.len());
                for slot in out.iter_mut().take(n) {
                    *slot = buf.pop_front().unwrap();
                }
                return n;
            }
            if *self.closed.lock().unwrap() {
                return 0;
            }
            buf = self.ready.wait(buf).unwrap();
        }
    }
}

/// One end of an in-memory duplex connection.
#[derive(Clone)]
pub struct DuplexStream {
    read_side: Arc<Pipe>,
    write_side: Arc<Pipe>,
    peer: SocketAddr,
}

/// Build a connected pair: bytes written to `a` are read from `b`, and
/// vice versa.
pub fn pair(addr_a: SocketAddr, addr_b: SocketAddr) -> (DuplexStream, DuplexStream) {
    let a_to_b = Arc::new(Pipe::default());
    let b_to_a = Arc::new(Pipe::default());

    let a = DuplexStream {
        read_side: b_to_a.clone(),
        write_side: a_to_b.clone(),
        peer: addr_b,
    };
    let b = DuplexStream {
        read_side: a_to_b,
        write_side: b_to_a,
        peer: addr_a,
    };
    (a, b)
}

impl Read for DuplexStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read_side.read_bytes(buf))
    }
}

impl Write for DuplexStream {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_side.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl TcpStream for DuplexStream {
    fn connect(_addr: SocketAddr) -> Result<Self> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "DuplexStream is built with net::mock::pair, not connect",
        ))
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        Ok(self.peer)
    }

    fn shutdown(&self, _how: Shutdown) -> Result<()> {
        // A real shutdown(2) unblocks a thread locally parked in recv() on
        // this same fd, not just the peer's next read; close both sides so
        // a blocked reader on this handle observes EOF too.
        self.write_side.close();
        self.read_side.close();
        Ok(())
    }

    fn set_nodelay(&self, _nodelay: bool) -> Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pair_is_a_connected_loopback() {
        let (mut a, mut b) = pair("127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap());
        a.write_all(b"hello").unwrap();
        let mut buf = [0u8; 5];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn shutdown_unblocks_a_pending_read_with_eof() {
        let (a, mut b) = pair("127.0.0.1:1".parse().unwrap(), "127.0.0.1:2".parse().unwrap());
        a.shutdown(Shutdown::Both).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(b.read(&mut buf).unwrap(), 0);
    }
}
