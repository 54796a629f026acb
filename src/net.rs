//! Abstractions over `std::net`, so the reader/writer threads and the
//! accept loop can be driven against an in-memory stream in tests instead
//! of a real socket. Plain blocking I/O: this crate has no use for a
//! non-blocking readiness model (see `DESIGN.md`).

pub mod mock;
pub mod tcp_listener;
pub mod tcp_stream;

pub use tcp_listener::TcpListener;
pub use tcp_stream::TcpStream;
