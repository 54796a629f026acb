//! HTTP-outcall dispatcher (§4.7): the sibling to the TCP dispatch core
//! that adapts the bus-to-HTTP direction, sharing the same bounded
//! [`crate::pool::WorkerPool`] discipline and a URL-path service-routing
//! table instead of a connection registry.

pub mod router;
pub mod server;

pub use router::{HttpBusContext, ServiceRouter};
pub use server::HttpServer;
