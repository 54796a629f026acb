//! Request/reply correlation and dispatch core for a TCP-to-bus gateway
//! (§1). The bus RPC library, the wire framing codec, bus configuration
//! loading, and transport encryption are external collaborators; this
//! crate defines the narrow seams they plug into ([`bus::BusContext`],
//! [`wire::FrameTransport`], [`dispatcher::Dialer`]) and implements
//! everything in between: connection lifecycle, the four dispatch modes,
//! bounded worker pools, and the sibling HTTP-outcall dispatcher.

pub mod block;
pub mod bus;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod id_alloc;
pub mod net;
pub mod pool;
pub mod registry;
pub mod waiter;
pub mod wire;

pub use block::DataBlock;
pub use bus::{BusContext, BusReply, TypedRecord};
pub use config::{DispatchMode, GatewayConfig, ServiceDescriptor};
pub use connection::{Connection, ConnState};
pub use dispatcher::Dispatcher;
pub use error::{ErrorCode, GatewayError, Result};
pub use id_alloc::IdAlloc;
pub use pool::WorkerPool;
pub use registry::ConnRegistry;
pub use waiter::{ConnWaiterTable, CorrWaiterTable};
