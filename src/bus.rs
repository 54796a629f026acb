//! The bus (XATMI) seam.
//!
//! The real bus RPC library is an external collaborator (§1: "treated as a
//! black box exposing service-call, reply, context-save/restore
//! primitives"). This module defines the narrow trait a production embedder
//! implements, plus the typed-record shape the wire contract in §6 is built
//! from, so the rest of this crate never needs to know what the bus really
//! is.

use std::fmt;

use crate::error::ErrorCode;

/// The inbound typed record carried by a bus call (§6): a requested
/// connection id (0 = any), an optional correlator, and the opaque request
/// payload.
#[derive(Debug, Clone, Default)]
pub struct TypedRecord {
    /// `NETCONNID` — requested connection, 0 = any.
    pub net_conn_id: i64,
    /// `NETCORR` — opaque correlator, echoed on reply.
    pub net_corr: Option<String>,
    /// `NETDATA` — opaque request payload. `None` signals the mandatory
    /// field was absent.
    pub net_data: Option<Vec<u8>>,
}

/// A successful or failed bus reply.
#[derive(Debug, Clone)]
pub enum BusReply {
    /// `NETDATA` populated, `NERROR_CODE` absent/zero.
    Success {
        /// Response payload.
        data: Vec<u8>,
        /// Connection the reply was attributable to, if any.
        net_conn_id: Option<i64>,
    },
    /// `NERROR_CODE`/`NERROR_MSG` populated, optionally `NETCONNID`.
    Failure {
        /// Stable error code.
        code: ErrorCode,
        /// Human-readable detail.
        message: String,
        /// Connection the failure is attributable to, if any.
        net_conn_id: Option<i64>,
    },
}

impl BusReply {
    /// Build a failure reply, attributable to a connection when `id_comp`
    /// is a real composite id (non-zero), matching `GenError`'s behaviour
    /// in the original source.
    pub fn failure(code: ErrorCode, message: impl Into<String>, id_comp: i64) -> Self {
        BusReply::Failure {
            code,
            message: message.into(),
            net_conn_id: if id_comp > 0 { Some(id_comp) } else { None },
        }
    }
}

/// One slot in a [`crate::pool::WorkerPool`]: a bus context a worker thread
/// restores before calling into application logic, and which the bus
/// library's real implementation would use to save/restore RPC state
/// across the goroutine/thread boundary (§4.4, §4.5 preamble).
pub trait BusContext: Send {
    /// Restore this context's saved call state on the current thread
    /// before dispatching. A no-op for contexts that carry no real
    /// thread-local bus state (e.g. tests).
    fn restore(&mut self);

    /// Tear down this context. Called once during `WorkerPool` teardown,
    /// after every worker is known idle (§4.4).
    fn shutdown(&mut self);
}

impl fmt::Debug for dyn BusContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BusContext")
    }
}

/// Test-only in-memory `BusContext`, and a minimal service-call stand-in so
/// `Dispatcher` can be exercised end-to-end without a real bus (§6
/// expansion). Not gated behind `#[cfg(test)]`: a standalone binary with
/// no real bus to embed (see `src/bin/gateway.rs`) also has legitimate
/// use for a context that does nothing.
#[derive(Debug, Default)]
pub struct NullContext {
    pub(crate) restored: bool,
    pub(crate) shut_down: bool,
}

impl BusContext for NullContext {
    fn restore(&mut self) {
        self.restored = true;
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
    }
}

/// Test-only re-export kept for call sites that reach for
/// `bus::mock::NullContext` out of habit with the rest of the pack's
/// mock modules.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    pub use super::NullContext;
}
