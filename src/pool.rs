//! Bounded worker pools of bus contexts (§4.4).
//!
//! A pool holds `N` pre-created bus contexts and a bounded channel
//! pre-populated with `0..N` — the free channel, used purely as a
//! semaphore. Acquiring blocks when the pool is exhausted; there is no
//! acquire timeout, since backpressure is meant to propagate to the bus
//! caller, which has its own timeout. Two independent instances exist in a
//! running gateway: one for inbound (network → bus) calls, one for
//! outbound (bus → network); they never share contexts (§4.4).

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

use crossbeam_channel::{bounded, Receiver, Sender};
use log::error;

use crate::bus::BusContext;

/// A fixed-size pool of bus contexts, dispatched through a free-slot
/// channel.
pub struct WorkerPool<T> {
    contexts: Vec<Mutex<T>>,
    free_tx: Sender<usize>,
    free_rx: Receiver<usize>,
}

impl<T> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.contexts.len())
            .finish()
    }
}

impl<T> WorkerPool<T>
where
    T: BusContext,
{
    /// Build a pool of `contexts.len()` workers, the free channel
    /// pre-filled with every index.
    pub fn new(contexts: Vec<T>) -> Self {
        let n = contexts.len();
        let (free_tx, free_rx) = bounded(n);
        for i in 0..n {
            free_tx.send(i).expect("free channel has room for every slot");
        }

        WorkerPool {
            contexts: contexts.into_iter().map(Mutex::new).collect(),
            free_tx,
            free_rx,
        }
    }

    /// Number of worker slots in this pool.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether this pool has zero slots (never true for a pool built from
    /// a non-empty `Vec`, kept for clippy's `len_without_is_empty`).
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Acquire a free slot (blocking until one is available), restore its
    /// context, run `body`, and return the slot to the free channel —
    /// even if `body` panics. A panic is caught, logged, and surfaces to
    /// the caller as `None`; the slot is returned regardless (§7: "Panics
    /// within a worker must be caught at the worker boundary, logged, and
    /// the slot returned to the free channel").
    pub fn run<R>(&self, body: impl FnOnce(&mut T) -> R) -> Option<R> {
        // Blocks -- this is the pool's only suspension point, and the
        // source of its semaphore-style backpressure.
        let slot = self.free_rx.recv().expect("pool context never torn down while callers still acquire");

        let result = {
            let mut guard = self.contexts[slot].lock().unwrap();
            guard.restore();
            catch_unwind(AssertUnwindSafe(|| body(&mut guard)))
        };

        // Always return the slot, whether body succeeded or panicked.
        let _ = self.free_tx.send(slot);

        match result {
            Ok(value) => Some(value),
            Err(payload) => {
                error!("worker panicked, slot recovered: {}", panic_message(&payload));
                None
            }
        }
    }

    /// Tear down every context. Drains the free channel `N` times first,
    /// so every worker is known idle, then shuts down each context in
    /// turn (§4.4). The caller must have already stopped advertising the
    /// service entry points that feed this pool before calling this --
    /// teardown must not race with a new acquire.
    pub fn shutdown(&self) {
        let n = self.contexts.len();
        let mut drained = Vec::with_capacity(n);
        for _ in 0..n {
            drained.push(self.free_rx.recv().expect("all workers must become idle"));
        }

        for slot in drained {
            self.contexts[slot].lock().unwrap().shutdown();
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
