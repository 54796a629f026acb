//! `Connection`: the reader/writer thread pair behind one persistent TCP
//! connection, used by the `ASYNC_CORR` and `SYNC_CONN` dispatch modes.
//! `NONPERS` and `FIRE_FORGET` dial and tear down a socket per call and
//! have no need for this machinery; see `dispatcher`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{select, Receiver, Sender, TryRecvError};

use crate::block::DataBlock;
use crate::bus::BusReply;
use crate::error::{ErrorCode, GatewayError, Result};
use crate::id_alloc::IdAlloc;
use crate::registry::ConnRegistry;
use crate::waiter::{ConnWaiterTable, CorrWaiterTable};
use crate::wire::FrameTransport;

/// Where a connection sits in its lifetime. Transitions only move forward:
/// `Dialing -> Established -> Draining -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// TCP handshake in flight (outbound dials only); inbound accepts
    /// start directly at `Established`.
    Dialing,
    /// Reader and writer threads are both running.
    Established,
    /// One direction has failed, or shutdown was requested; the other is
    /// being torn down.
    Draining,
    /// Both threads have exited and the connection has been unregistered.
    Closed,
}

/// One persistent connection's reader and writer threads, plus everything
/// needed to fan out a `CONN_CLOSED` reply once both threads have exited.
pub struct Connection {
    /// Short id, reusable once this connection closes.
    pub id: u32,
    /// Stamp this id was minted with.
    pub id_stamp: u32,
    /// `(stamp << id_bits) | id`, never reused while the process lives.
    pub id_comp: i64,

    state: Mutex<ConnState>,
    outgoing_tx: Sender<Arc<DataBlock>>,
    outgoing_rx: Receiver<Arc<DataBlock>>,
    close_tx: Sender<()>,
    close_rx: Receiver<()>,
    shutdown_hook: Box<dyn Fn() + Send + Sync>,

    registry: Arc<ConnRegistry>,
    id_alloc: Arc<IdAlloc>,
    conn_waiters: Arc<ConnWaiterTable>,
    corr_waiters: Arc<CorrWaiterTable>,

    /// Counts threads that have exited; the second one to finish runs the
    /// close fan-out exactly once.
    done_count: AtomicUsize,

    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("id_comp", &self.id_comp)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Spawn a connection's reader and writer threads over an already
    /// connected transport, split into independent read and write halves
    /// (built by the caller from two `try_clone`d stream handles, one
    /// `FrameTransport` wrapping each, the usual thread-per-direction
    /// pattern over a cloned socket).
    ///
    /// `on_frame` runs on the reader thread for every frame the peer
    /// sends; it routes the payload to whichever waiter the active
    /// dispatch mode expects it at (a correlator for `ASYNC_CORR`, the
    /// sole in-flight call for `SYNC_CONN`). `shutdown_hook` is called
    /// once by [`Self::close`] to unblock a reader parked in
    /// `recv_frame`, typically by shutting down the underlying socket.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        id: u32,
        id_stamp: u32,
        id_comp: i64,
        mut reader_transport: Box<dyn FrameTransport>,
        mut writer_transport: Box<dyn FrameTransport>,
        registry: Arc<ConnRegistry>,
        id_alloc: Arc<IdAlloc>,
        conn_waiters: Arc<ConnWaiterTable>,
        corr_waiters: Arc<CorrWaiterTable>,
        shutdown_hook: Box<dyn Fn() + Send + Sync>,
        on_frame: impl Fn(&Connection, Vec<u8>) + Send + 'static,
    ) -> Arc<Connection> {
        let (outgoing_tx, outgoing_rx) = crossbeam_channel::unbounded();
        let (close_tx, close_rx) = crossbeam_channel::bounded(1);

        let conn = Arc::new(Connection {
            id,
            id_stamp,
            id_comp,
            state: Mutex::new(ConnState::Established),
            outgoing_tx,
            outgoing_rx,
            close_tx,
            close_rx,
            shutdown_hook,
            registry,
            id_alloc,
            conn_waiters,
            corr_waiters,
            done_count: AtomicUsize::new(0),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        });

        let reader_conn = conn.clone();
        let reader_handle = std::thread::spawn(move || {
            loop {
                match reader_transport.recv_frame() {
                    Ok(frame) => on_frame(&reader_conn, frame),
                    Err(_) => break,
                }
            }
            reader_conn.thread_finished();
        });

        let writer_conn = conn.clone();
        let writer_handle = std::thread::spawn(move || {
            loop {
                select! {
                    recv(writer_conn.outgoing_rx) -> msg => match msg {
                        Ok(block) => {
                            if writer_transport.send_frame(&block.data).is_err() {
                                break;
                            }
                        }
                        Err(_) => break,
                    },
                    recv(writer_conn.close_rx) -> _ => break,
                }
            }
            writer_conn.thread_finished();
        });

        *conn.reader.lock().unwrap() = Some(reader_handle);
        *conn.writer.lock().unwrap() = Some(writer_handle);
        conn
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap()
    }

    /// Queue `block` for delivery to the peer. Rejected once the
    /// connection has started draining or closed.
    pub fn send(&self, block: Arc<DataBlock>) -> Result<()> {
        {
            let state = self.state.lock().unwrap();
            if *state != ConnState::Established {
                return Err(GatewayError::call(
                    ErrorCode::ConnClosed,
                    "connection is no longer established",
                ));
            }
        }
        self.outgoing_tx.send(block).map_err(|_| {
            GatewayError::call(ErrorCode::ConnClosed, "connection writer has exited")
        })
    }

    /// Request an orderly shutdown: unblocks the writer via the close
    /// channel and the reader via `shutdown_hook`. Idempotent.
    pub fn close(self: &Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if *state != ConnState::Established {
            return;
        }
        *state = ConnState::Draining;
        drop(state);

        (self.shutdown_hook)();
        let _ = self.close_tx.send(());
    }

    /// Join both worker threads. Intended for orderly shutdown and tests;
    /// the dispatch path never blocks on this.
    pub fn join(&self) {
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.writer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    fn thread_finished(self: Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == ConnState::Established {
                *state = ConnState::Draining;
            }
        }
        if self.done_count.fetch_add(1, Ordering::AcqRel) + 1 == 2 {
            self.finish_close();
        }
    }

    fn finish_close(self: &Arc<Self>) {
        *self.state.lock().unwrap() = ConnState::Closed;

        loop {
            match self.outgoing_rx.try_recv() {
                Ok(block) => {
                    let _ = block.reply_sender().send(BusReply::failure(
                        ErrorCode::ConnClosed,
                        "connection closed",
                        self.id_comp,
                    ));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        for block in self
            .corr_waiters
            .drain_matching(|_, block| block.net_conn_id == Some(self.id_comp))
        {
            let _ = block.reply_sender().send(BusReply::failure(
                ErrorCode::ConnClosed,
                "connection closed",
                self.id_comp,
            ));
        }

        if let Some(block) = self.conn_waiters.take(&self.id_comp) {
            let _ = block.reply_sender().send(BusReply::failure(
                ErrorCode::ConnClosed,
                "connection closed",
                self.id_comp,
            ));
        }

        self.registry.unregister(self);
        self.id_alloc.release(self.id);
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use crate::waiter::WaiterTable;
    use std::sync::Mutex as StdMutex;

    /// A `Connection` with no backing transport or threads, for exercising
    /// state-only consumers like `ConnRegistry`.
    pub fn test_connection(id: u32, id_comp: i64, state: ConnState) -> Arc<Connection> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let (close_tx, close_rx) = crossbeam_channel::bounded(1);
        Arc::new(Connection {
            id,
            id_stamp: 0,
            id_comp,
            state: StdMutex::new(state),
            outgoing_tx: tx,
            outgoing_rx: rx,
            close_tx,
            close_rx,
            shutdown_hook: Box::new(|| {}),
            registry: Arc::new(ConnRegistry::new()),
            id_alloc: Arc::new(IdAlloc::new(8)),
            conn_waiters: Arc::new(WaiterTable::default()),
            corr_waiters: Arc::new(WaiterTable::default()),
            done_count: AtomicUsize::new(0),
            reader: StdMutex::new(None),
            writer: StdMutex::new(None),
        })
    }
}
