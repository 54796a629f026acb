//! Dispatcher (§4.5): the four request/reply disciplines `ASYNC_CORR`,
//! `SYNC_CONN`, `NONPERS`, and `FIRE_FORGET`.
//!
//! Every call comes in through [`Dispatcher::handle_outbound_call`], run on
//! a worker borrowed from a [`crate::pool::WorkerPool`]. The worker itself
//! is responsible for acquiring/releasing its slot (§4.4); this module only
//! ever sees one call at a time per invocation and returns exactly one
//! [`BusReply`].

use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::block::DataBlock;
use crate::bus::{BusReply, TypedRecord};
use crate::config::DispatchMode;
use crate::connection::Connection;
use crate::error::ErrorCode;
use crate::id_alloc::IdAlloc;
use crate::registry::ConnRegistry;
use crate::waiter::{ConnWaiterTable, CorrWaiterTable};
use crate::wire::FrameTransport;

/// What a fresh `NONPERS` dial produced: the two transport halves
/// `Connection::spawn` expects, plus a hook to unblock its reader.
pub struct DialedTransport {
    pub reader: Box<dyn FrameTransport>,
    pub writer: Box<dyn FrameTransport>,
    pub shutdown_hook: Box<dyn Fn() + Send + Sync>,
}

/// Opens one dedicated connection per `NONPERS` call. A production
/// embedder implements this over `std::net::TcpStream::connect`; tests
/// substitute an in-memory pair (§4.5: "construct a new Connection ...
/// start its dial+IO goroutines").
///
/// The richer Go original models the dial as happening on its own
/// goroutine, with the calling goroutine blocking on the same
/// `atmi_chan` the reply would arrive on. Since a `NONPERS` call already
/// owns a dedicated worker thread for the duration of the call, this
/// crate dials synchronously on that thread instead of introducing a
/// separate `Dialing` state machine -- the caller blocks either way, and
/// this avoids a third thread per call for no behavioural difference.
/// Recorded in `DESIGN.md`.
pub trait Dialer: Send + Sync {
    /// Open a new connection to this dialer's configured peer.
    fn dial(&self) -> io::Result<DialedTransport>;
}

/// Extracts a correlator (and the payload to deliver as the reply) from
/// one inbound frame, if the frame carries one. The binary framing codec
/// itself is out of scope (§1); this is the narrow seam a production
/// embedder fills in to tell the correlator table from the connection
/// table apart on reply (§4.3 policy).
pub trait CorrelationCodec: Send + Sync {
    /// Split `frame` into `(correlator, reply payload)` if it carries a
    /// correlator, or return `None` to route by connection id instead.
    fn extract(&self, frame: &[u8]) -> Option<(String, Vec<u8>)>;
}

/// A codec that never finds a correlator; every reply routes by
/// connection id. Suitable for `SYNC_CONN`/`NONPERS`, where at most one
/// request is ever in flight per connection and no correlator is needed.
#[derive(Debug, Default)]
pub struct NoCorrelation;

impl CorrelationCodec for NoCorrelation {
    fn extract(&self, _frame: &[u8]) -> Option<(String, Vec<u8>)> {
        None
    }
}

/// Builds the `on_frame` callback `Connection::spawn` drives on its
/// reader thread: consult the correlator table first if the frame
/// carries one, else fall back to the connection table keyed by this
/// connection's composite id (§4.3). Unmatched frames are logged and
/// dropped (the "unsolicited handler" is out of scope, §4.3).
pub fn reply_router(
    corr_waiters: Arc<CorrWaiterTable>,
    conn_waiters: Arc<ConnWaiterTable>,
    codec: Arc<dyn CorrelationCodec>,
) -> impl Fn(&Connection, Vec<u8>) + Send + Sync + 'static {
    move |conn: &Connection, frame: Vec<u8>| {
        let waiter = match codec.extract(&frame) {
            Some((corr, payload)) => corr_waiters.take(&corr).map(|b| (b, payload)),
            None => conn_waiters
                .take(&conn.id_comp)
                .map(|b| (b, frame.clone())),
        };

        match waiter {
            Some((block, payload)) => {
                let _ = block.reply_sender().send(BusReply::Success {
                    data: payload,
                    net_conn_id: Some(conn.id_comp),
                });
            }
            None => warn!(
                "unsolicited frame on connection {} dropped ({} bytes)",
                conn.id_comp,
                frame.len()
            ),
        }
    }
}

/// Implements the four dispatch modes of §4.5 over a shared connection
/// registry and waiter tables.
pub struct Dispatcher {
    mode: DispatchMode,
    timeout: Duration,
    registry: Arc<ConnRegistry>,
    id_alloc: Arc<IdAlloc>,
    corr_waiters: Arc<CorrWaiterTable>,
    conn_waiters: Arc<ConnWaiterTable>,
    codec: Arc<dyn CorrelationCodec>,
    dialer: Option<Arc<dyn Dialer>>,
}

impl Dispatcher {
    /// Build a dispatcher for persistent modes (`ASYNC_CORR`/`SYNC_CONN`/
    /// `FIRE_FORGET`), which never dial their own connections.
    pub fn new(
        mode: DispatchMode,
        timeout: Duration,
        registry: Arc<ConnRegistry>,
        id_alloc: Arc<IdAlloc>,
        corr_waiters: Arc<CorrWaiterTable>,
        conn_waiters: Arc<ConnWaiterTable>,
        codec: Arc<dyn CorrelationCodec>,
    ) -> Self {
        Dispatcher {
            mode,
            timeout,
            registry,
            id_alloc,
            corr_waiters,
            conn_waiters,
            codec,
            dialer: None,
        }
    }

    /// Attach a [`Dialer`], required for `NONPERS` mode.
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// The `on_frame` callback any persistent connection registered with
    /// this dispatcher's tables should be spawned with.
    pub fn on_frame(&self) -> impl Fn(&Connection, Vec<u8>) + Send + Sync + 'static {
        reply_router(
            self.corr_waiters.clone(),
            self.conn_waiters.clone(),
            self.codec.clone(),
        )
    }

    /// Entry point: dispatch one bus call (§4.5 preamble + per-mode
    /// behaviour). Always returns exactly one reply.
    pub fn handle_outbound_call(&self, record: TypedRecord) -> BusReply {
        let data = match record.net_data {
            Some(data) => data,
            None => {
                return BusReply::failure(
                    ErrorCode::Mandatory,
                    "mandatory field EX_NETDATA missing",
                    0,
                )
            }
        };

        let corr = record.net_corr.filter(|c| !c.is_empty());

        match self.mode {
            DispatchMode::AsyncCorr => self.dispatch_async_corr(record.net_conn_id, corr, data),
            DispatchMode::SyncConn => self.dispatch_sync_conn(record.net_conn_id, corr, data),
            DispatchMode::NonPers => self.dispatch_nonpers(corr, data),
            DispatchMode::FireForget => self.dispatch_fire_forget(record.net_conn_id, data),
        }
    }

    fn select_connection(&self, connid: i64) -> Option<Arc<Connection>> {
        if connid > 0 {
            self.registry.get_by_composite_id(connid)
        } else {
            self.registry.pick_any()
        }
    }

    fn dispatch_async_corr(&self, connid: i64, corr: Option<String>, data: Vec<u8>) -> BusReply {
        if self.registry.open_count() == 0 {
            return BusReply::failure(ErrorCode::NoConn, "no open connections available", 0);
        }

        let conn = match self.select_connection(connid) {
            Some(conn) => conn,
            None => {
                return BusReply::failure(ErrorCode::NoConn, "no open connections available", 0)
            }
        };

        let mut block = DataBlock::new(data, corr.clone(), connid);
        // Recorded against the connection actually carrying this request,
        // so a close fan-out can find it in the correlator table by
        // connection id even though that table's keys are correlators
        // (§4.3, `Connection::finish_close`).
        block.net_conn_id = Some(conn.id_comp);
        let block = Arc::new(block);

        if let Some(corr) = &corr {
            info!("adding request to corr table, by correlator: [{corr}]");
            self.corr_waiters.insert(corr.clone(), block.clone());
        }

        let send_result = conn.send(block.clone());
        if let Err(err) = &send_result {
            if let Some(corr) = &corr {
                self.corr_waiters.remove(corr);
            }
            let _ = block.reply_sender().send(BusReply::failure(
                err.error_code(),
                "send failed: connection is no longer established",
                conn.id_comp,
            ));
        }

        match corr {
            Some(corr) => {
                let reply = self.await_reply(&block, self.timeout);
                self.corr_waiters.remove(&corr);
                reply
            }
            // send-and-forget within a persistent connection (§4.5 step 6):
            // success unless the send itself failed, in which case that
            // failure must still surface to the bus caller (§4.5 tie-break).
            None => match send_result {
                Ok(()) => BusReply::Success {
                    data: Vec::new(),
                    net_conn_id: Some(conn.id_comp),
                },
                Err(err) => BusReply::failure(
                    err.error_code(),
                    "send failed: connection is no longer established",
                    conn.id_comp,
                ),
            },
        }
    }

    fn dispatch_sync_conn(&self, connid: i64, corr: Option<String>, data: Vec<u8>) -> BusReply {
        if self.registry.open_count() == 0 {
            return BusReply::failure(ErrorCode::NoConn, "no open connections available", 0);
        }

        let conn = match self.select_connection(connid) {
            Some(conn) => conn,
            None => {
                return BusReply::failure(ErrorCode::NoConn, "no open connections available", 0)
            }
        };

        let block = Arc::new(DataBlock::new(data, corr, connid));

        if self
            .conn_waiters
            .insert_if_absent(conn.id_comp, block.clone())
            .is_err()
        {
            return BusReply::failure(
                ErrorCode::Busy,
                "connection already has an in-flight request",
                conn.id_comp,
            );
        }

        if let Err(err) = conn.send(block.clone()) {
            self.conn_waiters.remove(&conn.id_comp);
            let _ = block.reply_sender().send(BusReply::failure(
                err.error_code(),
                "send failed: connection is no longer established",
                conn.id_comp,
            ));
        }

        let reply = self.await_reply(&block, self.timeout);
        self.conn_waiters.remove(&conn.id_comp);
        reply
    }

    fn dispatch_nonpers(&self, corr: Option<String>, data: Vec<u8>) -> BusReply {
        let dialer = match &self.dialer {
            Some(dialer) => dialer,
            None => return BusReply::failure(ErrorCode::System, "NONPERS dialer not configured", 0),
        };

        let (id, id_stamp, id_comp) = match self.id_alloc.new_connection_id() {
            Some(ids) => ids,
            None => {
                return BusReply::failure(ErrorCode::NoConn, "connection id space exhausted", 0)
            }
        };

        let transport = match dialer.dial() {
            Ok(transport) => transport,
            Err(e) => {
                self.id_alloc.release(id);
                return BusReply::failure(ErrorCode::NoConn, format!("dial failed: {e}"), 0);
            }
        };

        let block = Arc::new(DataBlock::new(data, corr, 0));
        // Register the waiter before the connection can see any traffic,
        // so a reply racing the rest of this setup still has somewhere to
        // land.
        let _ = self.conn_waiters.insert_if_absent(id_comp, block.clone());

        let conn = Connection::spawn(
            id,
            id_stamp,
            id_comp,
            transport.reader,
            transport.writer,
            self.registry.clone(),
            self.id_alloc.clone(),
            self.conn_waiters.clone(),
            self.corr_waiters.clone(),
            transport.shutdown_hook,
            self.on_frame(),
        );
        self.registry.register(conn.clone());

        if let Err(err) = conn.send(block.clone()) {
            self.conn_waiters.remove(&id_comp);
            let _ = block.reply_sender().send(BusReply::failure(
                err.error_code(),
                "send failed: connection is no longer established",
                id_comp,
            ));
        }

        let reply = self.await_reply(&block, self.timeout);
        self.conn_waiters.remove(&id_comp);
        // One call, one connection: tear it down once the reply (or
        // failure) has been delivered (§4.5 NONPERS step 4).
        conn.close();
        reply
    }

    fn dispatch_fire_forget(&self, connid: i64, data: Vec<u8>) -> BusReply {
        let conn = match self.select_connection(connid) {
            Some(conn) => conn,
            None => {
                return BusReply::failure(ErrorCode::NoConn, "no open connections available", 0)
            }
        };

        let block = Arc::new(DataBlock::new(data, None, connid));
        match conn.send(block) {
            Ok(()) => BusReply::Success {
                data: Vec::new(),
                net_conn_id: Some(conn.id_comp),
            },
            Err(err) => BusReply::failure(
                err.error_code(),
                "send failed: connection is no longer established",
                conn.id_comp,
            ),
        }
    }

    /// Block on `block`'s reply slot until a reply arrives or `timeout`
    /// elapses. On timeout, the caller is still responsible for removing
    /// the waiter from whichever table it is in -- removal here is always
    /// idempotent, so callers do it unconditionally after this returns.
    fn await_reply(&self, block: &DataBlock, timeout: Duration) -> BusReply {
        match block.wait(timeout) {
            Ok(reply) => reply,
            Err(_) => BusReply::failure(ErrorCode::Timeout, "reply not received in time", 0),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id_alloc::IdAlloc;
    use crate::net::mock;
    use crate::net::TcpStream as _;
    use crate::wire::LengthPrefixed;
    use std::sync::Mutex;
    use std::time::Duration;

    fn harness() -> (
        Arc<ConnRegistry>,
        Arc<IdAlloc>,
        Arc<CorrWaiterTable>,
        Arc<ConnWaiterTable>,
    ) {
        (
            Arc::new(ConnRegistry::new()),
            Arc::new(IdAlloc::new(8)),
            Arc::new(CorrWaiterTable::default()),
            Arc::new(ConnWaiterTable::default()),
        )
    }

    struct EchoingCorrelationCodec;

    impl CorrelationCodec for EchoingCorrelationCodec {
        fn extract(&self, frame: &[u8]) -> Option<(String, Vec<u8>)> {
            // Test-only convention: frames are `<corr>|<raw payload
            // bytes>`; only the correlator prefix need be valid UTF-8.
            let pos = frame.iter().position(|&b| b == b'|')?;
            let corr = std::str::from_utf8(&frame[..pos]).ok()?.to_string();
            Some((corr, frame[pos + 1..].to_vec()))
        }
    }

    fn spawn_persistent(
        registry: &Arc<ConnRegistry>,
        id_alloc: &Arc<IdAlloc>,
        corr_waiters: &Arc<CorrWaiterTable>,
        conn_waiters: &Arc<ConnWaiterTable>,
        codec: Arc<dyn CorrelationCodec>,
    ) -> LengthPrefixed<mock::DuplexStream> {
        let (conn_side, peer_side) = mock::pair(
            "127.0.0.1:1".parse().unwrap(),
            "127.0.0.1:2".parse().unwrap(),
        );
        let shutdown_stream = conn_side.try_clone().unwrap();

        let (id, id_stamp, id_comp) = id_alloc.new_connection_id().unwrap();
        let conn = Connection::spawn(
            id,
            id_stamp,
            id_comp,
            Box::new(LengthPrefixed::new(conn_side.try_clone().unwrap())),
            Box::new(LengthPrefixed::new(conn_side)),
            registry.clone(),
            id_alloc.clone(),
            conn_waiters.clone(),
            corr_waiters.clone(),
            Box::new(move || {
                let _ = shutdown_stream.shutdown(std::net::Shutdown::Both);
            }),
            reply_router(corr_waiters.clone(), conn_waiters.clone(), codec),
        );
        registry.register(conn);

        LengthPrefixed::new(peer_side)
    }

    #[test]
    fn async_corr_happy_path_matches_by_correlator() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let mut peer = spawn_persistent(
            &registry,
            &id_alloc,
            &corr_waiters,
            &conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        );

        let dispatcher = Dispatcher::new(
            DispatchMode::AsyncCorr,
            Duration::from_secs(1),
            registry,
            id_alloc,
            corr_waiters,
            conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        );

        let handle = std::thread::spawn({
            let dispatcher = Arc::new(dispatcher);
            let d2 = dispatcher.clone();
            move || {
                d2.handle_outbound_call(TypedRecord {
                    net_conn_id: 0,
                    net_corr: Some("A".into()),
                    net_data: Some(vec![0x01]),
                })
            }
        });

        // Wait for the request frame, then inject the peer's reply.
        let _request = peer.recv_frame().unwrap();
        peer.send_frame(b"A|\xAA").unwrap();

        match handle.join().unwrap() {
            BusReply::Success { data, .. } => assert_eq!(data, vec![0xAA]),
            BusReply::Failure { code, message, .. } => {
                panic!("expected success, got {code}: {message}")
            }
        }
    }

    #[test]
    fn async_corr_no_conn_when_registry_empty() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let dispatcher = Dispatcher::new(
            DispatchMode::AsyncCorr,
            Duration::from_millis(50),
            registry,
            id_alloc,
            corr_waiters,
            conn_waiters,
            Arc::new(NoCorrelation),
        );

        let reply = dispatcher.handle_outbound_call(TypedRecord {
            net_conn_id: 0,
            net_corr: None,
            net_data: Some(vec![0x01]),
        });

        match reply {
            BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::NoConn),
            BusReply::Success { .. } => panic!("expected NO_CONN"),
        }
    }

    #[test]
    fn preamble_rejects_missing_data() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let dispatcher = Dispatcher::new(
            DispatchMode::FireForget,
            Duration::from_millis(50),
            registry,
            id_alloc,
            corr_waiters,
            conn_waiters,
            Arc::new(NoCorrelation),
        );

        let reply = dispatcher.handle_outbound_call(TypedRecord {
            net_conn_id: 0,
            net_corr: None,
            net_data: None,
        });

        match reply {
            BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::Mandatory),
            BusReply::Success { .. } => panic!("expected MANDATORY"),
        }
    }

    #[test]
    fn sync_conn_busy_does_not_disturb_first_waiter() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let _peer = spawn_persistent(
            &registry,
            &id_alloc,
            &corr_waiters,
            &conn_waiters,
            Arc::new(NoCorrelation),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            DispatchMode::SyncConn,
            Duration::from_millis(200),
            registry.clone(),
            id_alloc,
            corr_waiters,
            conn_waiters.clone(),
            Arc::new(NoCorrelation),
        ));

        let d1 = dispatcher.clone();
        let first = std::thread::spawn(move || {
            d1.handle_outbound_call(TypedRecord {
                net_conn_id: 0,
                net_corr: None,
                net_data: Some(vec![1]),
            })
        });

        // Give the first call time to register its waiter.
        std::thread::sleep(Duration::from_millis(30));

        let conn = registry.pick_any().unwrap();
        let second = dispatcher.handle_outbound_call(TypedRecord {
            net_conn_id: conn.id_comp,
            net_corr: None,
            net_data: Some(vec![2]),
        });

        match second {
            BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::Busy),
            BusReply::Success { .. } => panic!("expected BUSY"),
        }

        // Let the first call time out so the thread can finish.
        let first_reply = first.join().unwrap();
        match first_reply {
            BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::Timeout),
            BusReply::Success { .. } => panic!("expected TIMEOUT on the first call"),
        }
    }

    struct MockDialer {
        peer: Mutex<Option<LengthPrefixed<mock::DuplexStream>>>,
    }

    impl Dialer for MockDialer {
        fn dial(&self) -> io::Result<DialedTransport> {
            let (conn_side, peer_side) = mock::pair(
                "127.0.0.1:1".parse().unwrap(),
                "127.0.0.1:2".parse().unwrap(),
            );
            let shutdown_stream = conn_side.try_clone().unwrap();
            *self.peer.lock().unwrap() = Some(LengthPrefixed::new(peer_side));
            Ok(DialedTransport {
                reader: Box::new(LengthPrefixed::new(conn_side.try_clone().unwrap())),
                writer: Box::new(LengthPrefixed::new(conn_side)),
                shutdown_hook: Box::new(move || {
                    let _ = shutdown_stream.shutdown(std::net::Shutdown::Both);
                }),
            })
        }
    }

    #[test]
    fn nonpers_happy_path_dials_sends_and_tears_down() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let dialer = Arc::new(MockDialer {
            peer: Mutex::new(None),
        });

        let dispatcher = Arc::new(
            Dispatcher::new(
                DispatchMode::NonPers,
                Duration::from_secs(1),
                registry.clone(),
                id_alloc,
                corr_waiters,
                conn_waiters,
                Arc::new(NoCorrelation),
            )
            .with_dialer(dialer.clone()),
        );

        let d2 = dispatcher.clone();
        let handle = std::thread::spawn(move || {
            d2.handle_outbound_call(TypedRecord {
                net_conn_id: 0,
                net_corr: None,
                net_data: Some(vec![0x02]),
            })
        });

        // Wait for the dial to land and the request frame to arrive, then
        // echo it straight back (§8 scenario 4: "peer echoes back").
        let mut peer = loop {
            if let Some(p) = dialer.peer.lock().unwrap().take() {
                break p;
            }
            std::thread::sleep(Duration::from_millis(5));
        };
        let request = peer.recv_frame().unwrap();
        assert_eq!(request, vec![0x02]);
        peer.send_frame(&request).unwrap();

        match handle.join().unwrap() {
            BusReply::Success { data, .. } => assert_eq!(data, vec![0x02]),
            BusReply::Failure { code, message, .. } => {
                panic!("expected success, got {code}: {message}")
            }
        }

        // The dedicated connection is torn down once its one call
        // completes; open count returns to 0 within grace (§8 scenario 4).
        for _ in 0..100 {
            if registry.open_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn close_during_wait_delivers_conn_closed_to_every_waiter() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let _peer = spawn_persistent(
            &registry,
            &id_alloc,
            &corr_waiters,
            &conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        );

        let dispatcher = Arc::new(Dispatcher::new(
            DispatchMode::AsyncCorr,
            Duration::from_secs(5),
            registry.clone(),
            id_alloc,
            corr_waiters,
            conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        ));

        let handles: Vec<_> = ["A", "B", "C"]
            .iter()
            .map(|corr| {
                let d = dispatcher.clone();
                let corr = corr.to_string();
                std::thread::spawn(move || {
                    d.handle_outbound_call(TypedRecord {
                        net_conn_id: 0,
                        net_corr: Some(corr),
                        net_data: Some(vec![0x01]),
                    })
                })
            })
            .collect();

        // Give all three calls time to register their waiters, then close
        // the only connection (§8 scenario 5: "connection closes with 3
        // waiters registered").
        std::thread::sleep(Duration::from_millis(30));
        let conn = registry.pick_any().unwrap();
        conn.close();
        conn.join();

        for handle in handles {
            match handle.join().unwrap() {
                BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::ConnClosed),
                BusReply::Success { .. } => panic!("expected CONN_CLOSED for every waiter"),
            }
        }
        assert_eq!(registry.open_count(), 0);
    }

    #[test]
    fn timeout_then_late_reply_is_dropped_without_a_second_delivery() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let mut peer = spawn_persistent(
            &registry,
            &id_alloc,
            &corr_waiters,
            &conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        );

        let dispatcher = Dispatcher::new(
            DispatchMode::AsyncCorr,
            Duration::from_millis(100),
            registry,
            id_alloc,
            corr_waiters.clone(),
            conn_waiters,
            Arc::new(EchoingCorrelationCodec),
        );

        let reply = dispatcher.handle_outbound_call(TypedRecord {
            net_conn_id: 0,
            net_corr: Some("A".into()),
            net_data: Some(vec![0x01]),
        });
        match reply {
            BusReply::Failure { code, .. } => assert_eq!(code, ErrorCode::Timeout),
            BusReply::Success { .. } => panic!("expected TIMEOUT"),
        }
        assert!(!corr_waiters.contains(&"A".to_string()));

        // A late frame with the same correlator arrives after cleanup; it
        // finds no waiter and is dropped, not delivered as a second reply
        // (§8 scenario 6).
        let _request = peer.recv_frame().unwrap();
        peer.send_frame(b"A|\xFF").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!corr_waiters.contains(&"A".to_string()));
    }

    #[test]
    fn fire_forget_returns_success_without_a_waiter() {
        let (registry, id_alloc, corr_waiters, conn_waiters) = harness();
        let mut peer = spawn_persistent(
            &registry,
            &id_alloc,
            &corr_waiters,
            &conn_waiters,
            Arc::new(NoCorrelation),
        );

        let dispatcher = Dispatcher::new(
            DispatchMode::FireForget,
            Duration::from_millis(50),
            registry,
            id_alloc,
            corr_waiters,
            conn_waiters,
            Arc::new(NoCorrelation),
        );

        let reply = dispatcher.handle_outbound_call(TypedRecord {
            net_conn_id: 0,
            net_corr: None,
            net_data: Some(vec![9]),
        });
        assert!(matches!(reply, BusReply::Success { .. }));
        assert_eq!(peer.recv_frame().unwrap(), vec![9]);
    }
}
