//! Runnable TCP gateway binary (§6: "Environment: a process tag
//! identifies the configuration section to load"; "Exit codes: 0 on
//! clean shutdown; nonzero on init or fatal runtime failure").
//!
//! Loading real configuration from the bus registry and calling into a
//! real XATMI bus are both out of scope (§1): this binary wires the
//! dispatch core up to [`xatmi_tcpgw::net::TcpListener`] for the accept
//! loop and to [`xatmi_tcpgw::bus::mock::NullContext`] for the worker
//! pool, so it runs standalone for demonstration and integration testing.
//! A production deployment swaps in a real `BusContext`/`Dialer` and a
//! real config feed without touching the dispatch core itself.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};

use xatmi_tcpgw::bus::NullContext;
use xatmi_tcpgw::config::DispatchMode;
use xatmi_tcpgw::dispatcher::{reply_router, Dispatcher, NoCorrelation};
use xatmi_tcpgw::wire::LengthPrefixed;
use xatmi_tcpgw::{Connection, ConnRegistry, ConnWaiterTable, CorrWaiterTable, IdAlloc, WorkerPool};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9091";
const DEFAULT_MAX_CONNS: u32 = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

fn main() -> ExitCode {
    env_logger::init();

    let process_tag = std::env::var("NDRX_CCTAG").unwrap_or_else(|_| "default".to_string());
    info!("starting xatmi-tcpgw, config section [{process_tag}]");

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let addr: SocketAddr = std::env::var("TCPGW_LISTEN")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()
        .map_err(|e| format!("invalid TCPGW_LISTEN address: {e}"))?;

    let registry = Arc::new(ConnRegistry::new());
    let id_alloc = Arc::new(IdAlloc::new(DEFAULT_MAX_CONNS));
    let corr_waiters = Arc::new(CorrWaiterTable::default());
    let conn_waiters = Arc::new(ConnWaiterTable::default());
    let codec = Arc::new(NoCorrelation);

    let dispatcher = Arc::new(Dispatcher::new(
        DispatchMode::AsyncCorr,
        DEFAULT_TIMEOUT,
        registry.clone(),
        id_alloc.clone(),
        corr_waiters.clone(),
        conn_waiters.clone(),
        codec.clone(),
    ));

    let inbound_pool = Arc::new(WorkerPool::new(
        (0..4).map(|_| NullContext::default()).collect(),
    ));

    let listener =
        std::net::TcpListener::bind(addr).map_err(|e| format!("failed to bind {addr}: {e}"))?;
    info!("accepting peer connections on {addr}");

    loop {
        let (stream, peer_addr) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        info!("accepted connection from {peer_addr}");

        let (id, id_stamp, id_comp) = match id_alloc.new_connection_id() {
            Some(ids) => ids,
            None => {
                error!("connection id space exhausted, dropping {peer_addr}");
                continue;
            }
        };

        let shutdown_stream = stream
            .try_clone()
            .map_err(|e| format!("failed to clone accepted stream: {e}"))?;
        let reader = Box::new(LengthPrefixed::new(
            stream
                .try_clone()
                .map_err(|e| format!("failed to clone accepted stream: {e}"))?,
        ));
        let writer = Box::new(LengthPrefixed::new(stream));

        let conn = Connection::spawn(
            id,
            id_stamp,
            id_comp,
            reader,
            writer,
            registry.clone(),
            id_alloc.clone(),
            conn_waiters.clone(),
            corr_waiters.clone(),
            Box::new(move || {
                let _ = shutdown_stream.shutdown(std::net::Shutdown::Both);
            }),
            reply_router(corr_waiters.clone(), conn_waiters.clone(), codec.clone()),
        );
        registry.register(conn);

        // Workers pull bus calls off the inbound pool in a real
        // deployment; this demonstration binary only exercises the
        // accept side of the dispatch core.
        let _ = (&dispatcher, &inbound_pool);
    }
}
