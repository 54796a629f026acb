//! HTTP listener wiring workers to the [`ServiceRouter`] (§4.7 expansion).
//!
//! Built on `tiny_http` rather than a hand-rolled mio/rustls-driven
//! HTTP/1.1 parser: no TLS is in scope here, and dispatch is a blocking
//! worker pool, not a poll loop, so `tiny_http`'s blocking, synchronous
//! model is the better fit (see `DESIGN.md`).

use std::io::Read;
use std::sync::Arc;

use log::{error, warn};
use tiny_http::{Response, Server};

use super::router::{format_response, HttpBusContext, ServiceRouter};
use crate::pool::WorkerPool;

/// Maximum request body size accepted, guarding against an unbounded
/// `Content-Length` exhausting memory.
const MAX_BODY_LEN: u64 = 16 * 1024 * 1024;

/// Accepts HTTP connections on a bound `tiny_http::Server`, routes each
/// request by URL path, and dispatches through a [`WorkerPool`] of
/// [`HttpBusContext`]s (§4.7: "Dispatch: incoming request URL path →
/// service descriptor → acquire a worker slot → call bus service →
/// format response per descriptor's error policy").
pub struct HttpServer {
    server: Server,
    router: Arc<ServiceRouter>,
    pool: Arc<WorkerPool<Box<dyn HttpBusContext>>>,
}

impl HttpServer {
    /// Bind a listener on `addr` (e.g. `"0.0.0.0:8080"`).
    pub fn bind(
        addr: &str,
        router: Arc<ServiceRouter>,
        pool: Arc<WorkerPool<Box<dyn HttpBusContext>>>,
    ) -> Result<Self, String> {
        let server = Server::http(addr).map_err(|e| e.to_string())?;
        Ok(HttpServer {
            server,
            router,
            pool,
        })
    }

    /// Serve requests until the underlying socket is closed. Blocks the
    /// calling thread; each request is handled synchronously to
    /// completion before the next `accept`, with concurrency coming from
    /// the worker pool's bounded free-slot channel rather than from
    /// overlapping accepts.
    pub fn run(&self) {
        loop {
            match self.server.recv() {
                Ok(request) => self.handle(request),
                Err(e) => {
                    error!("http listener accept failed, stopping: {e}");
                    return;
                }
            }
        }
    }

    fn handle(&self, mut request: tiny_http::Request) {
        let path = request.url().to_string();
        let descriptor = match self.router.route(&path) {
            Some(descriptor) => descriptor.clone(),
            None => {
                let _ = request.respond(Response::from_string("not found").with_status_code(404));
                return;
            }
        };

        let body = match read_bounded_body(&mut request, MAX_BODY_LEN) {
            Ok(body) => body,
            Err(e) => {
                warn!("rejecting request to {path}: {e}");
                let _ = request.respond(Response::from_string(e).with_status_code(413));
                return;
            }
        };

        let reply = self
            .pool
            .run(|ctx| ctx.call_service(&descriptor, body));

        let rendered = match reply {
            Some(reply) => format_response(&descriptor, &reply),
            None => {
                // Worker panicked; the pool already logged and recovered
                // the slot (§7). The caller still needs exactly one
                // reply.
                super::router::RenderedResponse {
                    status: 500,
                    body: b"internal error".to_vec(),
                    content_type: "text/plain",
                }
            }
        };

        let response = Response::from_data(rendered.body)
            .with_status_code(rendered.status)
            .with_header(
                tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    rendered.content_type.as_bytes(),
                )
                .expect("static header name/value are always valid"),
            );
        let _ = request.respond(response);
    }
}

fn read_bounded_body(request: &mut tiny_http::Request, max_len: u64) -> Result<Vec<u8>, String> {
    if let Some(len) = request.body_length() {
        if len as u64 > max_len {
            return Err(format!("request body of {len} bytes exceeds maximum {max_len}"));
        }
    }
    let mut body = Vec::new();
    request
        .as_reader()
        .take(max_len + 1)
        .read_to_end(&mut body)
        .map_err(|e| format!("failed to read request body: {e}"))?;
    if body.len() as u64 > max_len {
        return Err(format!("request body exceeds maximum {max_len} bytes"));
    }
    Ok(body)
}
