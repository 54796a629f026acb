//! Config (§4.8) and ServiceRouter normalisation (§4.7).
//!
//! The real configuration feed is the bus registry (out of scope, §1): a
//! structured key/value stream. This module models that as a
//! `serde_json::Value` per key (§4.8's "JSON object populating the
//! default ServiceDescriptor" is, concretely, JSON over the wire) and
//! normalises it into typed descriptors.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{GatewayError, Result};

/// One of the four request/reply disciplines of §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Persistent connection pool, replies matched by correlator.
    AsyncCorr,
    /// Persistent connection pool, strictly one in-flight call per
    /// connection.
    SyncConn,
    /// One dedicated connection dialed per call.
    NonPers,
    /// Send onto a persistent connection without waiting for a reply.
    FireForget,
}

/// How a service's errors are rendered back to the HTTP caller (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// HTTP status reflects the mapped error; body is the bus response
    /// verbatim.
    Http = 1,
    /// Body is `Errfmt_text` with `(code, message)` substituted.
    Text = 2,
    /// Response JSON is augmented with the configured message/code
    /// fields.
    Json = 3,
    /// Bus payload is converted between typed record and JSON.
    Json2Ubf = 4,
}

impl ErrorMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(ErrorMode::Http),
            "text" => Ok(ErrorMode::Text),
            "json" => Ok(ErrorMode::Json),
            "json2ubf" => Ok(ErrorMode::Json2Ubf),
            other => Err(GatewayError::Config(format!(
                "unsupported error mode [{other}]"
            ))),
        }
    }
}

/// Raw, wire-shaped service fields as they arrive from the config feed,
/// before normalisation. Every field is optional so a service definition
/// can omit anything it wants inherited from `defaults` (§4.8: "a service
/// that omits fields, the resulting descriptor equals defaults overlaid
/// with the service's explicit fields").
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawServiceDescriptor {
    pub urlbase: Option<String>,
    pub url: Option<String>,
    pub timeout: Option<u64>,
    pub errors: Option<String>,
    pub errfmt_text: Option<String>,
    pub errfmt_json_msg: Option<String>,
    pub errfmt_json_code: Option<String>,
    pub errfmt_json_onsucc: Option<bool>,
    pub errors_fmt_http_map: Option<String>,
    pub echo: Option<bool>,
    pub echo_time: Option<u32>,
    pub echo_max_fail: Option<u32>,
    pub echo_min_ok: Option<u32>,
    pub depends_on: Option<String>,
}

/// A fully normalised service entry (§3 data model / §4.7).
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub url: String,
    pub timeout_secs: u64,
    pub errors: ErrorMode,
    pub errfmt_text: String,
    pub errfmt_json_msg: String,
    pub errfmt_json_code: String,
    pub errfmt_json_onsucc: bool,
    /// Parsed `<atmi code>: <http code>` map; `"*"` is the wildcard key.
    pub errors_fmt_http_map: HashMap<String, i32>,
    pub echo: bool,
    pub echo_time_secs: u32,
    pub echo_max_fail: u32,
    pub echo_min_ok: u32,
    pub depends_on: Option<String>,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        ServiceDescriptor {
            name: String::new(),
            url: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            errors: ErrorMode::Json2Ubf,
            errfmt_text: DEFAULT_ERRFMT_TEXT.to_string(),
            errfmt_json_msg: DEFAULT_ERRFMT_JSON_MSG.to_string(),
            errfmt_json_code: DEFAULT_ERRFMT_JSON_CODE.to_string(),
            errfmt_json_onsucc: true,
            errors_fmt_http_map: HashMap::new(),
            echo: false,
            echo_time_secs: 0,
            echo_max_fail: 0,
            echo_min_ok: 0,
            depends_on: None,
        }
    }
}

/// §4.8 defaults.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_WORKERS: usize = 10;
const DEFAULT_ERRFMT_TEXT: &str = "%d: %s";
const DEFAULT_ERRFMT_JSON_MSG: &str = "\"error_message\":\"%s\"";
const DEFAULT_ERRFMT_JSON_CODE: &str = "\"error_code\":%d";

impl ServiceDescriptor {
    /// Overlay `raw`'s explicit fields onto `self` (normally `defaults`),
    /// keeping every field `raw` leaves unset. `name` identifies the
    /// service for logging and URL-base rewriting; `url_base` is the
    /// defaults' (or this overlay's own) `UrlBase` (§4.7: "a service
    /// whose URL starts with `/` is rewritten to `UrlBase + URL`").
    pub fn overlay(&self, name: &str, raw: &RawServiceDescriptor, url_base: &str) -> Result<Self> {
        let mut out = self.clone();
        out.name = name.to_string();

        if let Some(url) = &raw.url {
            out.url = if let Some(rest) = url.strip_prefix('/') {
                format!("{url_base}/{rest}")
            } else {
                url.clone()
            };
        }
        if let Some(timeout) = raw.timeout {
            out.timeout_secs = timeout;
        }
        if let Some(errors) = &raw.errors {
            out.errors = ErrorMode::parse(errors)?;
        }
        if let Some(text) = &raw.errfmt_text {
            out.errfmt_text = text.clone();
        }
        if let Some(msg) = &raw.errfmt_json_msg {
            out.errfmt_json_msg = msg.clone();
        }
        if let Some(code) = &raw.errfmt_json_code {
            out.errfmt_json_code = code.clone();
        }
        if let Some(onsucc) = raw.errfmt_json_onsucc {
            out.errfmt_json_onsucc = onsucc;
        }
        if let Some(map_str) = &raw.errors_fmt_http_map {
            out.errors_fmt_http_map = parse_http_error_map(map_str)?;
        }
        if let Some(echo) = raw.echo {
            out.echo = echo;
        }
        if let Some(t) = raw.echo_time {
            out.echo_time_secs = t;
        }
        if let Some(f) = raw.echo_max_fail {
            out.echo_max_fail = f;
        }
        if let Some(ok) = raw.echo_min_ok {
            out.echo_min_ok = ok;
        }
        if let Some(dep) = &raw.depends_on {
            out.depends_on = Some(dep.clone());
        }

        Ok(out)
    }

    /// Whether this service should be advertised to the bus, given it has
    /// succeeded its echo probe `consecutive_oks` times in a row (§4.8,
    /// §9 open question: "advertise if and only if the service is not
    /// dependent AND its echo probe, if configured, has succeeded
    /// `EchoMinOK` times consecutively").
    pub fn should_advertise(&self, consecutive_oks: u32) -> bool {
        if self.depends_on.is_some() {
            return false;
        }
        if !self.echo {
            return true;
        }
        consecutive_oks >= self.echo_min_ok
    }

    /// Map a bus error code onto an HTTP status per `errors_fmt_http_map`,
    /// falling back to the `"*"` wildcard entry, then to 500.
    pub fn http_status_for(&self, atmi_code: i32) -> i32 {
        self.errors_fmt_http_map
            .get(&atmi_code.to_string())
            .or_else(|| self.errors_fmt_http_map.get("*"))
            .copied()
            .unwrap_or(500)
    }
}

/// Parse `Errors_fmt_http_map_str`: `<key>:<num>,<key>:<num>,...`, `*`
/// meaning "any other" (§4.7). An entry with other than exactly one `:`
/// fails config load.
fn parse_http_error_map(raw: &str) -> Result<HashMap<String, i32>> {
    let mut map = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
        if parts.len() != 2 {
            return Err(GatewayError::Config(format!(
                "invalid http error pair [{entry}] parsed into {} elements",
                parts.len()
            )));
        }
        let code: i32 = parts[1].parse().map_err(|_| {
            GatewayError::Config(format!("failed to parse http error code {}", parts[1]))
        })?;
        map.insert(parts[0].to_string(), code);
    }
    Ok(map)
}

/// The top-level gateway configuration (§4.8).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub workers: usize,
    pub gencore: bool,
    pub mode: DispatchMode,
    pub max_conns: u32,
    pub defaults: ServiceDescriptor,
    pub services: HashMap<String, ServiceDescriptor>,
}

impl GatewayConfig {
    /// Build a config from the raw key/value entries the bus config
    /// service would hand over (§4.8 table): `workers`, `gencore`,
    /// `defaults`, and any number of `service <name>` entries.
    ///
    /// `mode` and `max_conns` are not part of the bus config feed's key
    /// table (they belong to the TCP dispatch core rather than the HTTP
    /// variant's service map) but are required to build a
    /// [`crate::dispatcher::Dispatcher`]; callers of the TCP variant supply
    /// them directly rather than through this feed.
    pub fn from_entries(
        entries: &[(String, serde_json::Value)],
        mode: DispatchMode,
        max_conns: u32,
    ) -> Result<Self> {
        let mut workers = DEFAULT_WORKERS;
        let mut gencore = false;
        let mut defaults = ServiceDescriptor::default();
        let mut raw_services: Vec<(String, RawServiceDescriptor)> = Vec::new();

        for (key, value) in entries {
            if key == "workers" {
                workers = value
                    .as_u64()
                    .ok_or_else(|| GatewayError::Config("workers must be an integer".into()))?
                    as usize;
                if workers == 0 {
                    return Err(GatewayError::Config("workers must be >= 1".into()));
                }
            } else if key == "gencore" {
                gencore = value.as_i64() == Some(1);
            } else if key == "defaults" {
                let raw: RawServiceDescriptor = serde_json::from_value(value.clone())
                    .map_err(|e| GatewayError::Config(format!("failed to parse defaults: {e}")))?;
                defaults = ServiceDescriptor::default().overlay("defaults", &raw, "")?;
            } else if let Some(name) = key.strip_prefix("service ") {
                let raw: RawServiceDescriptor = serde_json::from_value(value.clone())
                    .map_err(|e| {
                        GatewayError::Config(format!("failed to parse service {name}: {e}"))
                    })?;
                raw_services.push((name.to_string(), raw));
            }
        }

        let mut services = HashMap::new();
        for (name, raw) in &raw_services {
            let descriptor = defaults.overlay(name, raw, &defaults.url)?;
            services.insert(name.clone(), descriptor);
        }

        if gencore {
            restore_default_segv_handler();
        }

        Ok(GatewayConfig {
            workers,
            gencore,
            mode,
            max_conns,
            defaults,
            services,
        })
    }
}

/// Restore the OS default `SIGSEGV` handler so a crash produces a core
/// dump (§4.8: `gencore=1`, a literal translation of the original's
/// `C.signal(11, nil)`).
#[cfg(unix)]
fn restore_default_segv_handler() {
    // SAFETY: installing the default disposition for SIGSEGV is the
    // documented, signal-safe use of `signal(2)`; it replaces whatever
    // handler Rust's runtime installed with `SIG_DFL`, enabling a core
    // dump instead of a caught/ignored fault.
    unsafe {
        libc::signal(libc::SIGSEGV, libc::SIG_DFL);
    }
}

#[cfg(not(unix))]
fn restore_default_segv_handler() {
    log::warn!("gencore=1 requested but this platform has no SIGSEGV to restore");
}
