//! ServiceRouter (§4.7): URL path → [`ServiceDescriptor`] lookup, plus the
//! per-service error/response formatting discipline.

use std::collections::HashMap;

use crate::bus::BusContext;
use crate::bus::BusReply;
use crate::config::{ErrorMode, ServiceDescriptor};

/// A [`BusContext`] that can additionally place an HTTP outcall: the seam
/// a production embedder fills in with the real bus client (§6
/// expansion, mirroring [`crate::dispatcher::Dialer`] for the TCP side).
pub trait HttpBusContext: BusContext {
    /// Call the bus service named by `descriptor`, forwarding `body` as
    /// the request payload.
    fn call_service(&mut self, descriptor: &ServiceDescriptor, body: Vec<u8>) -> BusReply;
}

impl BusContext for Box<dyn HttpBusContext> {
    fn restore(&mut self) {
        (**self).restore()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }
}

/// Maps an incoming request's URL path to the service descriptor that
/// should handle it (§4.7: "incoming request URL path → service
/// descriptor").
#[derive(Debug, Default, Clone)]
pub struct ServiceRouter {
    by_path: HashMap<String, ServiceDescriptor>,
}

impl ServiceRouter {
    /// Build a router from a config's normalised service map, keyed by
    /// each descriptor's (already-normalised) URL.
    pub fn new(services: HashMap<String, ServiceDescriptor>) -> Self {
        let mut by_path = HashMap::new();
        for descriptor in services.into_values() {
            by_path.insert(descriptor.url.clone(), descriptor);
        }
        ServiceRouter { by_path }
    }

    /// Look up the descriptor that should handle `path`, if any.
    pub fn route(&self, path: &str) -> Option<&ServiceDescriptor> {
        self.by_path.get(path)
    }
}

/// A rendered HTTP response: status code, body bytes, and content type.
#[derive(Debug, Clone)]
pub struct RenderedResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: &'static str,
}

/// Format `reply` per `descriptor`'s error discipline (§6 HTTP variant).
pub fn format_response(descriptor: &ServiceDescriptor, reply: &BusReply) -> RenderedResponse {
    match reply {
        BusReply::Success { data, .. } => format_success(descriptor, data),
        BusReply::Failure { code, message, .. } => format_failure(descriptor, code.code(), message),
    }
}

fn format_success(descriptor: &ServiceDescriptor, data: &[u8]) -> RenderedResponse {
    match descriptor.errors {
        ErrorMode::Http | ErrorMode::Text => RenderedResponse {
            status: 200,
            body: data.to_vec(),
            content_type: "application/octet-stream",
        },
        ErrorMode::Json | ErrorMode::Json2Ubf => {
            let body = if descriptor.errfmt_json_onsucc {
                augment_json(
                    data,
                    &render_template(&descriptor.errfmt_json_code, 0, ""),
                )
            } else {
                data.to_vec()
            };
            RenderedResponse {
                status: 200,
                body,
                content_type: "application/json",
            }
        }
    }
}

fn format_failure(descriptor: &ServiceDescriptor, code: i32, message: &str) -> RenderedResponse {
    match descriptor.errors {
        ErrorMode::Http => RenderedResponse {
            status: descriptor.http_status_for(code) as u16,
            body: message.as_bytes().to_vec(),
            content_type: "text/plain",
        },
        ErrorMode::Text => RenderedResponse {
            status: descriptor.http_status_for(code) as u16,
            body: render_template(&descriptor.errfmt_text, code, message).into_bytes(),
            content_type: "text/plain",
        },
        ErrorMode::Json | ErrorMode::Json2Ubf => {
            let msg_fragment = render_template(&descriptor.errfmt_json_msg, code, message);
            let code_fragment = render_template(&descriptor.errfmt_json_code, code, message);
            let fragment = format!("{msg_fragment},{code_fragment}");
            RenderedResponse {
                status: descriptor.http_status_for(code) as u16,
                body: augment_json(b"{}", &fragment),
                content_type: "application/json",
            }
        }
    }
}

/// Substitute the first `%d` with `code` and the first `%s` with
/// `message` in `template` -- a minimal stand-in for the original's
/// `fmt.Sprintf`-style templates (§4.7/§6).
fn render_template(template: &str, code: i32, message: &str) -> String {
    let with_code = template.replacen("%d", &code.to_string(), 1);
    with_code.replacen("%s", message, 1)
}

/// Splice `fragment` (one or more `"key":value` pairs) as additional
/// top-level fields into the JSON object `body`. If `body` is not a
/// JSON object, wrap `fragment` in a fresh object instead.
fn augment_json(body: &[u8], fragment: &str) -> Vec<u8> {
    let trimmed = std::str::from_utf8(body).unwrap_or("").trim();
    if let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    {
        let inner = inner.trim();
        if inner.is_empty() {
            format!("{{{fragment}}}").into_bytes()
        } else {
            format!("{{{inner},{fragment}}}").into_bytes()
        }
    } else {
        format!("{{{fragment}}}").into_bytes()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ErrorCode;

    fn descriptor(mode: ErrorMode) -> ServiceDescriptor {
        ServiceDescriptor {
            errors: mode,
            ..ServiceDescriptor::default()
        }
    }

    #[test]
    fn route_finds_registered_service_by_path() {
        let mut services = HashMap::new();
        services.insert(
            "ORDERS".to_string(),
            ServiceDescriptor {
                url: "/orders".into(),
                ..ServiceDescriptor::default()
            },
        );
        let router = ServiceRouter::new(services);
        assert!(router.route("/orders").is_some());
        assert!(router.route("/missing").is_none());
    }

    #[test]
    fn http_mode_success_passes_body_through_verbatim() {
        let descriptor = descriptor(ErrorMode::Http);
        let reply = BusReply::Success {
            data: b"hello".to_vec(),
            net_conn_id: None,
        };
        let rendered = format_response(&descriptor, &reply);
        assert_eq!(rendered.status, 200);
        assert_eq!(rendered.body, b"hello");
    }

    #[test]
    fn http_mode_failure_maps_status_via_error_map() {
        let mut descriptor = descriptor(ErrorMode::Http);
        descriptor
            .errors_fmt_http_map
            .insert(ErrorCode::NoConn.code().to_string(), 503);
        let reply = BusReply::failure(ErrorCode::NoConn, "no connection", 0);
        let rendered = format_response(&descriptor, &reply);
        assert_eq!(rendered.status, 503);
        assert_eq!(rendered.body, b"no connection");
    }

    #[test]
    fn text_mode_substitutes_code_and_message() {
        let descriptor = descriptor(ErrorMode::Text);
        let reply = BusReply::failure(ErrorCode::Timeout, "reply not received in time", 0);
        let rendered = format_response(&descriptor, &reply);
        assert_eq!(
            String::from_utf8(rendered.body).unwrap(),
            "3: reply not received in time"
        );
    }

    #[test]
    fn json_mode_augments_existing_object_on_failure() {
        let descriptor = descriptor(ErrorMode::Json);
        let reply = BusReply::failure(ErrorCode::System, "boom", 0);
        let rendered = format_response(&descriptor, &reply);
        let body = String::from_utf8(rendered.body).unwrap();
        assert!(body.contains("\"error_code\":99"));
        assert!(body.contains("\"error_message\":\"boom\""));
    }

    #[test]
    fn json_mode_skips_success_fields_when_onsucc_is_false() {
        let mut descriptor = descriptor(ErrorMode::Json);
        descriptor.errfmt_json_onsucc = false;
        let reply = BusReply::Success {
            data: br#"{"order_id":1}"#.to_vec(),
            net_conn_id: None,
        };
        let rendered = format_response(&descriptor, &reply);
        assert_eq!(rendered.body, br#"{"order_id":1}"#);
    }
}
