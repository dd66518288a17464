//! Per-request mock pipeline.
//!
//! Assembles the request fingerprint, selects an expectation from a store
//! snapshot, dispatches its action, and records exactly one interaction per
//! accepted request. Error-action aborts surface as connection errors so
//! hyper closes the stream without writing a response.

use super::classifier::{classify, RequestTarget};
use super::ServerCore;
use crate::callback::{handle_upgrade, unsupported_upgrade};
use crate::dispatch::{Outcome, RELAY_MARKER_HEADER};
use crate::journal::InteractionRecord;
use crate::model::{Body, HttpRequest, HttpResponse};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Connection-level service: classify, then serve.
pub async fn serve_request(
    core: Arc<ServerCore>,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<Full<Bytes>>, std::io::Error> {
    let path = req.uri().path().to_string();
    match classify(&path, req.headers()) {
        RequestTarget::Management(op) => Ok(crate::api::route(core, op, req).await),
        RequestTarget::CallbackUpgrade => {
            Ok(handle_upgrade(req, Arc::clone(&core.dispatcher.callbacks)))
        }
        RequestTarget::UnsupportedUpgrade => Ok(unsupported_upgrade(&path)),
        RequestTarget::Mock => handle_mock_request(core, req, remote).await,
    }
}

async fn handle_mock_request(
    core: Arc<ServerCore>,
    req: Request<Incoming>,
    remote: SocketAddr,
) -> Result<Response<Full<Bytes>>, std::io::Error> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let headers = req.headers().clone();
    let body = match req.into_body().collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            if bytes.is_empty() {
                None
            } else {
                Some(Body::from_bytes(bytes))
            }
        }
        Err(_) => None,
    };

    let mut request =
        HttpRequest::from_parts(&method, &uri, &headers, body, Some(remote.to_string()));

    // A marker stamped by our own forwarder means this request is the
    // re-entry of a forward that looped back into this server.
    let proxied = strip_relay_marker(&mut request, core.dispatcher.forwarder.run_id());

    let snapshot = core.store.snapshot();
    let Some((expectation, path_parameters)) = core.store.select(&snapshot, &request) else {
        debug!(method = %request.method, path = %request.path, "no expectation matched");
        let response = HttpResponse::not_found();
        core.journal.append(InteractionRecord {
            expectation_id: None,
            request,
            response: Some(response.clone()),
            proxied,
            ..InteractionRecord::default()
        });
        return Ok(render(&response));
    };

    request.path_parameters = path_parameters;
    debug!(
        method = %request.method,
        path = %request.path,
        expectation = %expectation.id,
        "expectation matched"
    );

    match core.dispatcher.dispatch(&expectation.action, &request).await {
        Outcome::Reply(reply) => {
            if let Some(note) = &reply.note {
                core.journal.log_message(note.clone());
            }
            core.journal.append(InteractionRecord {
                expectation_id: Some(expectation.id.clone()),
                request,
                response: Some(reply.response.clone()),
                forwarded_request: reply.forwarded_request,
                forwarded_response: reply.forwarded_response,
                proxied,
            });
            Ok(render(&reply.response))
        }
        Outcome::Abort { graceful } => {
            core.journal.append(InteractionRecord {
                expectation_id: Some(expectation.id.clone()),
                request,
                response: None,
                proxied,
                ..InteractionRecord::default()
            });
            let kind = if graceful {
                std::io::ErrorKind::BrokenPipe
            } else {
                std::io::ErrorKind::ConnectionReset
            };
            Err(std::io::Error::new(kind, "connection closed by error action"))
        }
    }
}

fn strip_relay_marker(request: &mut HttpRequest, run_id: &str) -> bool {
    let mut found = false;
    request.headers.retain(|name, values| {
        if name.eq_ignore_ascii_case(RELAY_MARKER_HEADER) {
            found = found || values.iter().any(|v| v == run_id);
            false
        } else {
            true
        }
    });
    found
}

/// Serialize a response definition onto the wire.
fn render(response: &HttpResponse) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    );
    for (name, values) in &response.headers {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    let body = response
        .body
        .as_ref()
        .map(Body::to_bytes)
        .unwrap_or_default();
    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("response build error"))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_marker_is_stripped_and_detected() {
        let mut request = HttpRequest::new("GET", "/u")
            .with_header(RELAY_MARKER_HEADER, "run-1")
            .with_header("Accept", "*/*");
        assert!(strip_relay_marker(&mut request, "run-1"));
        assert!(request.first_header(RELAY_MARKER_HEADER).is_none());
        assert_eq!(request.first_header("accept"), Some("*/*"));

        // A marker from a different run does not count.
        let mut other = HttpRequest::new("GET", "/u").with_header(RELAY_MARKER_HEADER, "run-2");
        assert!(!strip_relay_marker(&mut other, "run-1"));
        assert!(other.first_header(RELAY_MARKER_HEADER).is_none());
    }

    #[test]
    fn render_copies_status_headers_and_body() {
        let response = HttpResponse::new(201)
            .with_header("X-One", "1")
            .with_body("created");
        let rendered = render(&response);
        assert_eq!(rendered.status(), StatusCode::CREATED);
        assert_eq!(rendered.headers().get("X-One").unwrap(), "1");
    }
}
