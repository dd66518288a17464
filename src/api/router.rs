//! Management route parsing and dispatch.
//!
//! Endpoints live under `/mockserver` and, for backward compatibility, at
//! the root. All operations use PUT with JSON bodies.

use super::handlers;
use super::types::{empty_response, error_response};
use crate::server::ServerCore;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ManagementOp {
    Expectation,
    Clear,
    Reset,
    Retrieve,
    Verify,
    VerifySequence,
    Status,
    Bind,
    Stop,
}

/// Recognize a management path, with or without the `/mockserver` prefix.
pub fn parse_management_path(path: &str) -> Option<ManagementOp> {
    let op_path = match path.strip_prefix("/mockserver") {
        Some(rest) if rest.is_empty() => "/",
        Some(rest) => rest,
        None => path,
    };
    match op_path {
        "/expectation" => Some(ManagementOp::Expectation),
        "/clear" => Some(ManagementOp::Clear),
        "/reset" => Some(ManagementOp::Reset),
        "/retrieve" => Some(ManagementOp::Retrieve),
        "/verify" => Some(ManagementOp::Verify),
        "/verifySequence" => Some(ManagementOp::VerifySequence),
        "/status" => Some(ManagementOp::Status),
        "/bind" => Some(ManagementOp::Bind),
        "/stop" => Some(ManagementOp::Stop),
        _ => None,
    }
}

/// Dispatch a classified management request.
pub async fn route(
    core: Arc<ServerCore>,
    op: ManagementOp,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if req.method() != Method::PUT {
        return error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{} not supported on the management API, use PUT", req.method()),
        );
    }

    let query = req.uri().query().map(str::to_string);
    debug!(op = ?op, "management request");

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            )
        }
    };

    match op {
        ManagementOp::Expectation => handlers::register_expectations(&core, &body),
        ManagementOp::Clear => handlers::clear(&core, query.as_deref(), &body),
        ManagementOp::Reset => {
            core.reset();
            empty_response(StatusCode::OK)
        }
        ManagementOp::Retrieve => handlers::retrieve(&core, query.as_deref(), &body),
        ManagementOp::Verify => handlers::verify(&core, &body),
        ManagementOp::VerifySequence => handlers::verify_sequence(&core, &body),
        ManagementOp::Status => handlers::status(&core),
        ManagementOp::Bind => handlers::bind(&core, &body).await,
        ManagementOp::Stop => handlers::stop(&core),
    }
}
