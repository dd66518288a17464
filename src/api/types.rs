//! Management API wire types and response helpers.

use crate::matcher::RequestMatcherDef;
use crate::model::VerificationTimes;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};

/// Body of `PUT /verify`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyBody {
    pub http_request: RequestMatcherDef,
    #[serde(default)]
    pub times: VerificationTimes,
}

/// Body of `PUT /verifySequence`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySequenceBody {
    pub http_requests: Vec<RequestMatcherDef>,
}

/// Body of `PUT /bind` and payload of `PUT /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PortBindingBody {
    pub ports: Vec<u16>,
}

/// Scope selector for `PUT /clear`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearType {
    Log,
    Expectations,
    #[default]
    All,
}

/// Output selector for `PUT /retrieve`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetrieveFormat {
    #[default]
    Json,
    Java,
    LogEntries,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string_pretty(body).unwrap_or_else(|_| "{}".to_string());
    build_response(status, [("content-type", "application/json")], json)
}

pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    build_response(status, [("content-type", "text/plain")], body)
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response<Full<Bytes>> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
        },
    )
}

pub fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    build_response(status, std::iter::empty::<(&str, &str)>(), Bytes::new())
}

pub fn build_response(
    status: StatusCode,
    headers: impl IntoIterator<Item = (impl AsRef<str>, impl AsRef<str>)>,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut builder = Response::builder().status(status);
    for (name, value) in headers {
        builder = builder.header(name.as_ref(), value.as_ref());
    }
    builder
        .body(Full::new(body.into()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from("internal error"))))
}
