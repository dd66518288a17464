//! Management endpoint implementations.

use super::types::{
    empty_response, error_response, json_response, text_response, ClearType, PortBindingBody,
    RetrieveFormat, VerifyBody, VerifySequenceBody,
};
use crate::journal::{Retrieved, RetrieveType};
use crate::matcher::{CompiledRequestMatcher, RequestMatcherDef};
use crate::model::{ExpectationDef, ResponseDefinition};
use crate::server::ServerCore;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::Arc;
use tracing::info;

/// `PUT /expectation`: register one expectation or an array of them.
pub fn register_expectations(core: &Arc<ServerCore>, body: &Bytes) -> Response<Full<Bytes>> {
    let defs: Vec<ExpectationDef> = match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) if value.is_array() => match serde_json::from_value(value) {
            Ok(defs) => defs,
            Err(e) => return bad_request(format!("invalid expectation array: {e}")),
        },
        Ok(value) => match serde_json::from_value(value) {
            Ok(def) => vec![def],
            Err(e) => return bad_request(format!("invalid expectation: {e}")),
        },
        Err(e) => return bad_request(format!("invalid expectation body: {e}")),
    };

    let mut registered = Vec::with_capacity(defs.len());
    for def in defs {
        // Template engines must exist at registration time, not first match.
        if let Ok(crate::model::Action::Respond(ResponseDefinition::Template(template))) =
            def.action()
        {
            if !core.dispatcher.templates.contains(&template.engine) {
                return bad_request(format!(
                    "no template engine registered under {}",
                    template.engine
                ));
            }
        }
        match core.store.add(def) {
            Ok(expectation) => {
                let mut def = expectation.def.clone();
                def.id = Some(expectation.id.clone());
                registered.push(def);
            }
            Err(e) => return bad_request(e.to_string()),
        }
    }

    info!(count = registered.len(), "expectations registered");
    json_response(StatusCode::CREATED, &registered)
}

/// `PUT /clear`: clear the journal and/or expectations, optionally scoped
/// by a request matcher.
pub fn clear(core: &Arc<ServerCore>, query: Option<&str>, body: &Bytes) -> Response<Full<Bytes>> {
    let clear_type = match query_param(query, "type") {
        Some(raw) => match parse_enum::<ClearType>(&raw) {
            Some(t) => t,
            None => return bad_request(format!("unknown clear type {raw}")),
        },
        None => ClearType::default(),
    };

    let matcher_def = match optional_matcher(body) {
        Ok(def) => def,
        Err(e) => return bad_request(e),
    };
    let compiled = match matcher_def
        .as_ref()
        .map(CompiledRequestMatcher::compile)
        .transpose()
    {
        Ok(compiled) => compiled,
        Err(e) => return bad_request(e),
    };

    if clear_type != ClearType::Expectations {
        core.journal.clear(compiled.as_ref());
    }
    if clear_type != ClearType::Log {
        match &matcher_def {
            Some(def) => {
                core.store.remove_matching(def);
            }
            None => core.store.reset(),
        }
    }
    empty_response(StatusCode::OK)
}

/// `PUT /retrieve?type=…&format=…`.
pub fn retrieve(core: &Arc<ServerCore>, query: Option<&str>, body: &Bytes) -> Response<Full<Bytes>> {
    let retrieve_type = match query_param(query, "type") {
        Some(raw) => match parse_enum::<RetrieveType>(&raw) {
            Some(t) => t,
            None => return bad_request(format!("unknown retrieve type {raw}")),
        },
        None => RetrieveType::Requests,
    };
    let format = match query_param(query, "format") {
        Some(raw) => match parse_enum::<RetrieveFormat>(&raw) {
            Some(f) => f,
            None => return bad_request(format!("unknown retrieve format {raw}")),
        },
        None => RetrieveFormat::default(),
    };
    if format == RetrieveFormat::Java {
        return bad_request("format=JAVA is not supported by this implementation");
    }

    let compiled = match optional_matcher(body)
        .and_then(|def| def.as_ref().map(CompiledRequestMatcher::compile).transpose())
    {
        Ok(compiled) => compiled,
        Err(e) => return bad_request(e),
    };

    let retrieved = core.journal.retrieve(compiled.as_ref(), retrieve_type);
    match format {
        RetrieveFormat::Json => json_response(StatusCode::OK, &retrieved),
        RetrieveFormat::LogEntries => text_response(StatusCode::OK, render_log_entries(&retrieved)),
        RetrieveFormat::Java => unreachable!("rejected above"),
    }
}

/// `PUT /verify`: 202 on match, 406 with a rendered report otherwise.
pub fn verify(core: &Arc<ServerCore>, body: &Bytes) -> Response<Full<Bytes>> {
    let verify_body: VerifyBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("invalid verify body: {e}")),
    };
    let compiled = match CompiledRequestMatcher::compile(&verify_body.http_request) {
        Ok(compiled) => compiled,
        Err(e) => return bad_request(e),
    };
    match core.journal.verify(&compiled, &verify_body.times) {
        Ok(()) => empty_response(StatusCode::ACCEPTED),
        Err(mismatch) => text_response(StatusCode::NOT_ACCEPTABLE, mismatch.report),
    }
}

/// `PUT /verifySequence`.
pub fn verify_sequence(core: &Arc<ServerCore>, body: &Bytes) -> Response<Full<Bytes>> {
    let sequence_body: VerifySequenceBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("invalid verifySequence body: {e}")),
    };
    let compiled: Result<Vec<CompiledRequestMatcher>, String> = sequence_body
        .http_requests
        .iter()
        .map(CompiledRequestMatcher::compile)
        .collect();
    let compiled = match compiled {
        Ok(compiled) => compiled,
        Err(e) => return bad_request(e),
    };
    match core.journal.verify_sequence(&compiled) {
        Ok(()) => empty_response(StatusCode::ACCEPTED),
        Err(mismatch) => text_response(StatusCode::NOT_ACCEPTABLE, mismatch.report),
    }
}

/// `PUT /status`.
pub fn status(core: &Arc<ServerCore>) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &PortBindingBody {
            ports: core.local_ports(),
        },
    )
}

/// `PUT /bind`: bind additional ports, returning the full resulting set.
pub async fn bind(core: &Arc<ServerCore>, body: &Bytes) -> Response<Full<Bytes>> {
    let binding: PortBindingBody = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(format!("invalid bind body: {e}")),
    };
    match core.bind_ports(&binding.ports).await {
        Ok(_) => json_response(
            StatusCode::OK,
            &PortBindingBody {
                ports: core.local_ports(),
            },
        ),
        Err(e) => bad_request(e.to_string()),
    }
}

/// `PUT /stop`: acknowledge, then shut down in the background.
pub fn stop(core: &Arc<ServerCore>) -> Response<Full<Bytes>> {
    let response = json_response(
        StatusCode::OK,
        &PortBindingBody {
            ports: core.local_ports(),
        },
    );
    let core = Arc::clone(core);
    tokio::spawn(async move {
        core.stop().await;
    });
    response
}

fn bad_request(message: impl Into<String>) -> Response<Full<Bytes>> {
    error_response(StatusCode::BAD_REQUEST, message)
}

/// An empty body means no matcher; anything else must parse as one.
fn optional_matcher(body: &Bytes) -> Result<Option<RequestMatcherDef>, String> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice::<RequestMatcherDef>(body)
        .map(Some)
        .map_err(|e| format!("invalid request matcher: {e}"))
}

fn parse_enum<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string())).ok()
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    crate::model::parse_query(query)
        .remove(name)
        .and_then(|mut values| values.pop())
}

fn render_log_entries(retrieved: &Retrieved) -> String {
    match retrieved {
        Retrieved::Messages(messages) => messages.join("\n"),
        other => serde_json::to_string_pretty(other).unwrap_or_default(),
    }
}
