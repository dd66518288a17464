//! Action dispatcher.
//!
//! Realizes the action of a matched expectation: canned responses with
//! scheduled delays, upstream forwards, local and remote callbacks, and
//! transport-level error injection. Every dispatch runs under the
//! configured maximum response time; exceeding it produces a 504-class
//! reply instead of hanging the connection.

mod forward;

pub use forward::{Forwarder, RELAY_MARKER_HEADER};

use crate::callback::{CallbackRegistry, ClientReply, LocalCallbackRegistry};
use crate::error::MockError;
use crate::model::{
    Action, ErrorAction, ForwardTarget, HttpRequest, HttpResponse, ResponseDefinition,
};
use crate::scheduler::Scheduler;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Pure `(request, template) → response` evaluators, registered by the
/// embedder; the dispatcher ships no engine of its own.
pub type TemplateEvaluator = dyn Fn(&HttpRequest, &str) -> HttpResponse + Send + Sync;

#[derive(Default)]
pub struct TemplateRegistry {
    engines: RwLock<HashMap<String, Arc<TemplateEvaluator>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, engine: impl Into<String>, evaluator: F)
    where
        F: Fn(&HttpRequest, &str) -> HttpResponse + Send + Sync + 'static,
    {
        self.engines
            .write()
            .insert(engine.into(), Arc::new(evaluator));
    }

    pub fn contains(&self, engine: &str) -> bool {
        self.engines.read().contains_key(engine)
    }

    fn evaluate(&self, engine: &str, request: &HttpRequest, template: &str) -> Option<HttpResponse> {
        let evaluator = self.engines.read().get(engine).cloned()?;
        Some(evaluator(request, template))
    }
}

/// Result of dispatching one action.
#[derive(Debug)]
pub enum Outcome {
    Reply(Reply),
    /// Close the connection without a response; `graceful` distinguishes
    /// drop from reset.
    Abort { graceful: bool },
}

#[derive(Debug, Default)]
pub struct Reply {
    pub response: HttpResponse,
    pub forwarded_request: Option<HttpRequest>,
    pub forwarded_response: Option<HttpResponse>,
    /// Failure note for the journal's log ring.
    pub note: Option<String>,
}

impl Reply {
    fn of(response: HttpResponse) -> Self {
        Self {
            response,
            ..Self::default()
        }
    }

    fn failure(status: u16, note: String) -> Self {
        Self {
            response: HttpResponse::new(status).with_body(note.clone()),
            note: Some(note),
            ..Self::default()
        }
    }
}

pub struct Dispatcher {
    pub scheduler: Arc<Scheduler>,
    pub callbacks: Arc<CallbackRegistry>,
    pub local_callbacks: Arc<LocalCallbackRegistry>,
    pub templates: Arc<TemplateRegistry>,
    pub forwarder: Forwarder,
    max_response_time: Duration,
}

impl Dispatcher {
    pub fn new(
        scheduler: Arc<Scheduler>,
        callbacks: Arc<CallbackRegistry>,
        local_callbacks: Arc<LocalCallbackRegistry>,
        templates: Arc<TemplateRegistry>,
        forwarder: Forwarder,
        max_response_time: Duration,
    ) -> Self {
        Self {
            scheduler,
            callbacks,
            local_callbacks,
            templates,
            forwarder,
            max_response_time,
        }
    }

    /// Execute an action under the dispatch deadline.
    pub async fn dispatch(&self, action: &Action, request: &HttpRequest) -> Outcome {
        match self
            .scheduler
            .with_deadline(self.max_response_time, self.execute(action, request))
            .await
        {
            Ok(outcome) => outcome,
            Err(MockError::DeadlineExceeded(ms)) => {
                warn!("action exceeded the {ms}ms response deadline");
                Outcome::Reply(Reply::failure(
                    504,
                    format!("action exceeded the maximum response time of {ms}ms"),
                ))
            }
            Err(e) => Outcome::Reply(Reply::failure(502, e.to_string())),
        }
    }

    async fn execute(&self, action: &Action, request: &HttpRequest) -> Outcome {
        match action {
            Action::Respond(definition) => self.respond(definition, request).await,
            Action::Forward(target) => self.forward(target, request).await,
            Action::OverrideForward(def) => {
                let overridden = def.overrides.apply(request);
                self.forward(&def.target(), &overridden).await
            }
            Action::ClassCallback { name, forward } => {
                self.class_callback(name, *forward, request).await
            }
            Action::ObjectCallback { client_id, forward } => {
                self.object_callback(client_id, *forward, request).await
            }
            Action::Error(error) => self.inject_error(error).await,
        }
    }

    async fn respond(&self, definition: &ResponseDefinition, request: &HttpRequest) -> Outcome {
        let response = match definition {
            ResponseDefinition::Literal(response) => response.clone(),
            ResponseDefinition::Template(template) => {
                match self
                    .templates
                    .evaluate(&template.engine, request, &template.template)
                {
                    Some(response) => response,
                    None => {
                        return Outcome::Reply(Reply::failure(
                            404,
                            format!("no template engine registered under {}", template.engine),
                        ))
                    }
                }
            }
        };

        if let Some(delay) = &response.delay {
            let ms = delay.resolve_ms();
            if ms > 0 && self.scheduler.delay(Duration::from_millis(ms)).await.is_err() {
                // Stopping; close rather than answer late.
                return Outcome::Abort { graceful: true };
            }
        }
        Outcome::Reply(Reply::of(response))
    }

    async fn forward(&self, target: &ForwardTarget, request: &HttpRequest) -> Outcome {
        match self.forwarder.forward(target, request).await {
            Ok((forwarded_request, forwarded_response)) => Outcome::Reply(Reply {
                response: strip_delay(&forwarded_response),
                forwarded_request: Some(forwarded_request),
                forwarded_response: Some(forwarded_response),
                note: None,
            }),
            Err(e) => Outcome::Reply(Reply::failure(502, e.to_string())),
        }
    }

    async fn class_callback(&self, name: &str, forward: bool, request: &HttpRequest) -> Outcome {
        if forward {
            match self.local_callbacks.invoke_forward(name, request) {
                Some(Ok(rewritten)) => match target_from_request(&rewritten) {
                    Some(target) => self.forward(&target, &rewritten).await,
                    None => Outcome::Reply(Reply::failure(
                        502,
                        format!("forward callback {name} returned a request with no host"),
                    )),
                },
                Some(Err(panic)) => Outcome::Reply(Reply::failure(
                    502,
                    format!("forward callback {name} failed: {panic}"),
                )),
                None => Outcome::Reply(Reply::failure(
                    502,
                    MockError::CallbackLoad {
                        name: name.to_string(),
                    }
                    .to_string(),
                )),
            }
        } else {
            match self.local_callbacks.invoke_response(name, request) {
                Some(Ok(response)) => self.respond(&ResponseDefinition::Literal(response), request).await,
                Some(Err(panic)) => Outcome::Reply(Reply::failure(
                    404,
                    format!("response callback {name} failed: {panic}"),
                )),
                None => Outcome::Reply(Reply::failure(
                    404,
                    MockError::CallbackLoad {
                        name: name.to_string(),
                    }
                    .to_string(),
                )),
            }
        }
    }

    async fn object_callback(&self, client_id: &str, forward: bool, request: &HttpRequest) -> Outcome {
        let failure_status = if forward { 502 } else { 404 };
        match self.callbacks.send_callback(client_id, request, forward).await {
            Ok(ClientReply::Response(response)) => {
                self.respond(&ResponseDefinition::Literal(response), request).await
            }
            Ok(ClientReply::ForwardRequest(rewritten)) => match target_from_request(&rewritten) {
                Some(target) => self.forward(&target, &rewritten).await,
                None => Outcome::Reply(Reply::failure(
                    502,
                    format!("callback client {client_id} returned a request with no host"),
                )),
            },
            Ok(ClientReply::Error(message)) => Outcome::Reply(Reply::failure(
                failure_status,
                format!("callback client {client_id} reported an error: {message}"),
            )),
            Err(e @ MockError::CallbackClientMissing { .. }) => {
                debug!(client_id, "object callback unavailable");
                Outcome::Reply(Reply::failure(404, e.to_string()))
            }
            Err(e) => Outcome::Reply(Reply::failure(failure_status, e.to_string())),
        }
    }

    async fn inject_error(&self, error: &ErrorAction) -> Outcome {
        match error {
            ErrorAction::DropConnection => Outcome::Abort { graceful: true },
            ErrorAction::ResetConnection => Outcome::Abort { graceful: false },
            ErrorAction::Delay { delay } => {
                let ms = delay.resolve_ms();
                let _ = self.scheduler.delay(Duration::from_millis(ms)).await;
                Outcome::Abort { graceful: true }
            }
        }
    }
}

fn strip_delay(response: &HttpResponse) -> HttpResponse {
    let mut out = response.clone();
    out.delay = None;
    out
}

/// Derive a forward target from a callback-rewritten request's Host header.
fn target_from_request(request: &HttpRequest) -> Option<ForwardTarget> {
    let host_header = request.first_header("host")?;
    let (host, port) = match host_header.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse::<u16>().ok()?),
        None => (host_header.to_string(), 80),
    };
    Some(ForwardTarget {
        host,
        port,
        scheme: "http".to_string(),
    })
}
