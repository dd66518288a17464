//! Expectation wire shape and the action union it carries.

use super::body::Body;
use super::response::{Delay, HttpResponse};
use super::times::Times;
use crate::matcher::RequestMatcherDef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_scheme() -> String {
    "http".to_string()
}

/// Target authority for forwarded requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForwardTarget {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

impl ForwardTarget {
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Fields overlaid onto the original request before forwarding.
///
/// Only non-empty fields take effect; everything else passes through.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_string_parameters: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
}

impl RequestOverride {
    pub fn apply(&self, original: &crate::model::HttpRequest) -> crate::model::HttpRequest {
        let mut out = original.clone();
        if let Some(method) = &self.method {
            out.method = method.clone();
        }
        if let Some(path) = &self.path {
            out.path = path.clone();
        }
        if !self.query_string_parameters.is_empty() {
            out.query_string_parameters = self.query_string_parameters.clone();
        }
        for (name, values) in &self.headers {
            out.headers.insert(name.clone(), values.clone());
        }
        if let Some(body) = &self.body {
            out.body = Some(body.clone());
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OverrideForwardDef {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub overrides: RequestOverride,
}

impl OverrideForwardDef {
    pub fn target(&self) -> ForwardTarget {
        ForwardTarget {
            host: self.host.clone(),
            port: self.port,
            scheme: self.scheme.clone(),
        }
    }
}

/// In-process callback reference, resolved through the local registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassCallbackDef {
    pub callback_name: String,
}

/// Remote callback reference, resolved through the channel registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectCallbackDef {
    pub client_id: String,
}

/// Template-backed response; engines are registered by the embedder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDef {
    pub engine: String,
    pub template: String,
}

/// Transport-level error injection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorAction {
    /// Close the connection without writing a response
    DropConnection,
    /// Abort the connection, skipping any graceful teardown
    ResetConnection,
    /// Hold the connection for the delay, then close it unanswered
    Delay { delay: Delay },
}

/// What the server does when the expectation matches.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Respond(ResponseDefinition),
    ClassCallback { name: String, forward: bool },
    ObjectCallback { client_id: String, forward: bool },
    Forward(ForwardTarget),
    OverrideForward(OverrideForwardDef),
    Error(ErrorAction),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseDefinition {
    Literal(HttpResponse),
    Template(TemplateDef),
}

/// Wire shape of one expectation.
///
/// Exactly one action slot must be populated; registration rejects
/// expectations with zero or multiple actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExpectationDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub http_request: RequestMatcherDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response_template: Option<TemplateDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_class_callback: Option<ClassCallbackDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_object_callback: Option<ObjectCallbackDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_forward: Option<ForwardTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_forward_class_callback: Option<ClassCallbackDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_forward_object_callback: Option<ObjectCallbackDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_override_forwarded_request: Option<OverrideForwardDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_error: Option<ErrorAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times: Option<Times>,
}

impl ExpectationDef {
    pub fn new(matcher: RequestMatcherDef) -> Self {
        Self {
            http_request: matcher,
            ..Self::default()
        }
    }

    pub fn respond(mut self, response: HttpResponse) -> Self {
        self.http_response = Some(response);
        self
    }

    pub fn forward(mut self, target: ForwardTarget) -> Self {
        self.http_forward = Some(target);
        self
    }

    pub fn with_times(mut self, times: Times) -> Self {
        self.times = Some(times);
        self
    }

    fn populated_actions(&self) -> usize {
        [
            self.http_response.is_some(),
            self.http_response_template.is_some(),
            self.http_class_callback.is_some(),
            self.http_object_callback.is_some(),
            self.http_forward.is_some(),
            self.http_forward_class_callback.is_some(),
            self.http_forward_object_callback.is_some(),
            self.http_override_forwarded_request.is_some(),
            self.http_error.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// Resolve the single populated action slot.
    pub fn action(&self) -> Result<Action, String> {
        match self.populated_actions() {
            0 => return Err("expectation does not define an action".to_string()),
            1 => {}
            n => return Err(format!("expectation defines {n} actions, expected exactly one")),
        }
        if let Some(response) = &self.http_response {
            return Ok(Action::Respond(ResponseDefinition::Literal(response.clone())));
        }
        if let Some(template) = &self.http_response_template {
            return Ok(Action::Respond(ResponseDefinition::Template(template.clone())));
        }
        if let Some(callback) = &self.http_class_callback {
            return Ok(Action::ClassCallback {
                name: callback.callback_name.clone(),
                forward: false,
            });
        }
        if let Some(callback) = &self.http_object_callback {
            return Ok(Action::ObjectCallback {
                client_id: callback.client_id.clone(),
                forward: false,
            });
        }
        if let Some(target) = &self.http_forward {
            return Ok(Action::Forward(target.clone()));
        }
        if let Some(callback) = &self.http_forward_class_callback {
            return Ok(Action::ClassCallback {
                name: callback.callback_name.clone(),
                forward: true,
            });
        }
        if let Some(callback) = &self.http_forward_object_callback {
            return Ok(Action::ObjectCallback {
                client_id: callback.client_id.clone(),
                forward: true,
            });
        }
        if let Some(override_forward) = &self.http_override_forwarded_request {
            return Ok(Action::OverrideForward(override_forward.clone()));
        }
        if let Some(error) = &self.http_error {
            return Ok(Action::Error(error.clone()));
        }
        unreachable!("populated_actions counted a slot no branch handles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::RequestMatcherDef;

    fn matcher() -> RequestMatcherDef {
        serde_json::from_value(serde_json::json!({"method": "GET", "path": "/hello"})).unwrap()
    }

    #[test]
    fn resolves_single_action() {
        let def = ExpectationDef::new(matcher()).respond(HttpResponse::ok().with_body("hi"));
        match def.action().unwrap() {
            Action::Respond(ResponseDefinition::Literal(response)) => {
                assert_eq!(response.status_code, 200);
                assert_eq!(response.body_text(), Some("hi"));
            }
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_and_conflicting_actions() {
        let empty = ExpectationDef::new(matcher());
        assert!(empty.action().is_err());

        let mut doubled = ExpectationDef::new(matcher()).respond(HttpResponse::ok());
        doubled.http_error = Some(ErrorAction::DropConnection);
        assert!(doubled.action().is_err());
    }

    #[test]
    fn forward_callback_slots_carry_the_flavor() {
        let mut def = ExpectationDef::new(matcher());
        def.http_forward_object_callback = Some(ObjectCallbackDef {
            client_id: "abc".to_string(),
        });
        assert_eq!(
            def.action().unwrap(),
            Action::ObjectCallback {
                client_id: "abc".to_string(),
                forward: true
            }
        );
    }

    #[test]
    fn error_action_serde() {
        let drop: ErrorAction = serde_json::from_str(r#"{"type": "DROP_CONNECTION"}"#).unwrap();
        assert_eq!(drop, ErrorAction::DropConnection);

        let delay: ErrorAction =
            serde_json::from_str(r#"{"type": "DELAY", "delay": 500}"#).unwrap();
        assert!(matches!(delay, ErrorAction::Delay { delay: Delay::Fixed(500) }));
    }

    #[test]
    fn override_applies_non_empty_fields_only() {
        let original = crate::model::HttpRequest::new("GET", "/orig")
            .with_header("Accept", "text/plain")
            .with_body("payload");
        let overridden = RequestOverride {
            path: Some("/new".to_string()),
            ..RequestOverride::default()
        }
        .apply(&original);
        assert_eq!(overridden.path, "/new");
        assert_eq!(overridden.method, "GET");
        assert_eq!(overridden.body_text(), Some("payload"));
        assert_eq!(overridden.first_header("accept"), Some("text/plain"));
    }
}
