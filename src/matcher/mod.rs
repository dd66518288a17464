//! Request matching.
//!
//! A request matcher mirrors the request fingerprint with every field
//! replaced by a constraint. Matchers compile once at registration and the
//! compiled form is a pure predicate over concrete requests.

mod body;
mod json;
mod path;
mod string;

pub use body::{BodyMatcherDef, CompiledBody, JsonMatchType, TypedBodyMatcher};
pub use json::{json_contains, json_strict_equals, matches_schema};
pub use path::PathPattern;
pub use string::{CompiledString, StringPattern, TaggedPattern};

use crate::model::HttpRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Wire shape of a request matcher. Unset fields are unconstrained.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcherDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<StringPattern>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_string_parameters: HashMap<String, StringPattern>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, StringPattern>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cookies: HashMap<String, StringPattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodyMatcherDef>,
    /// Inverts the overall result after all fields evaluate
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not: bool,
}

impl RequestMatcherDef {
    pub fn for_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(StringPattern::Literal(path.into())),
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(StringPattern::Literal(method.into()));
        self
    }
}

enum CompiledPath {
    Pattern(PathPattern),
    Plain(CompiledString),
}

/// Compiled predicate over request fingerprints.
pub struct CompiledRequestMatcher {
    def: RequestMatcherDef,
    method: Option<CompiledString>,
    path: Option<CompiledPath>,
    query: Vec<(String, CompiledString)>,
    headers: Vec<(String, CompiledString)>,
    cookies: Vec<(String, CompiledString)>,
    body: Option<CompiledBody>,
    not: bool,
}

impl std::fmt::Debug for CompiledRequestMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRequestMatcher")
            .field("def", &self.def)
            .finish()
    }
}

impl CompiledRequestMatcher {
    pub fn compile(def: &RequestMatcherDef) -> Result<Self, String> {
        let method = def.method.as_ref().map(CompiledString::compile).transpose()?;
        let path = match &def.path {
            Some(StringPattern::Literal(raw)) => {
                Some(CompiledPath::Pattern(PathPattern::compile(raw)?))
            }
            Some(tagged) => Some(CompiledPath::Plain(CompiledString::compile(tagged)?)),
            None => None,
        };
        let compile_map = |source: &HashMap<String, StringPattern>| {
            source
                .iter()
                .map(|(name, pattern)| Ok((name.clone(), CompiledString::compile(pattern)?)))
                .collect::<Result<Vec<_>, String>>()
        };
        Ok(Self {
            def: def.clone(),
            method,
            path,
            query: compile_map(&def.query_string_parameters)?,
            headers: compile_map(&def.headers)?,
            cookies: compile_map(&def.cookies)?,
            body: def.body.as_ref().map(CompiledBody::compile).transpose()?,
            not: def.not,
        })
    }

    /// The wire definition this matcher was compiled from.
    pub fn def(&self) -> &RequestMatcherDef {
        &self.def
    }

    /// Pure predicate: does the request satisfy this matcher?
    pub fn matches(&self, request: &HttpRequest) -> bool {
        self.evaluate(request).is_some() != self.not
    }

    /// As [`matches`], additionally yielding captured path parameters for a
    /// positive, non-negated match.
    pub fn matches_with_params(&self, request: &HttpRequest) -> Option<HashMap<String, String>> {
        match (self.evaluate(request), self.not) {
            (Some(params), false) => Some(params),
            (None, true) => Some(HashMap::new()),
            _ => None,
        }
    }

    fn evaluate(&self, request: &HttpRequest) -> Option<HashMap<String, String>> {
        if let Some(method) = &self.method {
            if !method.matches(&request.method, true) {
                return None;
            }
        }

        let mut params = HashMap::new();
        match &self.path {
            Some(CompiledPath::Pattern(pattern)) => {
                params = pattern.matches(&request.path)?;
            }
            Some(CompiledPath::Plain(matcher)) => {
                if !matcher.matches(&request.path, false) {
                    return None;
                }
            }
            None => {}
        }

        // For each named key at least one of the request's values must
        // satisfy the constraint; unmentioned keys are unconstrained.
        for (name, matcher) in &self.query {
            let values = request.query_string_parameters.get(name)?;
            if !values.iter().any(|v| matcher.matches(v, false)) {
                return None;
            }
        }

        for (name, matcher) in &self.headers {
            let values = request.header_values(name);
            if values.is_empty() || !values.iter().any(|v| matcher.matches(v, false)) {
                return None;
            }
        }

        for (name, matcher) in &self.cookies {
            let value = request.cookies.get(name)?;
            if !matcher.matches(value, false) {
                return None;
            }
        }

        if let Some(body) = &self.body {
            if !body.matches(request.body.as_ref(), &request.form_parameters()) {
                return None;
            }
        }

        Some(params)
    }
}
