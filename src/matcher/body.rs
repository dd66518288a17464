//! Body constraints.
//!
//! A body matcher is either a bare string (exact text), a bare JSON value
//! (field-subset match), or a tagged form selecting the match mode.

use super::json::{json_contains, json_strict_equals, matches_schema};
use crate::model::Body;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JsonMatchType {
    Strict,
    #[default]
    OnlyMatchingFields,
}

/// Tagged body matcher forms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TypedBodyMatcher {
    String {
        string: String,
    },
    Regex {
        regex: String,
    },
    Json {
        json: Value,
        #[serde(default, rename = "matchType")]
        match_type: JsonMatchType,
    },
    JsonSchema {
        #[serde(rename = "jsonSchema")]
        json_schema: Value,
    },
    Xml {
        xml: String,
    },
    Binary {
        #[serde(rename = "base64Bytes")]
        base64_bytes: String,
    },
    Parameters {
        parameters: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum BodyMatcherDef {
    Typed(TypedBodyMatcher),
    /// Bare string: exact text equality
    Text(String),
    /// Bare JSON value: field-subset match
    Json(Value),
}

/// Compiled body matcher.
#[derive(Debug, Clone)]
pub enum CompiledBody {
    Text(String),
    Regex(Arc<Regex>),
    Json {
        expected: Value,
        match_type: JsonMatchType,
    },
    JsonSchema(Value),
    Xml(String),
    Binary(Vec<u8>),
    Parameters(HashMap<String, String>),
}

impl CompiledBody {
    pub fn compile(def: &BodyMatcherDef) -> Result<Self, String> {
        match def {
            BodyMatcherDef::Text(text) => Ok(CompiledBody::Text(text.clone())),
            BodyMatcherDef::Json(value) => Ok(CompiledBody::Json {
                expected: value.clone(),
                match_type: JsonMatchType::OnlyMatchingFields,
            }),
            BodyMatcherDef::Typed(TypedBodyMatcher::String { string }) => {
                Ok(CompiledBody::Text(string.clone()))
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::Regex { regex }) => {
                let compiled = Regex::new(&format!("^(?s:{regex})$"))
                    .map_err(|e| format!("invalid body regex '{regex}': {e}"))?;
                Ok(CompiledBody::Regex(Arc::new(compiled)))
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::Json { json, match_type }) => {
                Ok(CompiledBody::Json {
                    expected: json.clone(),
                    match_type: *match_type,
                })
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::JsonSchema { json_schema }) => {
                Ok(CompiledBody::JsonSchema(json_schema.clone()))
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::Xml { xml }) => {
                Ok(CompiledBody::Xml(normalize_xml(xml)))
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::Binary { base64_bytes }) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(base64_bytes)
                    .map_err(|e| format!("invalid base64 body: {e}"))?;
                Ok(CompiledBody::Binary(bytes))
            }
            BodyMatcherDef::Typed(TypedBodyMatcher::Parameters { parameters }) => {
                Ok(CompiledBody::Parameters(parameters.clone()))
            }
        }
    }

    /// Evaluate against the request body and its derived form parameters.
    pub fn matches(&self, body: Option<&Body>, form: &HashMap<String, String>) -> bool {
        let text = body.and_then(Body::as_text);
        match self {
            CompiledBody::Text(expected) => text == Some(expected.as_str()),
            CompiledBody::Regex(regex) => text.is_some_and(|b| regex.is_match(b)),
            CompiledBody::Json {
                expected,
                match_type,
            } => {
                let Some(actual) = text.and_then(|b| serde_json::from_str::<Value>(b).ok()) else {
                    return false;
                };
                match match_type {
                    JsonMatchType::Strict => json_strict_equals(expected, &actual),
                    JsonMatchType::OnlyMatchingFields => json_contains(expected, &actual),
                }
            }
            CompiledBody::JsonSchema(schema) => text
                .and_then(|b| serde_json::from_str::<Value>(b).ok())
                .is_some_and(|actual| matches_schema(schema, &actual)),
            CompiledBody::Xml(expected) => {
                text.is_some_and(|b| normalize_xml(b) == *expected)
            }
            // Raw byte equality, independent of how the payload decodes.
            CompiledBody::Binary(expected) => {
                body.is_some_and(|b| b.as_bytes() == expected.as_slice())
            }
            CompiledBody::Parameters(expected) => expected
                .iter()
                .all(|(name, value)| form.get(name) == Some(value)),
        }
    }
}

/// Collapse inter-element whitespace so formatting differences don't defeat
/// XML equality. Full canonicalization belongs to the codec collaborator.
fn normalize_xml(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len());
    let mut in_whitespace = false;
    for c in xml.trim().chars() {
        if c.is_whitespace() {
            in_whitespace = true;
            continue;
        }
        if in_whitespace && !out.ends_with('>') && c != '<' {
            out.push(' ');
        }
        in_whitespace = false;
        out.push(c);
    }
    out
}
