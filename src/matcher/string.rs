//! String field constraints.
//!
//! A constraint is either a bare string, which matches by equality or as an
//! anchored regex, or a tagged operator (`equals`, `contains`, `startsWith`,
//! `endsWith`, `matches`). Patterns compile once at registration time.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Wire shape of a string constraint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StringPattern {
    /// Bare string: equality, or a regex covering the whole value
    Literal(String),
    Tagged(TaggedPattern),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum TaggedPattern {
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Regex pattern match
    Matches(String),
}

/// Compiled form for runtime evaluation.
#[derive(Debug, Clone)]
pub enum CompiledString {
    /// Literal with an optional anchored-regex fallback
    Literal {
        value: String,
        regex: Option<Arc<Regex>>,
    },
    Equals(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Matches(Arc<Regex>),
}

impl CompiledString {
    pub fn compile(pattern: &StringPattern) -> Result<Self, String> {
        match pattern {
            StringPattern::Literal(value) => {
                // A literal that also parses as a regex doubles as one, so
                // "/users/[0-9]+" works without an explicit matches tag.
                let regex = Regex::new(&format!("^(?:{value})$")).ok().map(Arc::new);
                Ok(CompiledString::Literal {
                    value: value.clone(),
                    regex,
                })
            }
            StringPattern::Tagged(TaggedPattern::Equals(v)) => Ok(CompiledString::Equals(v.clone())),
            StringPattern::Tagged(TaggedPattern::Contains(v)) => {
                Ok(CompiledString::Contains(v.clone()))
            }
            StringPattern::Tagged(TaggedPattern::StartsWith(v)) => {
                Ok(CompiledString::StartsWith(v.clone()))
            }
            StringPattern::Tagged(TaggedPattern::EndsWith(v)) => {
                Ok(CompiledString::EndsWith(v.clone()))
            }
            StringPattern::Tagged(TaggedPattern::Matches(pattern)) => {
                let regex = Regex::new(pattern)
                    .map_err(|e| format!("invalid regex '{pattern}': {e}"))?;
                Ok(CompiledString::Matches(Arc::new(regex)))
            }
        }
    }

    /// Evaluate against a concrete value.
    pub fn matches(&self, value: &str, case_insensitive: bool) -> bool {
        match self {
            CompiledString::Literal { value: expected, regex } => {
                let equal = if case_insensitive {
                    value.eq_ignore_ascii_case(expected)
                } else {
                    value == expected
                };
                equal || regex.as_ref().is_some_and(|r| r.is_match(value))
            }
            CompiledString::Equals(expected) => {
                if case_insensitive {
                    value.eq_ignore_ascii_case(expected)
                } else {
                    value == expected
                }
            }
            CompiledString::Contains(needle) => {
                if case_insensitive {
                    value.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    value.contains(needle)
                }
            }
            CompiledString::StartsWith(prefix) => {
                if case_insensitive {
                    value.to_lowercase().starts_with(&prefix.to_lowercase())
                } else {
                    value.starts_with(prefix)
                }
            }
            CompiledString::EndsWith(suffix) => {
                if case_insensitive {
                    value.to_lowercase().ends_with(&suffix.to_lowercase())
                } else {
                    value.ends_with(suffix)
                }
            }
            CompiledString::Matches(regex) => regex.is_match(value),
        }
    }
}
