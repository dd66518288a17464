//! Path constraints with `{name}` parameter capture.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Compiled path pattern.
///
/// The raw pattern is regex syntax in which `{name}` placeholders become
/// named groups matching one path segment. Captured parameters are exposed
/// to callbacks through the request fingerprint.
#[derive(Debug, Clone)]
pub struct PathPattern {
    raw: String,
    regex: Option<Arc<Regex>>,
    param_names: Vec<String>,
}

impl PathPattern {
    pub fn compile(raw: &str) -> Result<Self, String> {
        let param_names = extract_param_names(raw);
        let mut translated = raw.to_string();
        for name in &param_names {
            translated = translated.replace(&format!("{{{name}}}"), &format!("(?P<{name}>[^/]+)"));
        }
        let regex = match Regex::new(&format!("^(?:{translated})$")) {
            Ok(regex) => Some(Arc::new(regex)),
            // A path with parameters must compile; a plain path may still
            // match by literal equality.
            Err(e) if param_names.is_empty() => {
                tracing::debug!("path pattern '{raw}' is not a regex, matching literally: {e}");
                None
            }
            Err(e) => return Err(format!("invalid path pattern '{raw}': {e}")),
        };
        Ok(Self {
            raw: raw.to_string(),
            regex,
            param_names,
        })
    }

    /// Match a concrete path, returning captured parameters on success.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        if let Some(regex) = &self.regex {
            if let Some(captures) = regex.captures(path) {
                let params = self
                    .param_names
                    .iter()
                    .filter_map(|name| {
                        captures
                            .name(name)
                            .map(|m| (name.clone(), m.as_str().to_string()))
                    })
                    .collect();
                return Some(params);
            }
        }
        if path == self.raw {
            return Some(HashMap::new());
        }
        None
    }
}

fn extract_param_names(raw: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find('{') {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let name = &rest[start + 1..start + end];
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            names.push(name.to_string());
        }
        rest = &rest[start + end + 1..];
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_matches_exactly() {
        let pattern = PathPattern::compile("/hello").unwrap();
        assert!(pattern.matches("/hello").is_some());
        assert!(pattern.matches("/hello/world").is_none());
        assert!(pattern.matches("/other").is_none());
    }

    #[test]
    fn regex_path() {
        let pattern = PathPattern::compile("/users/[0-9]+").unwrap();
        assert!(pattern.matches("/users/42").is_some());
        assert!(pattern.matches("/users/alice").is_none());
    }

    #[test]
    fn captures_path_parameters() {
        let pattern = PathPattern::compile("/orders/{orderId}/items/{itemId}").unwrap();
        let params = pattern.matches("/orders/77/items/9").unwrap();
        assert_eq!(params.get("orderId"), Some(&"77".to_string()));
        assert_eq!(params.get("itemId"), Some(&"9".to_string()));
        assert!(pattern.matches("/orders/77/items/9/extra").is_none());
    }

    #[test]
    fn parameter_does_not_cross_segments() {
        let pattern = PathPattern::compile("/files/{name}").unwrap();
        assert!(pattern.matches("/files/report.pdf").is_some());
        assert!(pattern.matches("/files/a/b").is_none());
    }
}
