//! Concrete request fingerprint used for matching and recording.

use super::body::Body;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The matched view of one received HTTP request.
///
/// Query parameters and headers are multi-valued; header names compare
/// case-insensitively through [`HttpRequest::header_values`]. The body
/// keeps its raw bytes; UTF-8 payloads are carried as text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_string_parameters: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cookies: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    /// Path parameters captured by `{name}` segments of the matched
    /// expectation; populated at match time for callbacks.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub path_parameters: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_from: Option<String>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Assemble a fingerprint from decomposed hyper request parts.
    pub fn from_parts(
        method: &hyper::Method,
        uri: &hyper::Uri,
        headers: &hyper::HeaderMap,
        body: Option<Body>,
        received_from: Option<String>,
    ) -> Self {
        let mut header_map: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            header_map
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_str().unwrap_or("").to_string());
        }

        let cookies = headers
            .get_all(hyper::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_cookie_header)
            .collect();

        Self {
            method: method.as_str().to_string(),
            path: uri.path().to_string(),
            query_string_parameters: parse_query(uri.query()),
            headers: header_map,
            cookies,
            body,
            path_parameters: HashMap::new(),
            received_from,
        }
    }

    /// All values of a header, matched case-insensitively by name.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, vs)| vs.iter().map(String::as_str))
            .collect()
    }

    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    /// Body as UTF-8 text, if it is text.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(Body::as_text)
    }

    /// Form parameters when the body is urlencoded, empty otherwise.
    pub fn form_parameters(&self) -> HashMap<String, String> {
        let is_form = self
            .first_header("content-type")
            .map(|ct| ct.contains("application/x-www-form-urlencoded"))
            .unwrap_or(false);
        if !is_form {
            return HashMap::new();
        }
        self.body_text()
            .map(|b| {
                parse_query(Some(b))
                    .into_iter()
                    .filter_map(|(k, mut vs)| vs.pop().map(|v| (k, v)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Parse a query string into a multi-valued parameter map.
pub fn parse_query(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut params: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(q) = query {
        for pair in q.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            let key = urlencoding::decode(key).unwrap_or_default().into_owned();
            let value = urlencoding::decode(value).unwrap_or_default().into_owned();
            params.entry(key).or_default().push(value);
        }
    }
    params
}

fn parse_cookie_header(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_valued_query() {
        let params = parse_query(Some("a=1&a=2&b=x%20y&flag"));
        assert_eq!(params.get("a"), Some(&vec!["1".to_string(), "2".to_string()]));
        assert_eq!(params.get("b"), Some(&vec!["x y".to_string()]));
        assert_eq!(params.get("flag"), Some(&vec![String::new()]));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let req = HttpRequest::new("GET", "/").with_header("Content-Type", "application/json");
        assert_eq!(req.first_header("content-type"), Some("application/json"));
        assert_eq!(req.first_header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.first_header("accept"), None);
    }

    #[test]
    fn parses_cookie_header() {
        let cookies = parse_cookie_header("session=abc; theme=dark");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0], ("session".to_string(), "abc".to_string()));
    }

    #[test]
    fn form_parameters_require_content_type() {
        let plain = HttpRequest::new("POST", "/submit").with_body("a=1&b=2");
        assert!(plain.form_parameters().is_empty());

        let form = HttpRequest::new("POST", "/submit")
            .with_header("Content-Type", "application/x-www-form-urlencoded")
            .with_body("a=1&b=2");
        let params = form.form_parameters();
        assert_eq!(params.get("a"), Some(&"1".to_string()));
        assert_eq!(params.get("b"), Some(&"2".to_string()));
    }
}
