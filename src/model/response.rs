//! Literal response definitions.

use super::body::Body;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_status_code() -> u16 {
    200
}

/// A canned HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_phrase: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    /// Applied through the scheduler before the first body byte is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

impl Default for HttpResponse {
    fn default() -> Self {
        Self {
            status_code: default_status_code(),
            reason_phrase: None,
            headers: HashMap::new(),
            body: None,
            delay: None,
        }
    }
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn not_found() -> Self {
        Self::new(404)
    }

    pub fn with_body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body as UTF-8 text, if it is text.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_ref().and_then(Body::as_text)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_delay(mut self, delay: Delay) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Response delay, fixed or with random jitter on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Delay {
    /// Fixed delay in milliseconds
    Fixed(u64),
    /// Base delay plus up to `jitterMs` of random extra latency
    Jittered {
        #[serde(rename = "durationMs")]
        duration_ms: u64,
        #[serde(rename = "jitterMs")]
        jitter_ms: u64,
    },
}

impl Delay {
    pub fn resolve_ms(&self) -> u64 {
        match self {
            Delay::Fixed(ms) => *ms,
            Delay::Jittered {
                duration_ms,
                jitter_ms,
            } => {
                use rand::Rng;
                if *jitter_ms == 0 {
                    *duration_ms
                } else {
                    duration_ms + rand::thread_rng().gen_range(0..=*jitter_ms)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_200() {
        let response: HttpResponse = serde_json::from_str(r#"{"body": "hi"}"#).unwrap();
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body_text(), Some("hi"));
    }

    #[test]
    fn delay_serde() {
        let fixed: Delay = serde_json::from_str("250").unwrap();
        assert!(matches!(fixed, Delay::Fixed(250)));
        assert_eq!(fixed.resolve_ms(), 250);

        let jittered: Delay = serde_json::from_str(r#"{"durationMs": 100, "jitterMs": 50}"#).unwrap();
        for _ in 0..10 {
            let ms = jittered.resolve_ms();
            assert!((100..=150).contains(&ms), "delay {ms} out of range");
        }
    }

    #[test]
    fn builder_collects_headers() {
        let response = HttpResponse::ok()
            .with_header("Set-Cookie", "a=1")
            .with_header("Set-Cookie", "b=2");
        assert_eq!(response.headers.get("Set-Cookie").unwrap().len(), 2);
    }
}
