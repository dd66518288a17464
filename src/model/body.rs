//! Request and response body payloads.
//!
//! Bodies keep their raw bytes: UTF-8 payloads are carried as text, and
//! anything else keeps its bytes untouched. On the JSON wire a text body is
//! a plain string and a binary body is `{"base64Bytes": "..."}`.

use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BodyWire", into = "BodyWire")]
pub enum Body {
    Text(String),
    Binary(Bytes),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum BodyWire {
    Text(String),
    Binary {
        #[serde(rename = "base64Bytes")]
        base64_bytes: String,
    },
}

impl TryFrom<BodyWire> for Body {
    type Error = String;

    fn try_from(wire: BodyWire) -> Result<Self, Self::Error> {
        match wire {
            BodyWire::Text(text) => Ok(Body::Text(text)),
            BodyWire::Binary { base64_bytes } => base64::engine::general_purpose::STANDARD
                .decode(&base64_bytes)
                .map(|bytes| Body::Binary(Bytes::from(bytes)))
                .map_err(|e| format!("invalid base64 body: {e}")),
        }
    }
}

impl From<Body> for BodyWire {
    fn from(body: Body) -> Self {
        match body {
            Body::Text(text) => BodyWire::Text(text),
            Body::Binary(bytes) => BodyWire::Binary {
                base64_bytes: base64::engine::general_purpose::STANDARD.encode(&bytes),
            },
        }
    }
}

impl Body {
    /// UTF-8 payloads become text; anything else keeps its raw bytes.
    pub fn from_bytes(bytes: Bytes) -> Self {
        match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Body::Text(text),
            Err(_) => Body::Binary(bytes),
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Body::Text(value.into())
    }

    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Body::Binary(bytes.into())
    }

    /// The payload as UTF-8 text, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Body::Text(text) => Some(text),
            Body::Binary(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Text(text) => text.as_bytes(),
            Body::Binary(bytes) => bytes,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        match self {
            Body::Text(text) => Bytes::from(text.clone()),
            Body::Binary(bytes) => bytes.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::Text(value.to_string())
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::Text(value)
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::from_bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::from_bytes(Bytes::from(value))
    }
}
