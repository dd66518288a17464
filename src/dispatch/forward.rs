//! Upstream forwarding.
//!
//! Builds an outbound request for the configured target, rewrites the Host
//! header to the target authority, and retries connect-level failures with
//! exponential backoff before surfacing an upstream failure. Forwards whose
//! authority is one of this server's own bound ports are stamped with a
//! per-run marker so the re-entry is journaled as proxied traffic.

use crate::error::MockError;
use crate::model::{Body, ForwardTarget, HttpRequest, HttpResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Marker header stamped on self-targeted forwards; stripped and turned
/// into the `proxied` flag when the request re-enters the classifier.
pub const RELAY_MARKER_HEADER: &str = "x-decoy-relay";

pub struct Forwarder {
    client: reqwest::Client,
    retries: u32,
    /// Shared with the lifecycle so self-forward detection tracks `bind`.
    bound_ports: Arc<RwLock<Vec<u16>>>,
    /// Identifies this server run in the relay marker.
    run_id: String,
}

impl Forwarder {
    pub fn new(
        connect_timeout: Duration,
        request_timeout: Duration,
        retries: u32,
        bound_ports: Arc<RwLock<Vec<u16>>>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            retries,
            bound_ports,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Is the target this same server?
    fn targets_self(&self, target: &ForwardTarget) -> bool {
        let local_host = matches!(target.host.as_str(), "localhost" | "127.0.0.1" | "::1");
        local_host && self.bound_ports.read().contains(&target.port)
    }

    /// Forward the request, returning the pair actually exchanged with the
    /// upstream so the journal can record both sides.
    pub async fn forward(
        &self,
        target: &ForwardTarget,
        request: &HttpRequest,
    ) -> Result<(HttpRequest, HttpResponse), MockError> {
        let mut outbound = request.clone();
        // The Host header follows the new authority.
        outbound
            .headers
            .retain(|name, _| !name.eq_ignore_ascii_case("host"));
        outbound.headers.insert(
            "host".to_string(),
            vec![target.authority()],
        );
        if self.targets_self(target) {
            debug!(authority = %target.authority(), "forward loops back into this server");
            outbound
                .headers
                .insert(RELAY_MARKER_HEADER.to_string(), vec![self.run_id.clone()]);
        }

        let url = build_url(target, &outbound);
        let mut last_error = String::new();
        for attempt in 0..=self.retries {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
                debug!(url, attempt, "retrying forward");
            }
            match self.send(&url, &outbound).await {
                Ok(response) => return Ok((outbound, response)),
                Err(e) if e.is_connect() || e.is_timeout() => {
                    last_error = e.to_string();
                }
                Err(e) => {
                    last_error = e.to_string();
                    break;
                }
            }
        }

        warn!(url, "forward failed: {last_error}");
        Err(MockError::Upstream {
            target: target.authority(),
            cause: last_error,
        })
    }

    async fn send(&self, url: &str, request: &HttpRequest) -> Result<HttpResponse, reqwest::Error> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .unwrap_or(reqwest::Method::GET);
        let mut builder = self.client.request(method, url);
        for (name, values) in &request.headers {
            if name.eq_ignore_ascii_case("content-length") || name.eq_ignore_ascii_case("host") {
                continue;
            }
            for value in values {
                builder = builder.header(name, value);
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_bytes());
        }

        let response = builder.send().await?;
        let status_code = response.status().as_u16();
        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_str().unwrap_or("").to_string());
        }
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status_code,
            reason_phrase: None,
            headers,
            body: if body.is_empty() {
                None
            } else {
                Some(Body::from_bytes(body))
            },
            delay: None,
        })
    }
}

fn build_url(target: &ForwardTarget, request: &HttpRequest) -> String {
    let query = if request.query_string_parameters.is_empty() {
        String::new()
    } else {
        let pairs: Vec<String> = request
            .query_string_parameters
            .iter()
            .flat_map(|(name, values)| {
                values.iter().map(move |value| {
                    format!(
                        "{}={}",
                        urlencoding::encode(name),
                        urlencoding::encode(value)
                    )
                })
            })
            .collect();
        format!("?{}", pairs.join("&"))
    };
    format!(
        "{}://{}{}{}",
        target.scheme,
        target.authority(),
        request.path,
        query
    )
}

fn backoff(attempt: u32) -> Duration {
    use rand::Rng;
    let base = 50u64.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(port: u16) -> ForwardTarget {
        ForwardTarget {
            host: "localhost".to_string(),
            port,
            scheme: "http".to_string(),
        }
    }

    #[test]
    fn builds_urls_with_query() {
        let mut request = HttpRequest::new("GET", "/u");
        request
            .query_string_parameters
            .insert("q".to_string(), vec!["a b".to_string()]);
        let url = build_url(&target(9000), &request);
        assert_eq!(url, "http://localhost:9000/u?q=a%20b");
    }

    #[test]
    fn self_detection_tracks_bound_ports() {
        let ports = Arc::new(RwLock::new(vec![8080]));
        let forwarder = Forwarder::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            0,
            Arc::clone(&ports),
        );
        assert!(forwarder.targets_self(&target(8080)));
        assert!(!forwarder.targets_self(&target(8081)));
        assert!(!forwarder.targets_self(&ForwardTarget {
            host: "example.com".to_string(),
            port: 8080,
            scheme: "http".to_string(),
        }));
    }

    #[test]
    fn backoff_grows_with_attempts() {
        assert!(backoff(1) >= Duration::from_millis(100));
        assert!(backoff(3) >= Duration::from_millis(400));
        assert!(backoff(10) < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn connect_failure_maps_to_upstream_error() {
        let forwarder = Forwarder::new(
            Duration::from_millis(200),
            Duration::from_millis(500),
            0,
            Arc::new(RwLock::new(Vec::new())),
        );
        // Nothing listens on this port.
        let err = forwarder
            .forward(&target(1), &HttpRequest::new("GET", "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::Upstream { .. }));
    }
}
