//! Management API client.
//!
//! A thin wrapper over the management endpoints used by embedding code and
//! the integration tests. After `stop` every further call fails with a
//! stopped error; the server side is already gone, so the check is local
//! and synchronous.

use crate::matcher::RequestMatcherDef;
use crate::model::{ExpectationDef, HttpRequest, VerificationTimes};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request sent after client has been stopped")]
    Stopped,
    #[error("management API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("verification failed: {0}")]
    Verification(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

pub struct MockClient {
    base_url: String,
    http: reqwest::Client,
    stopped: AtomicBool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest<'a> {
    http_request: &'a RequestMatcherDef,
    times: &'a VerificationTimes,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifySequenceRequest<'a> {
    http_requests: &'a [RequestMatcherDef],
}

impl MockClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            base_url: format!("http://{host}:{port}/mockserver"),
            http: reqwest::Client::new(),
            stopped: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<(), ClientError> {
        if self.stopped.load(Ordering::Acquire) {
            Err(ClientError::Stopped)
        } else {
            Ok(())
        }
    }

    async fn put<B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError> {
        self.ensure_running()?;
        let mut request = self.http.put(format!("{}{path}", self.base_url));
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    async fn expect_status(
        response: reqwest::Response,
        expected: u16,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status().as_u16();
        if status == expected {
            Ok(response)
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(ClientError::Api { status, message })
        }
    }

    /// Register an expectation, returning the assigned ids.
    pub async fn register(&self, expectation: &ExpectationDef) -> Result<Vec<String>, ClientError> {
        let response = self.put("/expectation", Some(expectation)).await?;
        let response = Self::expect_status(response, 201).await?;
        let registered: Vec<ExpectationDef> = response.json().await?;
        Ok(registered.into_iter().filter_map(|def| def.id).collect())
    }

    /// Assert recorded traffic matches within the bounds; 406 surfaces as a
    /// verification error carrying the rendered report.
    pub async fn verify(
        &self,
        matcher: &RequestMatcherDef,
        times: &VerificationTimes,
    ) -> Result<(), ClientError> {
        let body = VerifyRequest {
            http_request: matcher,
            times,
        };
        let response = self.put("/verify", Some(&body)).await?;
        match response.status().as_u16() {
            202 => Ok(()),
            406 => Err(ClientError::Verification(
                response.text().await.unwrap_or_default(),
            )),
            status => Err(ClientError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    pub async fn verify_sequence(
        &self,
        matchers: &[RequestMatcherDef],
    ) -> Result<(), ClientError> {
        let body = VerifySequenceRequest {
            http_requests: matchers,
        };
        let response = self.put("/verifySequence", Some(&body)).await?;
        match response.status().as_u16() {
            202 => Ok(()),
            406 => Err(ClientError::Verification(
                response.text().await.unwrap_or_default(),
            )),
            status => Err(ClientError::Api {
                status,
                message: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Recorded requests, optionally narrowed by a matcher.
    pub async fn retrieve_requests(
        &self,
        matcher: Option<&RequestMatcherDef>,
    ) -> Result<Vec<HttpRequest>, ClientError> {
        let response = self
            .put("/retrieve?type=REQUESTS", matcher)
            .await?;
        let response = Self::expect_status(response, 200).await?;
        Ok(response.json().await?)
    }

    pub async fn clear(&self, matcher: Option<&RequestMatcherDef>) -> Result<(), ClientError> {
        let response = self.put("/clear", matcher).await?;
        Self::expect_status(response, 200).await?;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), ClientError> {
        let response = self.put::<()>("/reset", None).await?;
        Self::expect_status(response, 200).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<Vec<u16>, ClientError> {
        let response = self.put::<()>("/status", None).await?;
        let response = Self::expect_status(response, 200).await?;
        let body: crate::api::PortBindingBody = response.json().await?;
        Ok(body.ports)
    }

    pub async fn bind(&self, ports: &[u16]) -> Result<Vec<u16>, ClientError> {
        let body = crate::api::PortBindingBody {
            ports: ports.to_vec(),
        };
        let response = self.put("/bind", Some(&body)).await?;
        let response = Self::expect_status(response, 200).await?;
        let body: crate::api::PortBindingBody = response.json().await?;
        Ok(body.ports)
    }

    /// Ask the server to stop. The client is unusable afterwards.
    pub async fn stop(&self) -> Result<(), ClientError> {
        let response = self.put::<()>("/stop", None).await?;
        Self::expect_status(response, 200).await?;
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_client_refuses_further_requests() {
        let client = MockClient::new("localhost", 1);
        client.stopped.store(true, Ordering::Release);

        let err = client.status().await.unwrap_err();
        assert!(matches!(err, ClientError::Stopped));
        assert_eq!(
            err.to_string(),
            "Request sent after client has been stopped"
        );
    }
}
