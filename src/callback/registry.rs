//! Remote callback channel registry.
//!
//! Each connected callback client owns one registration: a bounded send
//! queue feeding its WebSocket writer and a map of pending correlation ids
//! to one-shot result sinks. A sink is completed exactly once, by the
//! client's reply, by timeout, or by channel teardown.

use super::channel::{ClientFrame, ServerFrame};
use crate::error::MockError;
use crate::model::{HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// What a callback client sent back for one correlation id.
#[derive(Debug)]
pub enum ClientReply {
    Response(HttpResponse),
    ForwardRequest(HttpRequest),
    Error(String),
}

type PendingSink = oneshot::Sender<ClientReply>;

/// One live callback registration.
pub struct Registration {
    pub client_id: String,
    pub created_at: DateTime<Utc>,
    outbound: mpsc::Sender<Message>,
    pending: Mutex<HashMap<String, PendingSink>>,
}

impl Registration {
    /// Fail every pending sink; used on close and reset.
    fn abort_pending(&self) {
        let sinks: Vec<(String, PendingSink)> = self.pending.lock().drain().collect();
        for (correlation_id, _sink) in sinks {
            // Dropping the sender completes the receiver with an error.
            debug!(
                client_id = %self.client_id,
                %correlation_id,
                "callback channel closed with response pending"
            );
        }
    }
}

pub struct CallbackRegistry {
    clients: RwLock<HashMap<String, Arc<Registration>>>,
    queue_capacity: usize,
    response_timeout: Duration,
}

impl CallbackRegistry {
    pub fn new(queue_capacity: usize, response_timeout: Duration) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            queue_capacity,
            response_timeout,
        }
    }

    /// Create a registration and hand back the queue its writer drains.
    pub fn register(&self, client_id: String) -> (Arc<Registration>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let registration = Arc::new(Registration {
            client_id: client_id.clone(),
            created_at: Utc::now(),
            outbound: tx,
            pending: Mutex::new(HashMap::new()),
        });
        self.clients
            .write()
            .insert(client_id.clone(), Arc::clone(&registration));
        debug!(%client_id, "callback client registered");
        (registration, rx)
    }

    /// Remove a registration, failing anything still pending on it.
    pub fn deregister(&self, client_id: &str) {
        if let Some(registration) = self.clients.write().remove(client_id) {
            registration.abort_pending();
            debug!(client_id, "callback client deregistered");
        }
    }

    /// Close every registration; used by stop and reset broadcasts.
    pub fn close_all(&self) {
        let registrations: Vec<Arc<Registration>> =
            self.clients.write().drain().map(|(_, r)| r).collect();
        for registration in registrations {
            let _ = registration.outbound.try_send(Message::Close(None));
            registration.abort_pending();
        }
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Send a callback request to a client and wait for the correlated
    /// reply. A full send queue counts as an unavailable client.
    pub async fn send_callback(
        &self,
        client_id: &str,
        request: &HttpRequest,
        forward: bool,
    ) -> Result<ClientReply, MockError> {
        let registration = self
            .clients
            .read()
            .get(client_id)
            .cloned()
            .ok_or_else(|| MockError::CallbackClientMissing {
                client_id: client_id.to_string(),
            })?;

        let correlation_id = uuid::Uuid::new_v4().to_string();
        let frame = if forward {
            ServerFrame::ForwardRequest {
                correlation_id: correlation_id.clone(),
                request: request.clone(),
            }
        } else {
            ServerFrame::Request {
                correlation_id: correlation_id.clone(),
                request: request.clone(),
            }
        };
        let payload = serde_json::to_string(&frame).map_err(|e| MockError::Configuration(
            format!("callback request could not be serialized: {e}"),
        ))?;

        let (sink, result) = oneshot::channel();
        registration
            .pending
            .lock()
            .insert(correlation_id.clone(), sink);

        if registration
            .outbound
            .try_send(Message::Text(payload))
            .is_err()
        {
            // Queue full or writer gone: treat as unavailable.
            registration.pending.lock().remove(&correlation_id);
            warn!(client_id, "callback send queue unavailable");
            return Err(MockError::CallbackClientMissing {
                client_id: client_id.to_string(),
            });
        }

        match tokio::time::timeout(self.response_timeout, result).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(MockError::CallbackChannelClosed {
                client_id: client_id.to_string(),
            }),
            Err(_) => {
                registration.pending.lock().remove(&correlation_id);
                Err(MockError::CallbackTimeout {
                    client_id: client_id.to_string(),
                    timeout_ms: self.response_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route a client frame to the sink waiting on its correlation id.
    pub fn complete(&self, client_id: &str, frame: ClientFrame) {
        let Some(registration) = self.clients.read().get(client_id).cloned() else {
            warn!(client_id, "frame from unregistered callback client");
            return;
        };
        let (correlation_id, reply) = match frame {
            ClientFrame::Response {
                correlation_id,
                payload,
            } => (correlation_id, ClientReply::Response(payload)),
            ClientFrame::ForwardRequest {
                correlation_id,
                payload,
            } => (correlation_id, ClientReply::ForwardRequest(payload)),
            ClientFrame::Error {
                correlation_id,
                payload,
            } => (correlation_id, ClientReply::Error(payload)),
        };
        let removed = registration.pending.lock().remove(&correlation_id);
        match removed {
            Some(sink) => {
                let _ = sink.send(reply);
            }
            None => warn!(
                client_id,
                %correlation_id, "callback reply with no pending request"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> CallbackRegistry {
        CallbackRegistry::new(8, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn reply_is_routed_to_the_pending_request() {
        let registry = registry();
        let (_registration, mut rx) = registry.register("client-1".to_string());

        let registry = Arc::new(registry);
        let sender = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            sender
                .send_callback("client-1", &HttpRequest::new("GET", "/cb"), false)
                .await
        });

        // Pull the outbound frame and reply with its correlation id.
        let message = rx.recv().await.unwrap();
        let Message::Text(text) = message else {
            panic!("expected a text frame");
        };
        let frame: ServerFrame = serde_json::from_str(&text).unwrap();
        let ServerFrame::Request { correlation_id, request } = frame else {
            panic!("expected a request frame");
        };
        assert_eq!(request.path, "/cb");

        registry.complete(
            "client-1",
            ClientFrame::Response {
                correlation_id,
                payload: HttpResponse::new(201).with_body("ok"),
            },
        );

        let reply = waiter.await.unwrap().unwrap();
        match reply {
            ClientReply::Response(response) => {
                assert_eq!(response.status_code, 201);
                assert_eq!(response.body_text(), Some("ok"));
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_client_is_an_error() {
        let registry = registry();
        let err = registry
            .send_callback("ghost", &HttpRequest::new("GET", "/"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::CallbackClientMissing { .. }));
    }

    #[tokio::test]
    async fn timeout_frees_the_sink() {
        let registry = registry();
        let (registration, _rx) = registry.register("slow".to_string());

        let err = registry
            .send_callback("slow", &HttpRequest::new("GET", "/"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::CallbackTimeout { .. }));
        assert!(registration.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn deregister_fails_pending_waiters() {
        let registry = Arc::new(registry());
        let (_registration, _rx) = registry.register("gone".to_string());

        let sender = Arc::clone(&registry);
        let waiter = tokio::spawn(async move {
            sender
                .send_callback("gone", &HttpRequest::new("GET", "/"), false)
                .await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.deregister("gone");

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, MockError::CallbackChannelClosed { .. }));
    }

    #[tokio::test]
    async fn full_queue_reads_as_unavailable() {
        let registry = CallbackRegistry::new(1, Duration::from_millis(100));
        let (_registration, _rx) = registry.register("busy".to_string());

        // First send occupies the only queue slot (nothing drains _rx).
        let registry = Arc::new(registry);
        let first = Arc::clone(&registry);
        tokio::spawn(async move {
            let _ = first
                .send_callback("busy", &HttpRequest::new("GET", "/1"), false)
                .await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = registry
            .send_callback("busy", &HttpRequest::new("GET", "/2"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MockError::CallbackClientMissing { .. }));
    }
}
