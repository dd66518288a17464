//! WebSocket callback channel.
//!
//! Remote callback clients upgrade on the callback path and hold a
//! persistent text-frame channel. The server pushes serialized requests
//! tagged with a correlation id; the client answers with a response, a
//! request to forward, or an error carrying the same id.

use super::registry::CallbackRegistry;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Upgrade path callback clients connect to.
pub const CALLBACK_UPGRADE_PATH: &str = "/_mockserver_callback_websocket";

/// Header carrying the assigned client id on the 101 response.
pub const CLIENT_REGISTRATION_HEADER: &str = "X-CLIENT-REGISTRATION-ID";

/// Frames the server sends to callback clients.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Response callback: the client must answer with a response frame
    Request {
        correlation_id: String,
        request: crate::model::HttpRequest,
    },
    /// Forward callback: the client must answer with the request to forward
    ForwardRequest {
        correlation_id: String,
        request: crate::model::HttpRequest,
    },
}

/// Frames callback clients send back.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Response {
        correlation_id: String,
        payload: crate::model::HttpResponse,
    },
    ForwardRequest {
        correlation_id: String,
        payload: crate::model::HttpRequest,
    },
    Error {
        correlation_id: String,
        payload: String,
    },
}

/// Does the request carry a WebSocket handshake?
pub fn is_websocket_upgrade(headers: &hyper::HeaderMap) -> bool {
    let upgrades_to_websocket = headers
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let connection_upgrade = headers
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    upgrades_to_websocket && connection_upgrade
}

/// Reply for upgrade attempts on paths the callback socket does not serve.
pub fn unsupported_upgrade(path: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_IMPLEMENTED)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from(format!(
            "unsupported upgrade path {path}, callback clients must connect to {CALLBACK_UPGRADE_PATH}"
        ))))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Complete the handshake, register the client, and hand the connection to
/// a pump task once hyper yields the upgraded stream.
pub fn handle_upgrade(
    mut req: Request<Incoming>,
    registry: Arc<CallbackRegistry>,
) -> Response<Full<Bytes>> {
    let Some(key) = req
        .headers()
        .get(SEC_WEBSOCKET_KEY)
        .map(|v| v.as_bytes().to_vec())
    else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::from("missing Sec-WebSocket-Key header")))
            .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    };

    let accept = derive_accept_key(&key);
    let client_id = uuid::Uuid::new_v4().to_string();
    let (_registration, outbound_rx) = registry.register(client_id.clone());

    let on_upgrade = hyper::upgrade::on(&mut req);
    let pump_client_id = client_id.clone();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let io = TokioIo::new(upgraded);
                let ws = WebSocketStream::from_raw_socket(io, Role::Server, None).await;
                run_channel(ws, pump_client_id, outbound_rx, registry).await;
            }
            Err(e) => {
                warn!(client_id = %pump_client_id, "callback upgrade failed: {e}");
                registry.deregister(&pump_client_id);
            }
        }
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(UPGRADE, "websocket")
        .header(CONNECTION, "Upgrade")
        .header(SEC_WEBSOCKET_ACCEPT, accept)
        .header(CLIENT_REGISTRATION_HEADER, client_id)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Pump loop: drain the outbound queue into the socket and route inbound
/// frames to their pending sinks. Runs until either side closes.
async fn run_channel<S>(
    ws: WebSocketStream<S>,
    client_id: String,
    mut outbound_rx: mpsc::Receiver<Message>,
    registry: Arc<CallbackRegistry>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    debug!(%client_id, "callback channel open");

    loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        let closing = matches!(message, Message::Close(_));
                        if sink.send(message).await.is_err() {
                            break;
                        }
                        if closing {
                            break;
                        }
                    }
                    // Registry dropped the queue; tear the channel down.
                    None => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => registry.complete(&client_id, frame),
                            Err(e) => warn!(%client_id, "undecodable callback frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%client_id, "callback channel transport error: {e}");
                        break;
                    }
                }
            }
        }
    }

    registry.deregister(&client_id);
    debug!(%client_id, "callback channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HttpRequest, HttpResponse};

    #[test]
    fn server_frames_carry_the_type_tag() {
        let frame = ServerFrame::Request {
            correlation_id: "c1".to_string(),
            request: HttpRequest::new("GET", "/cb"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert_eq!(json["correlation_id"], "c1");
        assert_eq!(json["request"]["path"], "/cb");

        let forward = ServerFrame::ForwardRequest {
            correlation_id: "c2".to_string(),
            request: HttpRequest::new("GET", "/f"),
        };
        assert_eq!(serde_json::to_value(&forward).unwrap()["type"], "forward_request");
    }

    #[test]
    fn client_frames_round_trip() {
        let raw = serde_json::json!({
            "type": "response",
            "correlation_id": "c1",
            "payload": {"statusCode": 201, "body": "ok"}
        });
        let frame: ClientFrame = serde_json::from_value(raw).unwrap();
        match frame {
            ClientFrame::Response { correlation_id, payload } => {
                assert_eq!(correlation_id, "c1");
                assert_eq!(payload, HttpResponse::new(201).with_body("ok"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn upgrade_detection_requires_both_headers() {
        let mut headers = hyper::HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(UPGRADE, "websocket".parse().unwrap());
        assert!(!is_websocket_upgrade(&headers));

        headers.insert(CONNECTION, "keep-alive, Upgrade".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
    }
}
