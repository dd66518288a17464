//! End-to-end scenarios over real sockets: literal responses, bounded uses,
//! forwarding, remote callbacks, verification, and shutdown.

use decoy::matcher::RequestMatcherDef;
use decoy::model::{
    ExpectationDef, ForwardTarget, HttpResponse, ObjectCallbackDef, Times, VerificationTimes,
};
use decoy::{ClientError, MockClient, MockServer, Settings};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

async fn start_server() -> (MockServer, u16, MockClient) {
    let settings = Settings {
        local_bound_ip: "127.0.0.1".to_string(),
        ports: vec![0],
        ..Settings::default()
    };
    let server = MockServer::start(settings).await.expect("server starts");
    let port = server.local_port().expect("port bound");
    let client = MockClient::new("127.0.0.1", port);
    (server, port, client)
}

fn matcher(value: Value) -> RequestMatcherDef {
    serde_json::from_value(value).unwrap()
}

fn respond_expectation(value: Value, response: HttpResponse) -> ExpectationDef {
    ExpectationDef::new(matcher(value)).respond(response)
}

async fn get(port: u16, path: &str) -> reqwest::Response {
    reqwest::get(format!("http://127.0.0.1:{port}{path}"))
        .await
        .expect("request succeeds")
}

#[tokio::test]
async fn literal_respond_and_verify() {
    let (server, port, client) = start_server().await;

    let ids = client
        .register(&respond_expectation(
            json!({"method": "GET", "path": "/hello"}),
            HttpResponse::ok().with_body("hi"),
        ))
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    let response = get(port, "/hello").await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "hi");

    client
        .verify(
            &matcher(json!({"path": "/hello"})),
            &VerificationTimes::exactly(1),
        )
        .await
        .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn bounded_uses_yield_200_then_404() {
    let (server, port, client) = start_server().await;

    client
        .register(
            &respond_expectation(
                json!({"method": "GET", "path": "/hello"}),
                HttpResponse::ok().with_body("hi"),
            )
            .with_times(Times::exactly(1)),
        )
        .await
        .unwrap();

    assert_eq!(get(port, "/hello").await.status().as_u16(), 200);
    assert_eq!(get(port, "/hello").await.status().as_u16(), 404);

    // Both requests are journaled.
    let requests = client
        .retrieve_requests(Some(&matcher(json!({"path": "/hello"}))))
        .await
        .unwrap();
    assert_eq!(requests.len(), 2);

    server.stop().await;
}

#[tokio::test]
async fn bounded_uses_hold_under_concurrency() {
    let (server, port, client) = start_server().await;

    client
        .register(
            &respond_expectation(json!({"path": "/limited"}), HttpResponse::ok())
                .with_times(Times::exactly(3)),
        )
        .await
        .unwrap();

    let hits = futures_util::future::join_all(
        (0..8).map(|_| async move { get(port, "/limited").await.status().as_u16() }),
    )
    .await;

    let successes = hits.iter().filter(|&&status| status == 200).count();
    let misses = hits.iter().filter(|&&status| status == 404).count();
    assert_eq!(successes, 3);
    assert_eq!(misses, 5);

    server.stop().await;
}

#[tokio::test]
async fn forward_records_the_upstream_pair() {
    // The upstream is a second mock server with its own expectation.
    let (upstream, upstream_port, upstream_client) = start_server().await;
    upstream_client
        .register(&respond_expectation(
            json!({"path": "/u"}),
            HttpResponse::ok().with_body("U"),
        ))
        .await
        .unwrap();

    let (server, port, client) = start_server().await;
    client
        .register(&ExpectationDef::new(matcher(json!({"path": "/u"}))).forward(ForwardTarget {
            host: "127.0.0.1".to_string(),
            port: upstream_port,
            scheme: "http".to_string(),
        }))
        .await
        .unwrap();

    let response = get(port, "/u").await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "U");

    let retrieved = reqwest::Client::new()
        .put(format!(
            "http://127.0.0.1:{port}/mockserver/retrieve?type=REQUEST_RESPONSES"
        ))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    let interactions = retrieved.as_array().unwrap();
    assert_eq!(interactions.len(), 1);
    assert_eq!(interactions[0]["forwardedResponse"]["statusCode"], 200);
    assert_eq!(interactions[0]["forwardedResponse"]["body"], "U");

    server.stop().await;
    upstream.stop().await;
}

#[tokio::test]
async fn unreachable_upstream_surfaces_502() {
    let (server, port, client) = start_server().await;
    client
        .register(&ExpectationDef::new(matcher(json!({"path": "/down"}))).forward(
            ForwardTarget {
                host: "127.0.0.1".to_string(),
                port: 1,
                scheme: "http".to_string(),
            },
        ))
        .await
        .unwrap();

    assert_eq!(get(port, "/down").await.status().as_u16(), 502);
    server.stop().await;
}

#[tokio::test]
async fn object_callback_round_trip() {
    let (server, port, client) = start_server().await;

    // Open the callback channel and pick up the assigned client id.
    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let (mut ws, handshake) = tokio_tungstenite::client_async(
        format!("ws://127.0.0.1:{port}/_mockserver_callback_websocket"),
        stream,
    )
    .await
    .unwrap();
    let client_id = handshake
        .headers()
        .get("X-CLIENT-REGISTRATION-ID")
        .expect("registration id header")
        .to_str()
        .unwrap()
        .to_string();

    let mut expectation = ExpectationDef::new(matcher(json!({"path": "/cb"})));
    expectation.http_object_callback = Some(ObjectCallbackDef {
        client_id: client_id.clone(),
    });
    client.register(&expectation).await.unwrap();

    // Answer the first request frame on the channel.
    let responder = tokio::spawn(async move {
        while let Some(frame) = ws.next().await {
            match frame.unwrap() {
                Message::Text(text) => {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(frame["type"], "request");
                    assert_eq!(frame["request"]["path"], "/cb");
                    let reply = json!({
                        "type": "response",
                        "correlation_id": frame["correlation_id"],
                        "payload": {"statusCode": 201, "body": "ok"}
                    });
                    ws.send(Message::Text(reply.to_string())).await.unwrap();
                    break;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        ws
    });

    let response = tokio::time::timeout(Duration::from_secs(2), get(port, "/cb"))
        .await
        .expect("callback answered within 2s");
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.text().await.unwrap(), "ok");

    responder.await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn concurrent_callbacks_stay_correlated() {
    let (server, port, client) = start_server().await;

    let stream = tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap();
    let (mut ws, handshake) = tokio_tungstenite::client_async(
        format!("ws://127.0.0.1:{port}/_mockserver_callback_websocket"),
        stream,
    )
    .await
    .unwrap();
    let client_id = handshake
        .headers()
        .get("X-CLIENT-REGISTRATION-ID")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let mut expectation = ExpectationDef::new(matcher(json!({"path": "/echo/.*"})));
    expectation.http_object_callback = Some(ObjectCallbackDef { client_id });
    client.register(&expectation).await.unwrap();

    // Echo each request's path back in the response body.
    let responder = tokio::spawn(async move {
        let mut answered = 0;
        while answered < 4 {
            let Some(Ok(Message::Text(text))) = ws.next().await else {
                continue;
            };
            let frame: Value = serde_json::from_str(&text).unwrap();
            let reply = json!({
                "type": "response",
                "correlation_id": frame["correlation_id"],
                "payload": {"statusCode": 200, "body": frame["request"]["path"]}
            });
            ws.send(Message::Text(reply.to_string())).await.unwrap();
            answered += 1;
        }
    });

    let bodies = futures_util::future::join_all((0..4).map(|i| async move {
        let response = get(port, &format!("/echo/{i}")).await;
        (i, response.text().await.unwrap())
    }))
    .await;

    for (i, body) in bodies {
        assert_eq!(body, format!("/echo/{i}"));
    }

    responder.await.unwrap();
    server.stop().await;
}

#[tokio::test]
async fn unmatched_request_is_recorded_with_no_expectation() {
    let (server, port, client) = start_server().await;

    assert_eq!(get(port, "/anything").await.status().as_u16(), 404);

    let retrieved = reqwest::Client::new()
        .put(format!(
            "http://127.0.0.1:{port}/mockserver/retrieve?type=REQUEST_RESPONSES"
        ))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    let interactions = retrieved.as_array().unwrap();
    assert_eq!(interactions.len(), 1);
    assert!(interactions[0].get("expectationId").is_none());

    client
        .verify(
            &matcher(json!({"path": "/anything"})),
            &VerificationTimes::exactly(1),
        )
        .await
        .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn journal_sequences_are_ordered_and_contiguous() {
    let (server, port, _client) = start_server().await;

    for i in 0..5 {
        get(port, &format!("/seq/{i}")).await;
    }

    let retrieved = reqwest::Client::new()
        .put(format!(
            "http://127.0.0.1:{port}/mockserver/retrieve?type=REQUEST_RESPONSES"
        ))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    let sequences: Vec<u64> = retrieved
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["sequence"].as_u64().unwrap())
        .collect();
    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);

    server.stop().await;
}

#[tokio::test]
async fn verify_sequence_respects_order() {
    let (server, port, client) = start_server().await;

    get(port, "/first").await;
    get(port, "/noise").await;
    get(port, "/second").await;

    client
        .verify_sequence(&[
            matcher(json!({"path": "/first"})),
            matcher(json!({"path": "/second"})),
        ])
        .await
        .unwrap();

    let err = client
        .verify_sequence(&[
            matcher(json!({"path": "/second"})),
            matcher(json!({"path": "/first"})),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Verification(_)));

    server.stop().await;
}

#[tokio::test]
async fn reset_is_idempotent_and_empties_state() {
    let (server, port, client) = start_server().await;

    client
        .register(&respond_expectation(
            json!({"path": "/hello"}),
            HttpResponse::ok(),
        ))
        .await
        .unwrap();
    get(port, "/hello").await;

    client.reset().await.unwrap();
    assert!(client.retrieve_requests(None).await.unwrap().is_empty());
    // Expectations are gone too.
    assert_eq!(get(port, "/hello").await.status().as_u16(), 404);

    // A second reset is a no-op. The 404 above was journaled; clear again.
    client.reset().await.unwrap();
    assert!(client.retrieve_requests(None).await.unwrap().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn status_and_bind_manage_ports() {
    let (server, port, client) = start_server().await;

    assert_eq!(client.status().await.unwrap(), vec![port]);

    let ports = client.bind(&[0]).await.unwrap();
    assert_eq!(ports.len(), 2);
    assert_eq!(ports[0], port);

    // The new port serves mock traffic too.
    client
        .register(&respond_expectation(
            json!({"path": "/on-new-port"}),
            HttpResponse::ok(),
        ))
        .await
        .unwrap();
    assert_eq!(
        get(ports[1], "/on-new-port").await.status().as_u16(),
        200
    );

    server.stop().await;
}

#[tokio::test]
async fn stop_via_api_releases_the_port_and_stops_the_client() {
    let (_server, port, client) = start_server().await;

    client.stop().await.unwrap();

    // /stop acknowledges before shutdown completes; wait for the port.
    let mut released = false;
    for _ in 0..50 {
        if std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
            released = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(released, "port {port} not released after stop");

    let err = client.status().await.unwrap_err();
    assert!(matches!(err, ClientError::Stopped));
    assert_eq!(
        err.to_string(),
        "Request sent after client has been stopped"
    );
}

#[tokio::test]
async fn self_targeted_forward_is_hidden_from_verification() {
    let (server, port, client) = start_server().await;

    // Forward /outer into this same server, where /inner answers.
    client
        .register(&respond_expectation(
            json!({"path": "/inner"}),
            HttpResponse::ok().with_body("inner"),
        ))
        .await
        .unwrap();
    let mut override_def = ExpectationDef::new(matcher(json!({"path": "/outer"})));
    override_def.http_override_forwarded_request = Some(serde_json::from_value(json!({
        "host": "127.0.0.1",
        "port": port,
        "overrides": {"path": "/inner"}
    }))
    .unwrap());
    client.register(&override_def).await.unwrap();

    let response = get(port, "/outer").await;
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "inner");

    // The re-entry is journaled as a distinct interaction...
    let requests = client.retrieve_requests(None).await.unwrap();
    assert_eq!(requests.len(), 2);

    // ...but does not count toward verification.
    client
        .verify(
            &matcher(json!({"path": "/inner"})),
            &VerificationTimes::exactly(0),
        )
        .await
        .unwrap();
    client
        .verify(
            &matcher(json!({"path": "/outer"})),
            &VerificationTimes::exactly(1),
        )
        .await
        .unwrap();

    server.stop().await;
}

#[tokio::test]
async fn expectation_with_bad_matcher_is_rejected() {
    let (server, port, _client) = start_server().await;

    let response = reqwest::Client::new()
        .put(format!("http://127.0.0.1:{port}/mockserver/expectation"))
        .json(&json!({
            "httpRequest": {"headers": {"x": {"matches": "a(b"}}},
            "httpResponse": {"statusCode": 200}
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    server.stop().await;
}

#[tokio::test]
async fn legacy_root_paths_reach_the_management_api() {
    let (server, port, _client) = start_server().await;

    let response = reqwest::Client::new()
        .put(format!("http://127.0.0.1:{port}/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["ports"][0].as_u64().unwrap(), u64::from(port));

    server.stop().await;
}

#[tokio::test]
async fn error_action_drops_the_connection() {
    let (server, port, client) = start_server().await;

    let mut expectation = ExpectationDef::new(matcher(json!({"path": "/broken"})));
    expectation.http_error =
        Some(serde_json::from_value(json!({"type": "DROP_CONNECTION"})).unwrap());
    client.register(&expectation).await.unwrap();

    let result = reqwest::get(format!("http://127.0.0.1:{port}/broken")).await;
    assert!(result.is_err(), "expected a transport error, got {result:?}");

    server.stop().await;
}
