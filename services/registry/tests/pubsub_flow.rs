mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{read_json, send, test_env, APP_ID, OTHER_APP_ID};
use http_helpers::{json_request, secret_request};
use http_body_util::BodyExt;
use std::time::{Duration, Instant};

fn publish_body(topic: &str, payloads: &[&str]) -> serde_json::Value {
    let msgs: Vec<serde_json::Value> = payloads
        .iter()
        .map(|payload| {
            serde_json::json!({"topic": topic, "payload": BASE64.encode(payload.as_bytes())})
        })
        .collect();
    serde_json::json!({"msgs": msgs})
}

fn consume_body(topic: &str, group_id: u64, ack_timeout_milli: u64) -> serde_json::Value {
    serde_json::json!({
        "consumptions": [{
            "topic": topic,
            "group_id": group_id,
            "ack_timeout_milli": ack_timeout_milli,
        }]
    })
}

fn ack_body(topic: &str, group_id: u64, msg_ids: &[&str]) -> serde_json::Value {
    serde_json::json!({
        "acks": [{"topic": topic, "group_id": group_id, "msg_ids": msg_ids}]
    })
}

fn payload_of(msg: &serde_json::Value) -> String {
    let decoded = BASE64
        .decode(msg["payload"].as_str().expect("payload"))
        .expect("base64");
    String::from_utf8(decoded).expect("utf8")
}

/// Pull the next `data:` event off an SSE body, skipping keep-alives.
async fn next_sse_json(body: &mut axum::body::Body, buffer: &mut String) -> serde_json::Value {
    loop {
        if let Some(end) = buffer.find("\n\n") {
            let event: String = buffer[..end].to_string();
            buffer.drain(..end + 2);
            let data: String = event
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|line| line.trim_start())
                .collect();
            if data.is_empty() {
                continue;
            }
            return serde_json::from_str(&data).expect("sse json");
        }
        let frame = body.frame().await.expect("frame").expect("frame body");
        if let Ok(data) = frame.into_data() {
            buffer.push_str(std::str::from_utf8(&data).expect("utf8"));
        }
    }
}

#[tokio::test]
async fn publish_requires_secret_trust() {
    let env = test_env().await;
    let response = send(
        &env.router,
        json_request("POST", "/v1/pubsub/publish", publish_body("t", &["x"])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unacked_message_is_redelivered_after_timeout() {
    let env = test_env().await;
    let published = send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("orders", &["m1"])),
    )
    .await;
    assert_eq!(published.status(), StatusCode::OK);

    let first = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 300)),
    )
    .await;
    assert_eq!(first.status(), StatusCode::OK);
    let body = read_json(first).await;
    let msgs = body["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(payload_of(&msgs[0]), "m1");
    let first_id = msgs[0]["id"].as_str().expect("id").to_string();

    // Never acked: after the ack timeout the entry is claimable again.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 300)),
    )
    .await;
    let body = read_json(second).await;
    let msgs = body["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["id"].as_str().expect("id"), first_id);
}

#[tokio::test]
async fn ack_is_idempotent_and_stops_redelivery() {
    let env = test_env().await;
    send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("orders", &["m1"])),
    )
    .await;

    let consumed = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 200)),
    )
    .await;
    let body = read_json(consumed).await;
    let msg_id = body["msgs"][0]["id"].as_str().expect("id").to_string();

    // Ack twice; the second is a no-op and still succeeds.
    for _ in 0..2 {
        let acked = send(
            &env.router,
            secret_request(
                "/v1/pubsub/consume",
                APP_ID,
                ack_body("orders", 1, &[msg_id.as_str()]),
            ),
        )
        .await;
        assert_eq!(acked.status(), StatusCode::OK);
        assert!(read_json(acked).await["msgs"].as_array().expect("msgs").is_empty());
    }

    // Wait out the ack timeout: the acked entry must not come back, only
    // newly published work.
    send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("orders", &["m2"])),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let next = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 200)),
    )
    .await;
    let body = read_json(next).await;
    let msgs = body["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(payload_of(&msgs[0]), "m2");
}

#[tokio::test]
async fn group_delivers_new_messages_while_one_is_in_flight() {
    let env = test_env().await;
    send(
        &env.router,
        secret_request(
            "/v1/pubsub/publish",
            APP_ID,
            publish_body("orders", &["m1", "m2"]),
        ),
    )
    .await;

    let first = read_json(
        send(
            &env.router,
            secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 500)),
        )
        .await,
    )
    .await;
    assert_eq!(payload_of(&first["msgs"][0]), "m1");

    // m1 is pending but not yet stale, so the group cursor moves on.
    let second = read_json(
        send(
            &env.router,
            secret_request("/v1/pubsub/consume", APP_ID, consume_body("orders", 1, 500)),
        )
        .await,
    )
    .await;
    assert_eq!(payload_of(&second["msgs"][0]), "m2");
}

#[tokio::test]
async fn consume_returns_as_soon_as_any_consumption_has_messages() {
    let env = test_env().await;
    send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("busy", &["m1"])),
    )
    .await;

    let body = serde_json::json!({
        "consumptions": [
            {"topic": "busy", "group_id": 1, "ack_timeout_milli": 5000},
            {"topic": "idle", "group_id": 1, "ack_timeout_milli": 5000},
        ]
    });
    let started = Instant::now();
    let response = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, body),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    // The idle worker was cancelled rather than waiting out its block.
    assert!(started.elapsed() < Duration::from_secs(3));
    let body = read_json(response).await;
    let msgs = body["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(payload_of(&msgs[0]), "m1");
}

#[tokio::test]
async fn subscribe_tails_and_resumes_after_id() {
    let env = test_env().await;
    send(
        &env.router,
        secret_request(
            "/v1/pubsub/publish",
            APP_ID,
            publish_body("chat", &["m1", "m2"]),
        ),
    )
    .await;

    let sub_body = serde_json::json!({
        "subscriptions": [{"topic": "chat", "since_milli_timestamp": 0, "batch_size": 16}]
    });
    let response = send(
        &env.router,
        secret_request("/v1/pubsub/subscribe", APP_ID, sub_body),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body();
    let mut buffer = String::new();

    let first = next_sse_json(&mut body, &mut buffer).await;
    let msgs = first["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 2);
    assert_eq!(payload_of(&msgs[0]), "m1");
    assert_eq!(payload_of(&msgs[1]), "m2");
    let first_id = msgs[0]["id"].as_str().expect("id").to_string();

    // A second subscriber resuming after m1 sees only m2.
    let resume_body = serde_json::json!({
        "subscriptions": [{
            "topic": "chat",
            "since_milli_timestamp": 0,
            "after_id": first_id,
            "batch_size": 16,
        }]
    });
    let resumed = send(
        &env.router,
        secret_request("/v1/pubsub/subscribe", APP_ID, resume_body),
    )
    .await;
    let mut resumed_body = resumed.into_body();
    let mut resumed_buffer = String::new();
    let frame = next_sse_json(&mut resumed_body, &mut resumed_buffer).await;
    let msgs = frame["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(payload_of(&msgs[0]), "m2");

    // The original tail keeps delivering new publishes.
    send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("chat", &["m3"])),
    )
    .await;
    let next = next_sse_json(&mut body, &mut buffer).await;
    assert_eq!(payload_of(&next["msgs"][0]), "m3");
}

#[tokio::test]
async fn topics_are_isolated_per_tenant() {
    let env = test_env().await;
    send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, publish_body("shared", &["alpha-msg"])),
    )
    .await;
    send(
        &env.router,
        secret_request(
            "/v1/pubsub/publish",
            OTHER_APP_ID,
            publish_body("shared", &["beta-msg"]),
        ),
    )
    .await;

    let consumed = send(
        &env.router,
        secret_request(
            "/v1/pubsub/consume",
            OTHER_APP_ID,
            consume_body("shared", 1, 300),
        ),
    )
    .await;
    let body = read_json(consumed).await;
    let msgs = body["msgs"].as_array().expect("msgs");
    assert_eq!(msgs.len(), 1);
    assert_eq!(payload_of(&msgs[0]), "beta-msg");
}

#[tokio::test]
async fn publish_rejects_garbage_payloads_and_zero_timeouts() {
    let env = test_env().await;
    let bad_payload = serde_json::json!({
        "msgs": [{"topic": "chat", "payload": "%%% not base64 %%%"}]
    });
    let response = send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, bad_payload),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let zero_timeout = send(
        &env.router,
        secret_request("/v1/pubsub/consume", APP_ID, consume_body("chat", 1, 0)),
    )
    .await;
    assert_eq!(zero_timeout.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publish_without_create_topic_requires_the_stream() {
    let env = test_env().await;
    let body = serde_json::json!({
        "msgs": [{"topic": "ghost", "payload": BASE64.encode(b"x")}],
        "opts": {"create_topic": false},
    });
    let response = send(
        &env.router,
        secret_request("/v1/pubsub/publish", APP_ID, body),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
