//! HTTP surface tests driving the router in-process.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::{claimant, Harness, SIGNER};
use serde_json::{json, Value};
use std::time::Duration;
use tokengate_common::types::Address;
use tokengate_gateway::chain::ChainError;
use tokengate_gateway::testing::ScriptedChain;
use tower::ServiceExt;

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_claim_then_rate_limited() {
    let h = Harness::new();
    let app = h.router();
    let uri = format!("/request/{}", claimant());

    let (status, _, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], claimant().to_string());
    assert_eq!(body["amount"], "100");
    assert_eq!(body["remainingBalance"], "999900");
    assert!(body["transactionHash"].as_str().unwrap().starts_with("0x"));

    let (status, headers, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(headers[header::RETRY_AFTER], "86400");
    assert_eq!(body["error"], "RATE_LIMITED");
    assert_eq!(body["retryAfterSecs"], 86400);
    assert_eq!(body["outcome"]["status"], "rejected");
}

#[tokio::test]
async fn test_claim_survives_client_disconnect() {
    let h = Harness::with_chain(ScriptedChain::new(SIGNER).with_submit_delay(Duration::from_millis(100)));
    let app = h.router();
    let uri = format!("/request/{}", claimant());

    // The client gives up while the transfer is still being broadcast
    let abandoned = tokio::time::timeout(Duration::from_millis(20), app.clone().oneshot(get(&uri))).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.chain.submitted().len(), 1);
    assert_eq!(h.ledger.get(&claimant()).unwrap(), Some(0));

    let (status, _, body) = send(&app, get(&uri)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "RATE_LIMITED");
    assert_eq!(h.chain.submitted().len(), 1);
}

#[tokio::test]
async fn test_claim_by_body() {
    let h = Harness::new();
    let app = h.router();

    let (status, _, body) = send(&app, post_json("/request-tokens", json!({ "address": claimant() }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["amount"], "100");

    let (status, _, body) = send(&app, post_json("/request-tokens", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "address");
}

#[tokio::test]
async fn test_invalid_recipient_is_bad_request() {
    let h = Harness::new();
    let app = h.router();

    let (status, _, body) = send(
        &app,
        post_json("/transfer", json!({ "recipientAddress": "0xnothex", "amount": 10 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["field"], "recipientAddress");
    assert_eq!(h.chain.write_calls(), 0);
    assert_eq!(h.chain.read_calls(), 0);
}

#[tokio::test]
async fn test_intents_accept_string_and_number_amounts() {
    let h = Harness::new();
    let app = h.router();
    let recipient = Address([0x22; 20]);

    let (status, _, body) = send(
        &app,
        post_json("/transfer", json!({ "recipientAddress": recipient, "amount": "250" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "transfer");
    assert_eq!(body["to"], recipient.to_string());
    assert_eq!(body["amount"], "250");

    let (status, _, body) = send(
        &app,
        post_json("/approve", json!({ "spenderAddress": recipient, "amount": 5_000_000 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "approve");

    let (status, _, body) = send(
        &app,
        post_json("/mint", json!({ "recipientAddress": recipient, "amount": "-3" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "amount");

    assert_eq!(h.chain.submitted().len(), 2);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let h = Harness::new();
    let app = h.router();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/mint")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "body");
}

#[tokio::test]
async fn test_chain_rejection_is_unprocessable() {
    let h = Harness::new();
    let app = h.router();
    h.chain
        .fail_submit_with(ChainError::Rejected("ERC20: transfer amount exceeds balance".to_string()));

    let (status, _, body) = send(
        &app,
        post_json("/transfer", json!({ "recipientAddress": claimant(), "amount": 1 })),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "CHAIN_REJECTED");
    assert_eq!(
        body["outcome"]["errorDetail"],
        "ERC20: transfer amount exceeds balance"
    );
}

#[tokio::test]
async fn test_read_endpoints() {
    let h = Harness::new();
    let app = h.router();
    let holder = Address([0x33; 20]);
    h.chain.set_balance(holder, 1_234);
    h.chain.set_allowance(holder, SIGNER, 99);

    let (status, _, body) = send(&app, get(&format!("/balance/{}", holder))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], "1234");

    let (status, _, body) = send(&app, get(&format!("/allowance/{}/{}", holder, SIGNER))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["allowance"], "99");

    let (status, _, _) = send(&app, get("/balance/0x1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(&app, get(&format!("/request/{}", claimant()))).await;
    let (status, _, body) = send(&app, get("/request-history")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["records"][0]["address"], claimant().to_string());
    assert_eq!(body["records"][0]["lastClaimAt"], 0);
}

#[tokio::test]
async fn test_service_endpoints() {
    let h = Harness::new();
    let app = h.router();

    let (status, _, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    send(&app, get(&format!("/request/{}", claimant()))).await;

    let (status, _, body) = send(&app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], SIGNER.to_string());
    assert_eq!(body["totalDistributions"], 1);
    assert_eq!(body["dispenseAmount"], "100");

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("tokengate_requests_total{operation=\"claim\",outcome=\"accepted\"} 1"));
}
