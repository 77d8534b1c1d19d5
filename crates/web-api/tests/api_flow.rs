use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use application::{FixedClock, SeededRandomSource, SmsError, SmsGateway};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use config::AppConfig;
use domain::PhoneNumber;
use infrastructure::{Infrastructure, MemoryStore};
use reqwest::{header, Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use web_api::{router, AppState};

#[derive(Default)]
struct RecordingSms {
    codes: Mutex<HashMap<String, String>>,
}

impl RecordingSms {
    fn last_code(&self, phone: &str) -> String {
        self.codes.lock().unwrap().get(phone).cloned().unwrap()
    }
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn send_code(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), SmsError> {
        self.codes
            .lock()
            .unwrap()
            .insert(phone_number.as_str().to_string(), code.to_string());
        Ok(())
    }
}

struct TestServer {
    base: String,
    client: Client,
    sms: Arc<RecordingSms>,
}

impl TestServer {
    async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let sms = Arc::new(RecordingSms::default());
        let infra = Infrastructure {
            account_repository: store.clone(),
            session_repository: store.clone(),
            code_repository: store.clone(),
            room_repository: store,
            sms_gateway: sms.clone(),
        };
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
        ));
        let state = AppState::build(
            &AppConfig::default(),
            infra,
            clock,
            Arc::new(SeededRandomSource::new(42)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            sms,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// 返回 (token, 账号 ID)
    async fn login(&self, phone: &str) -> (String, String) {
        let resp = self
            .client
            .post(self.url(&format!("/v1/send_sms_code?phone_number={}", phone)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let code = self.sms.last_code(phone);
        let resp = self
            .client
            .post(self.url("/v1/login?logintype=smscode"))
            .json(&json!({ "phone_number": phone, "sms_code": code }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        (
            body["token"].as_str().unwrap().to_string(),
            body["user_info"]["id"].as_str().unwrap().to_string(),
        )
    }
}

#[tokio::test]
async fn test_health_and_request_id_echo() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/health"))
        .header("X-Reqid", "trace-42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-reqid"], "trace-42");

    let resp = server.client.get(server.url("/health")).send().await.unwrap();
    assert!(!resp.headers()["x-reqid"].is_empty());
}

#[tokio::test]
async fn test_login_sets_cookie_and_profile_roundtrip() {
    let server = TestServer::start().await;
    let phone = "13800000001";

    server
        .client
        .post(server.url(&format!("/v1/send_sms_code?phone_number={}", phone)))
        .send()
        .await
        .unwrap();
    let code = server.sms.last_code(phone);
    let resp = server
        .client
        .post(server.url("/v1/login?logintype=smscode"))
        .json(&json!({ "phone_number": phone, "sms_code": code }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("qlive_token="));
    assert!(cookie.contains("HttpOnly"));
    let token_pair = cookie.split(';').next().unwrap().to_string();

    let resp = server
        .client
        .put(server.url("/v1/profile"))
        .header(header::COOKIE, &token_pair)
        .json(&json!({ "nickname": "alice", "gender": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/v1/profile"))
        .header(header::COOKIE, &token_pair)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["nickname"], "alice");
}

#[tokio::test]
async fn test_unsupported_login_type() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/v1/login?logintype=password"))
        .json(&json!({ "phone_number": "13800000001", "sms_code": "123456" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_error_body_carries_code_and_request_id() {
    let server = TestServer::start().await;

    let resp = server
        .client
        .get(server.url("/v1/rooms"))
        .header("X-Reqid", "req-missing-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "token_invalid");
    assert_eq!(body["request_id"], "req-missing-token");

    let resp = server
        .client
        .post(server.url("/v1/send_sms_code?phone_number=12345"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_phone_number");
}

#[tokio::test]
async fn test_missing_phone_number_is_invalid_phone() {
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/v1/send_sms_code"))
        .header("X-Reqid", "req-no-phone")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "invalid_phone_number");
    assert_eq!(body["request_id"], "req-no-phone");
}

#[tokio::test]
async fn test_malformed_body_gets_structured_error() {
    let server = TestServer::start().await;
    let (token, _) = server.login("13800000004").await;

    let resp = server
        .client
        .post(server.url("/v1/rooms"))
        .bearer_auth(&token)
        .header("X-Reqid", "req-bad-json")
        .header(header::CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "bad_request");
    assert_eq!(body["request_id"], "req-bad-json");

    let resp = server
        .client
        .post(server.url("/v1/login"))
        .header("X-Reqid", "req-no-login-type")
        .json(&json!({ "phone_number": "13800000004", "sms_code": "123456" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["request_id"], "req-no-login-type");
}

#[tokio::test]
async fn test_room_and_pk_flow_over_http() {
    let server = TestServer::start().await;
    let (alice, _) = server.login("13800000001").await;
    let (bob, _) = server.login("13800000002").await;

    let resp = server
        .client
        .post(server.url("/v1/rooms"))
        .bearer_auth(&alice)
        .json(&json!({ "name": "alice-live" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let alice_room: Value = resp.json().await.unwrap();
    let alice_room_id = alice_room["id"].as_str().unwrap().to_string();
    assert!(alice_room["play_url"].as_str().unwrap().ends_with(&alice_room_id));

    let resp = server
        .client
        .post(server.url("/v1/rooms"))
        .bearer_auth(&bob)
        .json(&json!({ "name": "alice-live" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = server
        .client
        .post(server.url("/v1/rooms"))
        .bearer_auth(&bob)
        .json(&json!({ "name": "bob-live" }))
        .send()
        .await
        .unwrap();
    let bob_room: Value = resp.json().await.unwrap();
    let bob_room_id = bob_room["id"].as_str().unwrap().to_string();

    let resp = server
        .client
        .get(server.url("/v1/rooms?can_pk=true"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let candidates = body["rooms"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["id"], alice_room_id.as_str());

    let resp = server
        .client
        .post(server.url(&format!("/v1/rooms/{}/pk", bob_room_id)))
        .bearer_auth(&bob)
        .json(&json!({ "target_room_id": alice_room_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "pk_connected");
    assert_eq!(body["partner_room_id"], alice_room_id.as_str());

    // 非房主不能关闭房间
    let resp = server
        .client
        .post(server.url("/v1/close_room"))
        .bearer_auth(&bob)
        .json(&json!({ "room_id": alice_room_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = server
        .client
        .post(server.url("/v1/close_room"))
        .bearer_auth(&alice)
        .json(&json!({ "room_id": alice_room_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url(&format!("/v1/rooms/{}", bob_room_id)))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "single");
    assert!(body["partner_room_id"].is_null());

    let resp = server
        .client
        .get(server.url(&format!("/v1/rooms/{}", alice_room_id)))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_logout_invalidates_token() {
    let server = TestServer::start().await;
    let (token, _) = server.login("13800000003").await;

    let resp = server
        .client
        .post(server.url("/v1/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let cookie = resp.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.contains("Max-Age=0"));

    let resp = server
        .client
        .get(server.url("/v1/profile"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}
