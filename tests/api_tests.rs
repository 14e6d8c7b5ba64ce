//! End-to-end checks of the auth and quota layers through the router.

use axum::{
    body::{to_bytes, Body},
    extract::ConnectInfo,
    Router,
};
use chrono::Utc;
use geo6_api::{
    auth::credential::{
        issue_signed_token, sign_shared_secret, CONSUMER_HEADER, TIMESTAMP_HEADER, TOKEN_HEADER,
    },
    create_app,
    utils::config::{AccessConfig, DatabaseConfig, QuotaConfig, ServerConfig},
    AppState, Config, PeerAddrs, PolicyStore,
};
use http::{header, request::Builder, Request, StatusCode};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tempfile::TempDir;
use tower::ServiceExt;

const HOST: &str = "geo.example.be";
const SERVER: &str = "10.0.0.1:8080";
/// base64url of `acme-secret`, usable for both credential schemes
const SECRET: &str = "YWNtZS1zZWNyZXQ";
const ACCESS: &str = r#"
acme:
  secret: YWNtZS1zZWNyZXQ
  ip: ["10.0.0.5"]
  limit:
    database: 3
  database:
    address: [picc, nope]
    poi: [bpost]
"#;

struct TestApp {
    app: Router,
    quota_dir: TempDir,
}

fn test_app(debug: bool) -> TestApp {
    let quota_dir = TempDir::new().unwrap();
    let config = Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            name: Some(HOST.to_string()),
            cors_origins: vec!["*".to_string()],
        },
        access: AccessConfig {
            file: "unused.yaml".into(),
        },
        quota: QuotaConfig {
            directory: quota_dir.path().to_path_buf(),
        },
        database: DatabaseConfig {
            postgrest_url: None,
            postgrest_key: None,
            poi_sources: vec!["urbis".to_string(), "bpost".to_string()],
        },
        debug,
    };
    let policies = PolicyStore::from_yaml_str(ACCESS).unwrap();

    TestApp {
        app: create_app(AppState::new(config, policies)),
        quota_dir,
    }
}

fn request(path: &str, client: &str) -> Builder {
    Request::builder()
        .uri(path)
        .header(header::HOST, HOST)
        .extension(ConnectInfo(PeerAddrs {
            remote: client.parse::<SocketAddr>().unwrap(),
            local: Some(SERVER.parse().unwrap()),
        }))
}

fn signed_request(path: &str, client: &str) -> Request<Body> {
    let now = Utc::now().timestamp();
    let token = sign_shared_secret(SECRET, "acme", now, HOST, "GET", path).unwrap();

    request(path, client)
        .header(CONSUMER_HEADER, "acme")
        .header(TOKEN_HEADER, token)
        .header(TIMESTAMP_HEADER, now.to_string())
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

#[tokio::test]
async fn test_ping_never_rejected() {
    let test = test_app(false);
    let request = request("/ping", "192.168.1.20:40000")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["now"].is_i64());
    assert_eq!(body["token"]["consumer"], "");
    assert!(body["token"]["error"]
        .as_str()
        .unwrap()
        .starts_with("Missing or malformed credential"));
}

#[tokio::test]
async fn test_ping_allows_valid_consumer_from_foreign_ip() {
    let test = test_app(false);
    let (status, body) = send(&test.app, signed_request("/ping", "10.0.0.9:40000")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"]["consumer"], "acme");
    assert_eq!(body["token"]["error"], "Unauthorized ip \"10.0.0.9\".");
    // Failed callers keep the default grants.
    assert_eq!(body["token"]["database"]["poi"], json!(["urbis"]));
}

#[tokio::test]
async fn test_lowercase_bearer_scheme_accepted() {
    let test = test_app(false);
    let jwt = issue_signed_token("acme", SECRET, "tests", Utc::now().timestamp()).unwrap();
    let request = request("/geocode/getDatabaseList", "10.0.0.5:40000")
        .header(header::AUTHORIZATION, format!("bearer {jwt}"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], json!(["crab", "picc", "urbis"]));
}

#[tokio::test]
async fn test_missing_credentials_rejected() {
    let test = test_app(false);
    let request = request("/geocode/getDatabaseList", "192.168.1.20:40000")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("Missing or malformed credential"));
}

#[tokio::test]
async fn test_signed_request_gets_grants() {
    let test = test_app(false);
    let (status, body) = send(
        &test.app,
        signed_request("/geocode/getDatabaseList", "10.0.0.5:40000"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], json!(["crab", "picc", "urbis"]));
    assert_eq!(body["poi"], json!(["bpost", "urbis"]));
    assert!(body.get("token").is_none());
    assert!(body.get("quota").is_none());
}

#[tokio::test]
async fn test_bearer_token_accepted() {
    let test = test_app(false);
    let jwt = issue_signed_token("acme", SECRET, "tests", Utc::now().timestamp()).unwrap();
    let request = request("/geocode/getDatabaseList", "10.0.0.5:40000")
        .header(header::AUTHORIZATION, format!("Bearer {jwt}"))
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["poi"], json!(["bpost", "urbis"]));
}

#[tokio::test]
async fn test_ip_mismatch_rejected() {
    let test = test_app(false);
    let (status, body) = send(
        &test.app,
        signed_request("/geocode/getDatabaseList", "10.0.0.9:40000"),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({"error": "Unauthorized ip \"10.0.0.9\"."}));
}

#[tokio::test]
async fn test_local_call_exempt() {
    let test = test_app(false);
    let (status, body) = send(
        &test.app,
        signed_request("/geocode/getDatabaseList", "10.0.0.1:40000"),
    )
    .await;

    // Failure is carried, not enforced, so grants fall back to the defaults.
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], json!(["crab", "urbis"]));
    assert_eq!(body["poi"], json!(["urbis"]));
}

#[tokio::test]
async fn test_debug_echoes_context() {
    let test = test_app(true);
    let (status, body) = send(
        &test.app,
        signed_request("/geocode/getDatabaseList", "10.0.0.9:40000"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token"]["consumer"], "acme");
    assert_eq!(body["token"]["error"], "Unauthorized ip \"10.0.0.9\".");
    assert_eq!(body["token"]["query"], "/geocode/getDatabaseList");
    assert_eq!(body["quota"]["debug"], true);
    assert_eq!(body["quota"]["error"], Value::Null);
}

#[tokio::test]
async fn test_quota_exceeded() {
    let test = test_app(false);

    for expected in 1..=3 {
        let (status, _) = send(
            &test.app,
            signed_request("/geocode/getDatabaseList", "10.0.0.5:40000"),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "call {expected}");
    }

    let (status, body) = send(
        &test.app,
        signed_request("/geocode/getDatabaseList", "10.0.0.5:40000"),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body,
        json!({"error": "Quota exceeded for action \"database\""})
    );

    let record = std::fs::read_to_string(test.quota_dir.path().join("acme.json")).unwrap();
    let record: Value = serde_json::from_str(&record).unwrap();
    assert_eq!(record, json!({"database": 4}));
}

#[tokio::test]
async fn test_ping_not_metered() {
    let test = test_app(false);
    let request = signed_request("/ping", "10.0.0.5:40000");

    let (status, _) = send(&test.app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!test.quota_dir.path().join("acme.json").exists());
}
