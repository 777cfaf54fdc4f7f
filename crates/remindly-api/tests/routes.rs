use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use remindly_api::ledger::Ledger;
use remindly_api::{AppState, AppStateInner, router};
use remindly_db::Database;
use remindly_gateway::dispatcher::Dispatcher;
use remindly_gateway::error::CollaboratorError;
use remindly_gateway::http::{DEFAULT_UPSTREAM_TIMEOUT, build_client};
use remindly_gateway::notifier::{Notifier, WechatConfig};
use remindly_gateway::reply::ReplyGenerator;
use remindly_gateway::signature;
use remindly_types::api::Claims;

const JWT_SECRET: &str = "test-secret";
const WECHAT_TOKEN: &str = "wechat-token";

struct Echo;

#[async_trait]
impl ReplyGenerator for Echo {
    async fn generate(&self, message: &str) -> Result<String, CollaboratorError> {
        Ok(format!("you said: {message}"))
    }
}

fn app() -> Router {
    let db = Database::open_in_memory().unwrap();
    let state: AppState = Arc::new(AppStateInner {
        ledger: Ledger::new(db),
        dispatcher: Dispatcher::new(Arc::new(Echo)),
        notifier: Notifier::new(
            build_client(DEFAULT_UPSTREAM_TIMEOUT).unwrap(),
            WechatConfig::new(WECHAT_TOKEN),
        ),
        wechat_token: WECHAT_TOKEN.to_string(),
        jwt_secret: JWT_SECRET.to_string(),
    });
    router(state)
}

fn token_for(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        username: user_id.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, String) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send_json(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, req).await;
    let value = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, value)
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    builder.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(user) = user {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token_for(user)));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn create_order(app: &Router, user: &str, plan: &str) -> String {
    let (status, body) = send_json(
        app,
        post_json(
            "/api/payment/create",
            Some(user),
            json!({ "planType": plan, "paymentMethod": "alipay" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["data"]["orderId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let (status, body) = send_json(&app(), get("/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn handshake_echoes_on_valid_signature() {
    let app = app();
    let sig = signature::sign("1700000000", "abc", WECHAT_TOKEN);
    let uri = format!(
        "/api/weixin/msg?signature={sig}&timestamp=1700000000&nonce=abc&echostr=hello123"
    );

    let (status, body) = send(&app, get(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello123");
}

#[tokio::test]
async fn handshake_rejects_bad_or_missing_parameters() {
    let app = app();

    let uri = "/api/weixin/msg?signature=deadbeef&timestamp=1700000000&nonce=abc&echostr=x";
    let (status, body) = send(&app, get(uri, None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "error");

    let (status, body) = send(&app, get("/api/weixin/msg?timestamp=1&nonce=abc", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "error");
}

#[tokio::test]
async fn text_message_gets_xml_reply() {
    let app = app();
    let xml = "<xml><ToUserName><![CDATA[gh_account]]></ToUserName>\
               <FromUserName><![CDATA[user_1]]></FromUserName>\
               <CreateTime>1700000000</CreateTime>\
               <MsgType><![CDATA[text]]></MsgType>\
               <Content><![CDATA[hello]]></Content>\
               <MsgId>1</MsgId></xml>";
    let req = Request::builder()
        .method("POST")
        .uri("/api/weixin/msg")
        .header(header::CONTENT_TYPE, "text/xml")
        .body(Body::from(xml))
        .unwrap();

    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/xml"));

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("<ToUserName><![CDATA[user_1]]></ToUserName>"));
    assert!(body.contains("<FromUserName><![CDATA[gh_account]]></FromUserName>"));
    assert!(body.contains("<Content><![CDATA[you said: hello]]></Content>"));
}

#[tokio::test]
async fn unanswerable_messages_are_acknowledged() {
    let app = app();
    let image = "<xml><ToUserName>gh</ToUserName><FromUserName>u</FromUserName>\
                 <CreateTime>1</CreateTime><MsgType>image</MsgType></xml>";

    for body in [image, "garbage"] {
        let req = Request::builder()
            .method("POST")
            .uri("/api/weixin/msg")
            .body(Body::from(body))
            .unwrap();
        let (status, text) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(text, "success");
    }
}

#[tokio::test]
async fn protected_routes_require_token() {
    let app = app();
    for uri in [
        "/api/payment/subscription",
        "/api/payment/history",
        "/api/payment/status/order_x",
        "/api/weixin/sendmsg?openid=u",
    ] {
        let (status, _) = send(&app, get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
    }

    let req = Request::builder()
        .method("GET")
        .uri("/api/payment/subscription")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn order_lifecycle_grants_subscription() {
    let app = app();

    let (status, body) = send_json(&app, get("/api/payment/subscription", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["planType"], "free");
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["expiresAt"], Value::Null);

    let order_id = create_order(&app, "u1", "premium").await;

    let (status, body) = send_json(&app, get(&format!("/api/payment/status/{order_id}"), Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["amount"], 29.9);

    let callback = json!({ "orderId": order_id, "transactionId": "tx_1", "status": "completed" });
    let (status, body) =
        send_json(&app, post_json("/api/payment/callback/alipay", None, callback.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    // Redelivery is acknowledged without granting a second subscription.
    let (status, _) = send_json(&app, post_json("/api/payment/callback/alipay", None, callback)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send_json(&app, get("/api/payment/subscription", Some("u1"))).await;
    assert_eq!(body["data"]["planType"], "premium");
    assert_eq!(body["data"]["status"], "active");
    assert!(body["data"]["expiresAt"].is_string());

    let (_, body) = send_json(&app, get(&format!("/api/payment/status/{order_id}"), Some("u1"))).await;
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["completedAt"].is_string());
}

#[tokio::test]
async fn create_order_rejects_unknown_plan() {
    let app = app();
    let req = post_json(
        "/api/payment/create",
        Some("u1"),
        json!({ "planType": "gold", "paymentMethod": "alipay" }),
    );
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn callback_for_unknown_order_is_404() {
    let app = app();
    let req = post_json(
        "/api/payment/callback/wechat",
        None,
        json!({ "orderId": "order_missing", "status": "completed" }),
    );
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn callback_with_unmodelled_status_is_acknowledged() {
    let app = app();
    let order_id = create_order(&app, "u1", "premium").await;

    let req = post_json(
        "/api/payment/callback/alipay",
        None,
        json!({ "orderId": order_id, "transactionId": 98765, "status": "refunded" }),
    );
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, body) = send_json(&app, get(&format!("/api/payment/status/{order_id}"), Some("u1"))).await;
    assert_eq!(body["data"]["status"], "pending");

    // Unknown orders are still reported, whatever the status says.
    let req = post_json(
        "/api/payment/callback/alipay",
        None,
        json!({ "orderId": "order_missing", "status": "refunded" }),
    );
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "success": false }));
}

#[tokio::test]
async fn callback_accepts_form_bodies() {
    let app = app();
    let order_id = create_order(&app, "u1", "pro").await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/payment/callback/wechat")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(format!("orderId={order_id}&transactionId=tx_9&status=completed")))
        .unwrap();
    let (status, body) = send_json(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, body) = send_json(&app, get("/api/payment/subscription", Some("u1"))).await;
    assert_eq!(body["data"]["planType"], "pro");
}

#[tokio::test]
async fn unreadable_callback_gets_fixed_body() {
    let app = app();
    let bodies = [
        ("application/json", "{not json"),
        ("application/json", r#"["orderId"]"#),
        ("application/json", r#"{"status":"completed"}"#),
        ("text/plain", "orderId=x&status=completed"),
    ];

    for (content_type, body) in bodies {
        let req = Request::builder()
            .method("POST")
            .uri("/api/payment/callback/alipay")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        let (status, text) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(text, r#"{"success":false}"#);
    }
}

#[tokio::test]
async fn order_status_is_owner_only() {
    let app = app();
    let order_id = create_order(&app, "u1", "pro").await;

    let (status, _) = send(&app, get(&format!("/api/payment/status/{order_id}"), Some("u2"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, get("/api/payment/status/order_missing", Some("u1"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_is_paged_per_user() {
    let app = app();
    for _ in 0..3 {
        create_order(&app, "u1", "premium").await;
    }
    create_order(&app, "u2", "pro").await;

    let (status, body) = send_json(&app, get("/api/payment/history", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (_, body) = send_json(&app, get("/api/payment/history?page=2&limit=2", Some("u1"))).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (_, body) = send_json(&app, get("/api/payment/history", Some("u2"))).await;
    let rows = body["data"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["amount"], 99.9);
}

#[tokio::test]
async fn push_without_app_credentials_reports_failure() {
    let (status, body) = send_json(&app(), get("/api/weixin/sendmsg?openid=user_1&content=hi", Some("u1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": false }));
}
