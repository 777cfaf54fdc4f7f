use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::{info, warn};

use remindly_gateway::dispatcher::{ACK_BODY, Dispatch};
use remindly_gateway::envelope::REPLY_CONTENT_TYPE;
use remindly_gateway::signature;
use remindly_types::api::PushResult;

use crate::state::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// The only body ever returned on a rejected handshake.
const ERROR_TOKEN: &str = "error";

#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub nonce: Option<String>,
    pub echostr: Option<String>,
}

fn text(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_PLAIN)], body).into_response()
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// GET /api/weixin/msg: provider proves we own the webhook URL.
pub async fn verify(State(state): State<AppState>, Query(q): Query<HandshakeQuery>) -> Response {
    let (Some(signature), Some(timestamp), Some(nonce), Some(echo)) = (
        present(q.signature),
        present(q.timestamp),
        present(q.nonce),
        present(q.echostr),
    ) else {
        warn!("Handshake rejected: missing parameters");
        return text(StatusCode::BAD_REQUEST, ERROR_TOKEN.to_string());
    };

    if signature::verify(&signature, &timestamp, &nonce, &state.wechat_token) {
        info!("Handshake verified");
        text(StatusCode::OK, echo)
    } else {
        warn!("Handshake rejected: signature mismatch");
        text(StatusCode::FORBIDDEN, ERROR_TOKEN.to_string())
    }
}

/// POST /api/weixin/msg: one message delivery. Always 200: anything we
/// cannot answer is acknowledged so the provider does not retry it.
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Response {
    match state.dispatcher.dispatch(&body).await {
        Dispatch::Acknowledge => text(StatusCode::OK, ACK_BODY.to_string()),
        Dispatch::Reply(envelope) => {
            let doc = envelope.encode(chrono::Utc::now().timestamp());
            (StatusCode::OK, [(header::CONTENT_TYPE, REPLY_CONTENT_TYPE)], doc).into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PushQuery {
    pub openid: String,
    pub content: Option<String>,
}

const DEFAULT_PUSH_TEXT: &str = "This is a test message.";

/// GET /api/weixin/sendmsg: push a message to one follower.
pub async fn send_test(
    State(state): State<AppState>,
    Query(q): Query<PushQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if q.openid.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let content = q
        .content
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_PUSH_TEXT.to_string());

    let success = state.notifier.push_message(&q.openid, &content).await;
    Ok(Json(PushResult { success }))
}
