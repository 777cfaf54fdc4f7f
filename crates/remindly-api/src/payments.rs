use std::collections::HashMap;

use axum::{
    Extension, Form, Json,
    extract::{FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use remindly_types::api::{
    ApiResponse, Claims, CreateOrderRequest, CreateOrderResponse, PaymentCallbackRequest,
    PaymentSummary, SubscriptionView,
};

use crate::ledger::{self, CallbackOutcome, LedgerError};
use crate::state::{AppState, ledger_status};

pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<impl IntoResponse, StatusCode> {
    let Json(req) = body.map_err(|e| {
        warn!("Rejected order request: {}", e.body_text());
        StatusCode::BAD_REQUEST
    })?;

    let (plan, method) = (req.plan_type, req.payment_method);
    let user_id = claims.sub;
    let record = state
        .ledger(move |l| l.create_order(&user_id, plan, method))
        .await
        .map_err(ledger_status)?;

    let payment_url = ledger::payment_url(record.method, &record.order_id, record.amount);
    Ok(Json(ApiResponse::ok(CreateOrderResponse {
        order_id: record.order_id,
        amount: record.amount,
        payment_url,
        plan_type: plan,
    })))
}

/// Only the order's owner may read it.
pub async fn order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let record = state
        .ledger(move |l| l.order(&order_id))
        .await
        .map_err(ledger_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    if record.user_id != claims.sub {
        return Err(StatusCode::FORBIDDEN);
    }
    Ok(Json(ApiResponse::ok(PaymentSummary::from(record))))
}

/// Provider notification. Unauthenticated; the order id is the only key.
///
/// Answers `{success:true}` for every known order, including statuses this
/// server does not model, so the provider stops redelivering. Failures carry
/// a fixed `{success:false}` body.
pub async fn callback(
    State(state): State<AppState>,
    Path(method): Path<String>,
    request: Request,
) -> Response {
    let Some(req) = callback_fields(request)
        .await
        .and_then(PaymentCallbackRequest::from_fields)
    else {
        warn!("Unreadable payment callback via {}", method);
        return callback_reply(StatusCode::BAD_REQUEST, false);
    };
    info!("Payment callback via {} for order {}: {}", method, req.order_id, req.status);

    let reported = req.reported_status();
    let raw_status = req.status.clone();
    let result = state
        .ledger(move |l| match reported {
            Some(status) => l
                .apply_callback(&req.order_id, req.transaction_id.as_deref(), status)
                .map(Some),
            None => l
                .order(&req.order_id)?
                .map(|_| None)
                .ok_or(LedgerError::OrderNotFound(req.order_id)),
        })
        .await;

    match result {
        Ok(Some(CallbackOutcome::AlreadySettled(status))) => {
            info!("Redelivered callback via {} (order already {})", method, status);
            callback_reply(StatusCode::OK, true)
        }
        Ok(Some(_)) => callback_reply(StatusCode::OK, true),
        Ok(None) => {
            warn!("Ignoring unrecognized payment status '{}' via {}", raw_status, method);
            callback_reply(StatusCode::OK, true)
        }
        Err(e) => callback_reply(ledger_status(e), false),
    }
}

fn callback_reply(status: StatusCode, success: bool) -> Response {
    (status, Json(json!({ "success": success }))).into_response()
}

/// Flatten a JSON object or urlencoded form body into text fields.
async fn callback_fields(request: Request) -> Option<HashMap<String, String>> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(fields) = Form::<HashMap<String, String>>::from_request(request, &())
            .await
            .ok()?;
        return Some(fields);
    }

    let Json(value) = Json::<Value>::from_request(request, &()).await.ok()?;
    let Value::Object(map) = value else {
        return None;
    };
    Some(
        map.into_iter()
            .filter_map(|(name, value)| scalar_text(value).map(|text| (name, text)))
            .collect(),
    )
}

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub async fn subscription(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let view = state
        .ledger(move |l| l.active_subscription(&user_id))
        .await
        .map_err(ledger_status)?
        .map(SubscriptionView::from)
        .unwrap_or_else(SubscriptionView::free);

    Ok(Json(ApiResponse::ok(view)))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

pub async fn history(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(q): Query<HistoryQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let user_id = claims.sub;
    let payments = state
        .ledger(move |l| l.list_payments(&user_id, q.page, q.limit))
        .await
        .map_err(ledger_status)?;

    let summaries: Vec<PaymentSummary> = payments.into_iter().map(PaymentSummary::from).collect();
    Ok(Json(ApiResponse::ok(summaries)))
}
