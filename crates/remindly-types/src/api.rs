use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PaymentMethod, PaymentRecord, PaymentStatus, PlanType, SubscriptionRecord};

// -- JWT Claims --

/// Bearer token claims. Tokens are minted by the account service; this
/// server only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub username: String,
    pub exp: usize,
}

// -- Envelope --

/// `{ success, data }` wrapper used by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

// -- Orders --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateOrderRequest {
    pub plan_type: PlanType,
    pub payment_method: PaymentMethod,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: String,
    pub amount: f64,
    pub payment_url: String,
    pub plan_type: PlanType,
}

/// Body posted by the payment provider once an order settles. Providers
/// send JSON or form bodies with loosely typed values, so every field is
/// read as text and `status` is interpreted separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCallbackRequest {
    pub order_id: String,
    pub transaction_id: Option<String>,
    pub status: String,
}

impl PaymentCallbackRequest {
    /// Build from flat `name -> value` pairs. `None` without an order id.
    pub fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
        let order_id = fields.remove("orderId").filter(|v| !v.is_empty())?;
        Some(Self {
            order_id,
            transaction_id: fields.remove("transactionId").filter(|v| !v.is_empty()),
            status: fields.remove("status").unwrap_or_default(),
        })
    }

    /// The reported status, or `None` for anything this server does not model.
    pub fn reported_status(&self) -> Option<PaymentStatus> {
        self.status.parse().ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSummary {
    pub order_id: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<PaymentRecord> for PaymentSummary {
    fn from(p: PaymentRecord) -> Self {
        Self {
            order_id: p.order_id,
            amount: p.amount,
            status: p.status,
            payment_method: p.method,
            created_at: p.created_at,
            completed_at: p.completed_at,
        }
    }
}

// -- Subscriptions --

/// Subscription state as shown to the user. Users without any paid
/// subscription see the implicit `free` plan.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionView {
    pub plan_type: String,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl SubscriptionView {
    pub fn free() -> Self {
        Self {
            plan_type: "free".to_string(),
            status: "active".to_string(),
            expires_at: None,
            created_at: None,
        }
    }
}

impl From<SubscriptionRecord> for SubscriptionView {
    fn from(s: SubscriptionRecord) -> Self {
        Self {
            plan_type: s.plan_type.to_string(),
            status: s.status.to_string(),
            expires_at: Some(s.expires_at),
            created_at: Some(s.created_at),
        }
    }
}

// -- Push --

#[derive(Debug, Serialize, Deserialize)]
pub struct PushResult {
    pub success: bool,
}
