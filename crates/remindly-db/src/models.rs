/// Database row types. These map directly to SQLite rows.
/// Distinct from remindly-types ledger records to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct PaymentRow {
    pub id: i64,
    pub user_id: String,
    pub subscription_id: Option<i64>,
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub order_id: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

pub struct NewPayment<'a> {
    pub user_id: &'a str,
    pub amount: f64,
    pub currency: &'a str,
    pub payment_method: &'a str,
    pub order_id: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRow {
    pub id: i64,
    pub user_id: String,
    pub plan_type: String,
    pub status: String,
    pub expires_at: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct NewSubscription<'a> {
    pub user_id: &'a str,
    pub plan_type: &'a str,
    pub expires_at: &'a str,
    pub created_at: &'a str,
}

/// Terminal transition applied to a pending payment.
pub struct Settlement<'a> {
    pub status: &'a str,
    pub transaction_id: Option<&'a str>,
    pub at: &'a str,
}
