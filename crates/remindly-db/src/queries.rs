use crate::models::{NewPayment, NewSubscription, PaymentRow, Settlement, SubscriptionRow};
use crate::Database;
use anyhow::Result;
use rusqlite::{Connection, Row};

const PAYMENT_COLUMNS: &str = "id, user_id, subscription_id, amount, currency, payment_method, order_id, \
     status, transaction_id, created_at, updated_at, completed_at";

const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, plan_type, status, expires_at, created_at, updated_at";

impl Database {
    // -- Payments --

    pub fn insert_payment(&self, payment: &NewPayment<'_>) -> Result<PaymentRow> {
        self.with_conn(|conn| insert_payment(conn, payment))
    }

    pub fn get_payment_by_order_id(&self, order_id: &str) -> Result<Option<PaymentRow>> {
        self.with_conn(|conn| payment_by_order_id(conn, order_id))
    }

    pub fn get_payments_for_user(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PaymentRow>> {
        self.with_conn(|conn| payments_for_user(conn, user_id, limit, offset))
    }

    // -- Subscriptions --

    pub fn get_latest_active_subscription(&self, user_id: &str) -> Result<Option<SubscriptionRow>> {
        self.with_conn(|conn| latest_active_subscription(conn, user_id))
    }
}

// The free functions below take a bare connection so they can be composed
// inside `Database::with_transaction`.

pub fn insert_payment(conn: &Connection, payment: &NewPayment<'_>) -> Result<PaymentRow> {
    conn.execute(
        "INSERT INTO payments (user_id, amount, currency, payment_method, order_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6)",
        rusqlite::params![
            payment.user_id,
            payment.amount,
            payment.currency,
            payment.payment_method,
            payment.order_id,
            payment.created_at,
        ],
    )?;

    Ok(PaymentRow {
        id: conn.last_insert_rowid(),
        user_id: payment.user_id.to_string(),
        subscription_id: None,
        amount: payment.amount,
        currency: payment.currency.to_string(),
        payment_method: payment.payment_method.to_string(),
        order_id: payment.order_id.to_string(),
        status: "pending".to_string(),
        transaction_id: None,
        created_at: payment.created_at.to_string(),
        updated_at: payment.created_at.to_string(),
        completed_at: None,
    })
}

pub fn payment_by_order_id(conn: &Connection, order_id: &str) -> Result<Option<PaymentRow>> {
    let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE order_id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([order_id], map_payment).optional()?;
    Ok(row)
}

pub fn payments_for_user(
    conn: &Connection,
    user_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<PaymentRow>> {
    let sql = format!(
        "SELECT {PAYMENT_COLUMNS} FROM payments
         WHERE user_id = ?1
         ORDER BY created_at DESC, id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(rusqlite::params![user_id, limit, offset], map_payment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Move a pending payment to a terminal status.
///
/// The `status = 'pending'` guard makes this a compare-and-set on the unique
/// order id: of several concurrent deliveries of the same callback exactly
/// one sees `true`.
pub fn settle_payment(conn: &Connection, order_id: &str, settlement: &Settlement<'_>) -> Result<bool> {
    let completed_at = (settlement.status == "completed").then_some(settlement.at);
    let changed = conn.execute(
        "UPDATE payments
         SET status = ?1,
             transaction_id = COALESCE(?2, transaction_id),
             updated_at = ?3,
             completed_at = COALESCE(?4, completed_at)
         WHERE order_id = ?5 AND status = 'pending'",
        rusqlite::params![
            settlement.status,
            settlement.transaction_id,
            settlement.at,
            completed_at,
            order_id,
        ],
    )?;
    Ok(changed == 1)
}

pub fn link_subscription(conn: &Connection, payment_id: i64, subscription_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE payments SET subscription_id = ?1 WHERE id = ?2",
        rusqlite::params![subscription_id, payment_id],
    )?;
    Ok(())
}

pub fn insert_subscription(
    conn: &Connection,
    subscription: &NewSubscription<'_>,
) -> Result<SubscriptionRow> {
    conn.execute(
        "INSERT INTO subscriptions (user_id, plan_type, status, expires_at, created_at, updated_at)
         VALUES (?1, ?2, 'active', ?3, ?4, ?4)",
        rusqlite::params![
            subscription.user_id,
            subscription.plan_type,
            subscription.expires_at,
            subscription.created_at,
        ],
    )?;

    Ok(SubscriptionRow {
        id: conn.last_insert_rowid(),
        user_id: subscription.user_id.to_string(),
        plan_type: subscription.plan_type.to_string(),
        status: "active".to_string(),
        expires_at: subscription.expires_at.to_string(),
        created_at: subscription.created_at.to_string(),
        updated_at: subscription.created_at.to_string(),
    })
}

pub fn latest_active_subscription(conn: &Connection, user_id: &str) -> Result<Option<SubscriptionRow>> {
    let sql = format!(
        "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
         WHERE user_id = ?1 AND status = 'active'
         ORDER BY created_at DESC, id DESC
         LIMIT 1"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([user_id], map_subscription).optional()?;
    Ok(row)
}

pub fn expire_subscription(conn: &Connection, id: i64, at: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE subscriptions SET status = 'expired', updated_at = ?1
         WHERE id = ?2 AND status = 'active'",
        rusqlite::params![at, id],
    )?;
    Ok(changed == 1)
}

fn map_payment(row: &Row<'_>) -> rusqlite::Result<PaymentRow> {
    Ok(PaymentRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        subscription_id: row.get(2)?,
        amount: row.get(3)?,
        currency: row.get(4)?,
        payment_method: row.get(5)?,
        order_id: row.get(6)?,
        status: row.get(7)?,
        transaction_id: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        completed_at: row.get(11)?,
    })
}

fn map_subscription(row: &Row<'_>) -> rusqlite::Result<SubscriptionRow> {
    Ok(SubscriptionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_type: row.get(2)?,
        status: row.get(3)?,
        expires_at: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
