//! Payment and subscription lifecycle.
//!
//! ```text
//! create_order ──> payment(pending) ──callback(completed)──> payment(completed) + subscription(active)
//!                         │                                                          │
//!                         └──callback(failed)──> payment(failed)           now > expires_at on query
//!                                                                                    ▼
//!                                                                         subscription(expired)
//! ```
//!
//! The ledger is the only writer of payment and subscription rows.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use remindly_db::Database;
use remindly_db::models::{NewPayment, NewSubscription, PaymentRow, Settlement, SubscriptionRow};
use remindly_db::queries;
use remindly_types::models::{
    PaymentMethod, PaymentRecord, PaymentStatus, PlanType, SubscriptionRecord, SubscriptionStatus,
    UnknownVariant,
};
use remindly_types::plans::{DEFAULT_CURRENCY, plan_for_amount};

const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Result of applying a payment-provider callback.
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// Payment completed and this subscription was granted.
    Completed(SubscriptionRecord),
    /// Payment marked failed.
    Failed,
    /// The order had already reached this terminal status; nothing changed.
    AlreadySettled(PaymentStatus),
    /// The provider reported `pending`; nothing changed.
    Ignored,
}

pub struct Ledger {
    db: Database,
}

impl Ledger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn create_order(
        &self,
        user_id: &str,
        plan: PlanType,
        method: PaymentMethod,
    ) -> Result<PaymentRecord, LedgerError> {
        self.create_order_at(user_id, plan, method, Utc::now())
    }

    pub fn create_order_at(
        &self,
        user_id: &str,
        plan: PlanType,
        method: PaymentMethod,
        now: DateTime<Utc>,
    ) -> Result<PaymentRecord, LedgerError> {
        let order_id = new_order_id(now);
        let created_at = stamp(now);

        let row = self.db.insert_payment(&NewPayment {
            user_id,
            amount: plan.price(),
            currency: DEFAULT_CURRENCY,
            payment_method: method.as_str(),
            order_id: &order_id,
            created_at: &created_at,
        })?;

        info!("Created order {} for user {} ({}, {})", order_id, user_id, plan, method);
        Ok(payment_from_row(row)?)
    }

    /// Look up an order. A missing order is `Ok(None)`.
    pub fn order(&self, order_id: &str) -> Result<Option<PaymentRecord>, LedgerError> {
        let row = self.db.get_payment_by_order_id(order_id)?;
        Ok(row.map(payment_from_row).transpose()?)
    }

    pub fn apply_callback(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        reported: PaymentStatus,
    ) -> Result<CallbackOutcome, LedgerError> {
        self.apply_callback_at(order_id, transaction_id, reported, Utc::now())
    }

    /// Apply a provider callback in a single transaction.
    ///
    /// Redelivered callbacks for an order that already settled are a no-op.
    /// Concurrent deliveries race on the conditional pending -> terminal
    /// update keyed by the unique order id; exactly one of them wins.
    pub fn apply_callback_at(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
        reported: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<CallbackOutcome, LedgerError> {
        self.db.with_transaction(|conn| -> Result<CallbackOutcome, LedgerError> {
            let payment = queries::payment_by_order_id(conn, order_id)?
                .ok_or_else(|| LedgerError::OrderNotFound(order_id.to_string()))?;

            let current: PaymentStatus = parse_column(&payment.status)?;
            if current.is_terminal() {
                info!("Order {} already {}, ignoring {} callback", order_id, current, reported);
                return Ok(CallbackOutcome::AlreadySettled(current));
            }
            if reported == PaymentStatus::Pending {
                return Ok(CallbackOutcome::Ignored);
            }

            let at = stamp(now);
            let settled = queries::settle_payment(
                conn,
                order_id,
                &Settlement {
                    status: reported.as_str(),
                    transaction_id,
                    at: &at,
                },
            )?;
            if !settled {
                let status = match queries::payment_by_order_id(conn, order_id)? {
                    Some(row) => parse_column(&row.status)?,
                    None => return Err(LedgerError::OrderNotFound(order_id.to_string())),
                };
                warn!("Order {} settled concurrently as {}", order_id, status);
                return Ok(CallbackOutcome::AlreadySettled(status));
            }

            match reported {
                PaymentStatus::Completed => {
                    let plan = plan_for_amount(payment.amount);
                    let expires_at = stamp(now + plan.duration());
                    let row = queries::insert_subscription(
                        conn,
                        &NewSubscription {
                            user_id: &payment.user_id,
                            plan_type: plan.as_str(),
                            expires_at: &expires_at,
                            created_at: &at,
                        },
                    )?;
                    queries::link_subscription(conn, payment.id, row.id)?;

                    info!(
                        "Order {} completed: {} subscription {} for user {} until {}",
                        order_id, plan, row.id, payment.user_id, expires_at
                    );
                    Ok(CallbackOutcome::Completed(subscription_from_row(row)?))
                }
                PaymentStatus::Failed => {
                    info!("Order {} failed", order_id);
                    Ok(CallbackOutcome::Failed)
                }
                PaymentStatus::Pending => Ok(CallbackOutcome::Ignored),
            }
        })
    }

    pub fn active_subscription(&self, user_id: &str) -> Result<Option<SubscriptionRecord>, LedgerError> {
        self.active_subscription_at(user_id, Utc::now())
    }

    /// The user's most recently created active subscription.
    ///
    /// Expiry is discovered lazily: a record whose `expires_at` has
    /// passed is flipped to expired here and returned with that status.
    pub fn active_subscription_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionRecord>, LedgerError> {
        let Some(row) = self.db.get_latest_active_subscription(user_id)? else {
            return Ok(None);
        };
        let mut record = subscription_from_row(row)?;

        if record.expires_at < now {
            let at = stamp(now);
            self.db
                .with_conn(|conn| queries::expire_subscription(conn, record.id, &at))?;
            info!("Subscription {} for user {} expired at {}", record.id, user_id, record.expires_at);
            record.status = SubscriptionStatus::Expired;
            record.updated_at = parse_stamp(&at)?;
        }

        Ok(Some(record))
    }

    /// Payments for a user, newest first. `page` is 1-based.
    pub fn list_payments(
        &self,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<PaymentRecord>, LedgerError> {
        let limit = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = page.max(1).saturating_sub(1).saturating_mul(limit);

        let rows = self.db.get_payments_for_user(user_id, limit, offset)?;
        let records = rows
            .into_iter()
            .map(payment_from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(records)
    }
}

/// Checkout link for the chosen payment provider.
pub fn payment_url(method: PaymentMethod, order_id: &str, amount: f64) -> String {
    let base = match method {
        PaymentMethod::Alipay => "https://openapi.alipay.com/gateway.do",
        PaymentMethod::Wechat => "https://api.mch.weixin.qq.com/pay/unifiedorder",
    };
    format!("{base}?order_id={order_id}&amount={amount}")
}

/// Order ids carry the creation time for humans and a random UUID for
/// uniqueness across concurrent requests and server instances.
fn new_order_id(now: DateTime<Utc>) -> String {
    format!("order_{}_{}", now.timestamp_millis(), Uuid::new_v4().simple())
}

fn stamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_stamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .map_err(|e| anyhow::anyhow!("Corrupt timestamp '{}': {}", s, e))?
        .with_timezone(&Utc))
}

fn parse_column<T: FromStr<Err = UnknownVariant>>(s: &str) -> anyhow::Result<T> {
    Ok(s.parse::<T>()?)
}

fn payment_from_row(row: PaymentRow) -> anyhow::Result<PaymentRecord> {
    Ok(PaymentRecord {
        id: row.id,
        user_id: row.user_id,
        subscription_id: row.subscription_id,
        amount: row.amount,
        currency: row.currency,
        method: parse_column(&row.payment_method)?,
        order_id: row.order_id,
        status: parse_column(&row.status)?,
        transaction_id: row.transaction_id,
        created_at: parse_stamp(&row.created_at)?,
        updated_at: parse_stamp(&row.updated_at)?,
        completed_at: row.completed_at.as_deref().map(parse_stamp).transpose()?,
    })
}

fn subscription_from_row(row: SubscriptionRow) -> anyhow::Result<SubscriptionRecord> {
    Ok(SubscriptionRecord {
        id: row.id,
        user_id: row.user_id,
        plan_type: parse_column(&row.plan_type)?,
        status: parse_column(&row.status)?,
        expires_at: parse_stamp(&row.expires_at)?,
        created_at: parse_stamp(&row.created_at)?,
        updated_at: parse_stamp(&row.updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn ledger() -> Ledger {
        Ledger::new(Database::open_in_memory().unwrap())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn subscription_count(ledger: &Ledger) -> i64 {
        ledger
            .db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM subscriptions", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn premium_order_then_completed_callback_grants_30_days() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Premium, PaymentMethod::Alipay, t0())
            .unwrap();
        assert_eq!(order.amount, 29.9);
        assert_eq!(order.status, PaymentStatus::Pending);
        assert_eq!(order.currency, "CNY");
        assert_eq!(order.method, PaymentMethod::Alipay);
        assert!(order.order_id.starts_with("order_"));

        let paid_at = t0() + Duration::minutes(3);
        let outcome = ledger
            .apply_callback_at(&order.order_id, Some("tx-1"), PaymentStatus::Completed, paid_at)
            .unwrap();
        let sub = match outcome {
            CallbackOutcome::Completed(sub) => sub,
            other => panic!("expected completion, got {other:?}"),
        };
        assert_eq!(sub.plan_type, PlanType::Premium);
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.user_id, "u1");
        assert_eq!(sub.expires_at, paid_at + Duration::days(30));

        let stored = ledger.order(&order.order_id).unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(stored.completed_at, Some(paid_at));
        assert_eq!(stored.subscription_id, Some(sub.id));

        let active = ledger.active_subscription_at("u1", paid_at).unwrap().unwrap();
        assert_eq!(active, sub);
    }

    #[test]
    fn pro_plan_lasts_a_year() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Pro, PaymentMethod::Wechat, t0())
            .unwrap();
        assert_eq!(order.amount, 99.9);

        let outcome = ledger
            .apply_callback_at(&order.order_id, None, PaymentStatus::Completed, t0())
            .unwrap();
        match outcome {
            CallbackOutcome::Completed(sub) => {
                assert_eq!(sub.plan_type, PlanType::Pro);
                assert_eq!(sub.expires_at, t0() + Duration::days(365));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_order_is_not_found_and_writes_nothing() {
        let ledger = ledger();
        let err = ledger
            .apply_callback("order_missing", Some("tx"), PaymentStatus::Completed)
            .unwrap_err();
        assert!(matches!(err, LedgerError::OrderNotFound(id) if id == "order_missing"));
        assert_eq!(subscription_count(&ledger), 0);
        assert!(ledger.order("order_missing").unwrap().is_none());
    }

    #[test]
    fn repeated_callback_is_a_noop() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Premium, PaymentMethod::Alipay, t0())
            .unwrap();

        let first = ledger
            .apply_callback_at(&order.order_id, Some("tx-1"), PaymentStatus::Completed, t0())
            .unwrap();
        assert!(matches!(first, CallbackOutcome::Completed(_)));
        let after_first = ledger.order(&order.order_id).unwrap().unwrap();

        let later = t0() + Duration::hours(1);
        let second = ledger
            .apply_callback_at(&order.order_id, Some("tx-1"), PaymentStatus::Completed, later)
            .unwrap();
        assert_eq!(second, CallbackOutcome::AlreadySettled(PaymentStatus::Completed));

        let third = ledger
            .apply_callback_at(&order.order_id, Some("tx-2"), PaymentStatus::Failed, later)
            .unwrap();
        assert_eq!(third, CallbackOutcome::AlreadySettled(PaymentStatus::Completed));

        assert_eq!(subscription_count(&ledger), 1);
        assert_eq!(ledger.order(&order.order_id).unwrap().unwrap(), after_first);
    }

    #[test]
    fn concurrent_duplicate_callbacks_grant_one_subscription() {
        let ledger = Arc::new(ledger());
        let order = ledger
            .create_order("u1", PlanType::Premium, PaymentMethod::Wechat)
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let order_id = order.order_id.clone();
                std::thread::spawn(move || {
                    ledger
                        .apply_callback(&order_id, Some("tx"), PaymentStatus::Completed)
                        .unwrap()
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, CallbackOutcome::Completed(_)))
            .count();
        assert_eq!(completed, 1);
        assert_eq!(subscription_count(&ledger), 1);
    }

    #[test]
    fn failed_callback_creates_no_subscription() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Pro, PaymentMethod::Alipay, t0())
            .unwrap();

        let outcome = ledger
            .apply_callback_at(&order.order_id, Some("tx-9"), PaymentStatus::Failed, t0())
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Failed);

        let stored = ledger.order(&order.order_id).unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.completed_at, None);
        assert_eq!(stored.transaction_id.as_deref(), Some("tx-9"));
        assert_eq!(subscription_count(&ledger), 0);
        assert!(ledger.active_subscription_at("u1", t0()).unwrap().is_none());
    }

    #[test]
    fn pending_report_leaves_order_open() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Premium, PaymentMethod::Alipay, t0())
            .unwrap();

        let outcome = ledger
            .apply_callback_at(&order.order_id, None, PaymentStatus::Pending, t0())
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Ignored);
        assert_eq!(ledger.order(&order.order_id).unwrap().unwrap(), order);

        let outcome = ledger
            .apply_callback_at(&order.order_id, None, PaymentStatus::Completed, t0())
            .unwrap();
        assert!(matches!(outcome, CallbackOutcome::Completed(_)));
    }

    #[test]
    fn subscription_expires_once_expiry_has_passed() {
        let ledger = ledger();
        let order = ledger
            .create_order_at("u1", PlanType::Premium, PaymentMethod::Alipay, t0())
            .unwrap();
        ledger
            .apply_callback_at(&order.order_id, None, PaymentStatus::Completed, t0())
            .unwrap();
        let expires_at = t0() + Duration::days(30);

        let at = ledger.active_subscription_at("u1", expires_at).unwrap().unwrap();
        assert_eq!(at.status, SubscriptionStatus::Active);

        let after = expires_at + Duration::milliseconds(1);
        let expired = ledger.active_subscription_at("u1", after).unwrap().unwrap();
        assert_eq!(expired.status, SubscriptionStatus::Expired);
        assert_eq!(expired.updated_at, after);

        // Persisted: no active record remains.
        assert!(ledger.active_subscription_at("u1", after).unwrap().is_none());
    }

    #[test]
    fn newest_active_subscription_wins() {
        let ledger = ledger();
        for (i, plan) in [PlanType::Pro, PlanType::Premium].into_iter().enumerate() {
            let at = t0() + Duration::days(i as i64);
            let order = ledger.create_order_at("u1", plan, PaymentMethod::Alipay, at).unwrap();
            ledger
                .apply_callback_at(&order.order_id, None, PaymentStatus::Completed, at)
                .unwrap();
        }

        let active = ledger.active_subscription_at("u1", t0() + Duration::days(2)).unwrap().unwrap();
        assert_eq!(active.plan_type, PlanType::Premium);
        assert!(ledger.active_subscription_at("u2", t0()).unwrap().is_none());
    }

    #[test]
    fn payments_are_paged_newest_first() {
        let ledger = ledger();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                ledger
                    .create_order_at("u1", PlanType::Premium, PaymentMethod::Alipay, t0() + Duration::minutes(i))
                    .unwrap()
                    .order_id
            })
            .collect();
        ledger
            .create_order_at("u2", PlanType::Pro, PaymentMethod::Alipay, t0())
            .unwrap();

        let page1: Vec<_> = ledger.list_payments("u1", 1, 2).unwrap().into_iter().map(|p| p.order_id).collect();
        let page3: Vec<_> = ledger.list_payments("u1", 3, 2).unwrap().into_iter().map(|p| p.order_id).collect();
        assert_eq!(page1, vec![ids[4].clone(), ids[3].clone()]);
        assert_eq!(page3, vec![ids[0].clone()]);
        assert!(ledger.list_payments("u1", 4, 2).unwrap().is_empty());

        // page 0 is treated as the first page
        assert_eq!(ledger.list_payments("u1", 0, 10).unwrap().len(), 5);
    }

    #[test]
    fn order_ids_are_unique_within_one_millisecond() {
        let ids: HashSet<String> = (0..1000).map(|_| new_order_id(t0())).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn payment_urls_point_at_provider() {
        assert_eq!(
            payment_url(PaymentMethod::Alipay, "order_1", 29.9),
            "https://openapi.alipay.com/gateway.do?order_id=order_1&amount=29.9"
        );
        assert!(payment_url(PaymentMethod::Wechat, "order_1", 99.9)
            .starts_with("https://api.mch.weixin.qq.com/pay/unifiedorder?"));
    }
}
