//! Fixed plan price table.
//!
//! | plan    | price | duration |
//! |---------|-------|----------|
//! | premium | 29.9  | 30 days  |
//! | pro     | 99.9  | 365 days |

use chrono::Duration;

use crate::models::PlanType;

/// Currency recorded on every order.
pub const DEFAULT_CURRENCY: &str = "CNY";

/// Amounts closer than this are considered the same price.
pub const PRICE_TOLERANCE: f64 = 0.01;

pub const PLANS: [PlanType; 2] = [PlanType::Premium, PlanType::Pro];

impl PlanType {
    pub fn price(&self) -> f64 {
        match self {
            Self::Premium => 29.9,
            Self::Pro => 99.9,
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Self::Premium => Duration::days(30),
            Self::Pro => Duration::days(365),
        }
    }
}

/// Infer which plan a paid amount bought.
///
/// Falls back to `Premium` when nothing in the table matches. This only
/// holds while no two plans share a price within `PRICE_TOLERANCE`.
pub fn plan_for_amount(amount: f64) -> PlanType {
    PLANS
        .into_iter()
        .find(|plan| (amount - plan.price()).abs() < PRICE_TOLERANCE)
        .unwrap_or(PlanType::Premium)
}
