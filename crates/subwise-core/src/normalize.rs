//! Money and time normalization
//!
//! Everything the aggregation layer needs to put subscriptions on a common
//! footing: a per-month cost regardless of billing cycle, and whole-day
//! deltas between calendar dates.
//!
//! Malformed amounts never fail a computation. A non-finite amount, a
//! non-numeric string or a missing value all count as `0.0` so that one bad
//! row cannot take down the dashboard.

use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::BillingCycle;

/// Average number of weeks in a month used for weekly subscriptions.
///
/// This is an approximation (52 / 12 = 4.333...), kept at two decimals.
pub const WEEKS_PER_MONTH: f64 = 4.33;

/// Coerce an amount into something safe to sum
pub fn coerce_amount(amount: f64) -> f64 {
    if amount.is_finite() {
        amount
    } else {
        0.0
    }
}

/// Monthly-equivalent cost of a charge of `amount` every `cycle`
pub fn monthly_equivalent(amount: f64, cycle: BillingCycle) -> f64 {
    let amount = coerce_amount(amount);
    match cycle {
        BillingCycle::Weekly => amount * WEEKS_PER_MONTH,
        BillingCycle::Monthly => amount,
        BillingCycle::Quarterly => amount / 3.0,
        BillingCycle::Yearly => amount / 12.0,
    }
}

/// Whole calendar days from `from` to `to` (negative when `to` is earlier)
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Calendar days between two instants, ignoring the time of day
///
/// 23:59 on Monday to 00:01 on Tuesday is one day, not zero.
pub fn days_between_instants(from: NaiveDateTime, to: NaiveDateTime) -> i64 {
    days_between(from.date(), to.date())
}

/// The billing date one cycle after `date`
///
/// Month arithmetic clamps to the end of shorter months (Jan 31 -> Feb 28).
pub fn advance_billing_date(date: NaiveDate, cycle: BillingCycle) -> NaiveDate {
    let next = match cycle {
        BillingCycle::Weekly => date.checked_add_signed(Duration::days(7)),
        BillingCycle::Monthly => date.checked_add_months(Months::new(1)),
        BillingCycle::Quarterly => date.checked_add_months(Months::new(3)),
        BillingCycle::Yearly => date.checked_add_months(Months::new(12)),
    };
    next.unwrap_or(date)
}

/// Read an amount out of an arbitrary JSON value
///
/// Numbers pass through, numeric strings are parsed, everything else is 0.
pub fn amount_from_value(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.map(coerce_amount).unwrap_or(0.0)
}

/// Serde adapter for amount and budget columns
///
/// Use together with `#[serde(default)]` so that a missing column also
/// decodes to zero.
pub fn deserialize_amount<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(amount_from_value).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_monthly_equivalent_known_values() {
        assert_eq!(monthly_equivalent(1200.0, BillingCycle::Yearly), 100.0);
        assert_eq!(monthly_equivalent(300.0, BillingCycle::Quarterly), 100.0);
        assert_eq!(monthly_equivalent(100.0, BillingCycle::Monthly), 100.0);
        assert!((monthly_equivalent(25.0, BillingCycle::Weekly) - 108.25).abs() < 1e-9);
    }

    #[test]
    fn test_monthly_equivalent_is_linear() {
        let cycles = [
            BillingCycle::Weekly,
            BillingCycle::Monthly,
            BillingCycle::Quarterly,
            BillingCycle::Yearly,
        ];
        for cycle in cycles {
            for x in [0.0, 1.0, 9.99, 17.5, 1234.56] {
                let single = monthly_equivalent(x, cycle);
                let double = monthly_equivalent(2.0 * x, cycle);
                assert!(
                    (double - 2.0 * single).abs() < 1e-9,
                    "not linear for {:?} at {}",
                    cycle,
                    x
                );
            }
        }
    }

    #[test]
    fn test_non_finite_amount_is_zero() {
        assert_eq!(monthly_equivalent(f64::NAN, BillingCycle::Monthly), 0.0);
        assert_eq!(monthly_equivalent(f64::INFINITY, BillingCycle::Yearly), 0.0);
    }

    #[test]
    fn test_days_between() {
        assert_eq!(days_between(date("2024-03-01"), date("2024-03-06")), 5);
        assert_eq!(days_between(date("2024-03-06"), date("2024-03-01")), -5);
        assert_eq!(days_between(date("2024-02-28"), date("2024-03-01")), 2);
        assert_eq!(days_between(date("2024-03-01"), date("2024-03-01")), 0);
    }

    #[test]
    fn test_days_between_ignores_time_of_day() {
        let late = date("2024-03-01").and_hms_opt(23, 59, 0).unwrap();
        let early = date("2024-03-02").and_hms_opt(0, 1, 0).unwrap();
        assert_eq!(days_between_instants(late, early), 1);

        let morning = date("2024-03-01").and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(days_between_instants(morning, late), 0);
    }

    #[test]
    fn test_advance_billing_date() {
        let d = date("2024-01-31");
        assert_eq!(advance_billing_date(d, BillingCycle::Weekly), date("2024-02-07"));
        assert_eq!(advance_billing_date(d, BillingCycle::Monthly), date("2024-02-29"));
        assert_eq!(advance_billing_date(d, BillingCycle::Quarterly), date("2024-04-30"));
        assert_eq!(advance_billing_date(d, BillingCycle::Yearly), date("2025-01-31"));
    }

    #[test]
    fn test_amount_from_value() {
        assert_eq!(amount_from_value(&json!(9.99)), 9.99);
        assert_eq!(amount_from_value(&json!("12.50")), 12.5);
        assert_eq!(amount_from_value(&json!(" 3 ")), 3.0);
        assert_eq!(amount_from_value(&json!("abc")), 0.0);
        assert_eq!(amount_from_value(&json!(null)), 0.0);
        assert_eq!(amount_from_value(&json!({"x": 1})), 0.0);
        assert_eq!(amount_from_value(&json!("NaN")), 0.0);
    }
}
