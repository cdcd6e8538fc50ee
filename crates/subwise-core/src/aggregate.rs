//! Spending aggregation
//!
//! Pure functions over a user's subscriptions and categories. Everything is
//! recomputed from scratch on each call; the data sets are small (tens to a
//! few hundred rows) so there is no incremental bookkeeping.

use std::collections::HashMap;

use chrono::{Datelike, Duration, Months, NaiveDate};
use serde::Serialize;

use crate::models::{Category, Subscription};
use crate::normalize::{advance_billing_date, days_between};

/// Default look-ahead for "upcoming renewals"
pub const DEFAULT_UPCOMING_WINDOW_DAYS: u32 = 30;

/// Upper bound on billing-cycle steps per subscription in a forecast
const MAX_FORECAST_STEPS: usize = 1000;

/// Sum of monthly-equivalent cost over active subscriptions
pub fn total_monthly_spend(subscriptions: &[Subscription]) -> f64 {
    subscriptions
        .iter()
        .filter(|s| s.is_active())
        .map(Subscription::monthly_cost)
        .sum()
}

/// Monthly-equivalent spend per category id
///
/// Only ids that name a known category appear in the result. Subscriptions
/// without a category, or pointing at a category that no longer exists,
/// still count towards [`total_monthly_spend`] but not here.
pub fn category_spend(
    subscriptions: &[Subscription],
    categories: &[Category],
) -> HashMap<String, f64> {
    let mut spend: HashMap<String, f64> = categories
        .iter()
        .map(|c| (c.id.clone(), 0.0))
        .collect();

    for sub in subscriptions.iter().filter(|s| s.is_active()) {
        let Some(category_id) = sub.category_id.as_deref() else {
            continue;
        };
        if let Some(total) = spend.get_mut(category_id) {
            *total += sub.monthly_cost();
        }
    }

    spend
}

pub fn active_count(subscriptions: &[Subscription]) -> usize {
    subscriptions.iter().filter(|s| s.is_active()).count()
}

pub fn inactive_count(subscriptions: &[Subscription]) -> usize {
    subscriptions.len() - active_count(subscriptions)
}

fn in_window(sub: &Subscription, today: NaiveDate, window_days: u32) -> bool {
    let days = days_between(today, sub.next_billing_date);
    sub.is_active() && (0..=window_days as i64).contains(&days)
}

/// Number of active subscriptions billed within `[today, today + window_days]`
pub fn upcoming_renewal_count(
    subscriptions: &[Subscription],
    today: NaiveDate,
    window_days: u32,
) -> usize {
    subscriptions
        .iter()
        .filter(|s| in_window(s, today, window_days))
        .count()
}

/// Active subscriptions billed within the window, soonest first
pub fn upcoming_renewals(
    subscriptions: &[Subscription],
    today: NaiveDate,
    window_days: u32,
) -> Vec<Subscription> {
    let mut upcoming: Vec<Subscription> = subscriptions
        .iter()
        .filter(|s| in_window(s, today, window_days))
        .cloned()
        .collect();
    upcoming.sort_by(|a, b| {
        a.next_billing_date
            .cmp(&b.next_billing_date)
            .then_with(|| a.name.cmp(&b.name))
    });
    upcoming
}

/// Headline numbers for the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpendingSummary {
    pub total_monthly_spend: f64,
    pub category_spend: HashMap<String, f64>,
    pub active_count: usize,
    pub inactive_count: usize,
    pub upcoming_renewal_count: usize,
}

pub fn summarize(
    subscriptions: &[Subscription],
    categories: &[Category],
    today: NaiveDate,
    window_days: u32,
) -> SpendingSummary {
    SpendingSummary {
        total_monthly_spend: total_monthly_spend(subscriptions),
        category_spend: category_spend(subscriptions, categories),
        active_count: active_count(subscriptions),
        inactive_count: inactive_count(subscriptions),
        upcoming_renewal_count: upcoming_renewal_count(subscriptions, today, window_days),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Up,
    Down,
    Neutral,
}

/// Month-over-month change in monthly spend
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpendingTrend {
    /// Absolute change in percent
    pub percentage: f64,
    pub direction: TrendDirection,
}

/// Compare current monthly spend with the spend of subscriptions that already
/// existed on the first day of last month
pub fn spending_trend(subscriptions: &[Subscription], today: NaiveDate) -> SpendingTrend {
    let neutral = SpendingTrend {
        percentage: 0.0,
        direction: TrendDirection::Neutral,
    };

    let Some(start_of_last_month) = today
        .with_day(1)
        .and_then(|d| d.checked_sub_months(Months::new(1)))
    else {
        return neutral;
    };

    let current = total_monthly_spend(subscriptions);
    let existing: Vec<Subscription> = subscriptions
        .iter()
        .filter(|s| s.created_at.date_naive() <= start_of_last_month)
        .cloned()
        .collect();
    let baseline = total_monthly_spend(&existing);

    if baseline == 0.0 {
        return neutral;
    }

    let change = (current - baseline) / baseline * 100.0;
    let direction = if change > 0.0 {
        TrendDirection::Up
    } else if change < 0.0 {
        TrendDirection::Down
    } else {
        TrendDirection::Neutral
    };

    SpendingTrend {
        percentage: change.abs(),
        direction,
    }
}

/// One projected charge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastItem {
    pub subscription_id: String,
    pub name: String,
    pub date: NaiveDate,
    pub amount: f64,
}

/// Projected charges over the next `days` days
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub items: Vec<ForecastItem>,
    pub total: f64,
}

/// Roll each active subscription forward by its billing cycle and collect
/// every charge that lands in `[today, today + days]`
///
/// Billing dates already in the past are rolled forward too, so a stale
/// `next_billing_date` still produces its future charges.
pub fn forecast(subscriptions: &[Subscription], today: NaiveDate, days: u32) -> Forecast {
    let end = today + Duration::days(days as i64);
    let mut items = Vec::new();

    for sub in subscriptions.iter().filter(|s| s.is_active()) {
        let mut date = sub.next_billing_date;
        for _ in 0..MAX_FORECAST_STEPS {
            if date > end {
                break;
            }
            if date >= today {
                items.push(ForecastItem {
                    subscription_id: sub.id.clone(),
                    name: sub.name.clone(),
                    date,
                    amount: crate::normalize::coerce_amount(sub.amount),
                });
            }
            let next = advance_billing_date(date, sub.billing_cycle);
            if next <= date {
                break;
            }
            date = next;
        }
    }

    items.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.name.cmp(&b.name)));
    let total = items.iter().map(|i| i.amount).sum();

    Forecast {
        start: today,
        end,
        items,
        total,
    }
}
