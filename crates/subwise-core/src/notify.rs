//! Notification trigger engine
//!
//! Three independent trigger classes run over the current subscriptions and
//! categories:
//!
//! - payment: an active subscription is due within its reminder window
//! - renewal: an active yearly subscription renews within a week
//! - budget: a category has used at least 90% of its budget
//!
//! Each trigger carries a dedup key `type:subject:bucket` where the bucket is
//! the day count or the floored percentage. Payment and renewal keys also
//! name the due date (`payment:<id>:2@2024-03-03`), so the next billing
//! cycle reaching the same day count is a new condition. The [`NotificationLedger`] owned
//! by a session remembers claimed keys so re-evaluating unchanged data emits
//! nothing. Created notifications carry their key in `dedup_key`, and a
//! trigger whose key is already stored counts as known, so this survives
//! restarts and edits to the subscription's name or amount.

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{debug, warn};

use crate::budget::{evaluate_subscriptions, DANGER_THRESHOLD, WARNING_THRESHOLD};
use crate::models::{
    BillingCycle, Category, NewNotification, Notification, NotificationType, Subscription,
};
use crate::normalize::{coerce_amount, days_between};
use crate::remote::{insert_record, RemoteStore};

/// Yearly subscriptions renewing within this many days trigger a reminder
pub const RENEWAL_WINDOW_DAYS: i64 = 7;

/// Dedup key of a trigger condition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub kind: NotificationType,
    /// Subscription id, or category name for budget triggers
    pub subject: String,
    /// Days until due, or floored percentage used
    pub bucket: i64,
    /// Billing date the day count refers to
    pub due: Option<NaiveDate>,
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.subject, self.bucket)?;
        if let Some(due) = self.due {
            write!(f, "@{}", due)?;
        }
        Ok(())
    }
}

/// A notification that a trigger condition wants to emit
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub key: TriggerKey,
    pub draft: NewNotification,
}

impl Trigger {
    /// Pair a key with its draft; the draft records the key for later sessions
    pub fn new(key: TriggerKey, draft: NewNotification) -> Self {
        let draft = draft.with_dedup_key(key.to_string());
        Self { key, draft }
    }
}

fn in_days(days: i64) -> String {
    match days {
        0 => "today".to_string(),
        1 => "in 1 day".to_string(),
        n => format!("in {} days", n),
    }
}

/// Active subscriptions with `0 < days until due <= reminder_days`
pub fn payment_triggers(subscriptions: &[Subscription], today: NaiveDate) -> Vec<Trigger> {
    subscriptions
        .iter()
        .filter(|s| s.is_active())
        .filter_map(|sub| {
            let days = days_between(today, sub.next_billing_date);
            if days <= 0 || days > sub.reminder_days as i64 {
                return None;
            }
            let message = format!(
                "Payment of ${:.2} for {} is due {}",
                coerce_amount(sub.amount),
                sub.name,
                in_days(days)
            );
            Some(Trigger::new(
                TriggerKey {
                    kind: NotificationType::Payment,
                    subject: sub.id.clone(),
                    bucket: days,
                    due: Some(sub.next_billing_date),
                },
                NewNotification::new(
                    NotificationType::Payment,
                    NotificationType::Payment.label(),
                    message,
                    Some(sub.id.clone()),
                ),
            ))
        })
        .collect()
}

/// Active yearly subscriptions with `0 <= days until due <= 7`
pub fn renewal_triggers(subscriptions: &[Subscription], today: NaiveDate) -> Vec<Trigger> {
    subscriptions
        .iter()
        .filter(|s| s.is_active() && s.billing_cycle == BillingCycle::Yearly)
        .filter_map(|sub| {
            let days = days_between(today, sub.next_billing_date);
            if !(0..=RENEWAL_WINDOW_DAYS).contains(&days) {
                return None;
            }
            let message = format!(
                "{} subscription will renew automatically {}",
                sub.name,
                in_days(days)
            );
            Some(Trigger::new(
                TriggerKey {
                    kind: NotificationType::Renewal,
                    subject: sub.id.clone(),
                    bucket: days,
                    due: Some(sub.next_billing_date),
                },
                NewNotification::new(
                    NotificationType::Renewal,
                    NotificationType::Renewal.label(),
                    message,
                    Some(sub.id.clone()),
                ),
            ))
        })
        .collect()
}

/// Categories at or above the warning threshold
pub fn budget_triggers(subscriptions: &[Subscription], categories: &[Category]) -> Vec<Trigger> {
    evaluate_subscriptions(subscriptions, categories)
        .into_iter()
        .filter(|status| status.percentage_used >= WARNING_THRESHOLD)
        .map(|status| {
            let bucket = status.percentage_used.floor() as i64;
            let message = if status.percentage_used >= DANGER_THRESHOLD {
                format!(
                    "{} category has exceeded its monthly budget ({}% used)",
                    status.name, bucket
                )
            } else {
                format!(
                    "{} category is approaching its monthly budget limit ({}% used)",
                    status.name, bucket
                )
            };
            Trigger::new(
                TriggerKey {
                    kind: NotificationType::Budget,
                    subject: status.name.clone(),
                    bucket,
                    due: None,
                },
                NewNotification::new(
                    NotificationType::Budget,
                    NotificationType::Budget.label(),
                    message,
                    None,
                ),
            )
        })
        .collect()
}

/// Notification for a subscription that was just deactivated
pub fn cancellation_trigger(subscription: &Subscription, today: NaiveDate) -> Trigger {
    Trigger::new(
        TriggerKey {
            kind: NotificationType::Cancellation,
            subject: subscription.id.clone(),
            bucket: today.num_days_from_ce() as i64,
            due: None,
        },
        NewNotification::new(
            NotificationType::Cancellation,
            NotificationType::Cancellation.label(),
            format!("{} subscription has been cancelled", subscription.name),
            Some(subscription.id.clone()),
        ),
    )
}

/// Runs every trigger class over the current data
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerEngine;

impl TriggerEngine {
    pub fn evaluate(
        &self,
        subscriptions: &[Subscription],
        categories: &[Category],
        today: NaiveDate,
    ) -> Vec<Trigger> {
        let mut triggers = payment_triggers(subscriptions, today);
        triggers.extend(renewal_triggers(subscriptions, today));
        triggers.extend(budget_triggers(subscriptions, categories));
        triggers
    }
}

/// Session-scoped memory of emitted trigger keys
#[derive(Debug, Default)]
pub struct NotificationLedger {
    claimed: HashSet<TriggerKey>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the trigger was already emitted in this session or is stored
    pub fn is_known(&self, trigger: &Trigger, existing: &[Notification]) -> bool {
        self.claimed.contains(&trigger.key) || existing.iter().any(|n| trigger.draft.matches(n))
    }

    /// Record a key; false if it was already claimed
    pub fn claim(&mut self, key: TriggerKey) -> bool {
        self.claimed.insert(key)
    }

    /// Drop known triggers and claim the rest
    ///
    /// Claiming happens before the write, so a failed creation is not
    /// retried on the next evaluation.
    pub fn pending(&mut self, triggers: Vec<Trigger>, existing: &[Notification]) -> Vec<Trigger> {
        let mut fresh = Vec::new();
        for trigger in triggers {
            if self.is_known(&trigger, existing) {
                self.claimed.insert(trigger.key);
                continue;
            }
            if self.claim(trigger.key.clone()) {
                fresh.push(trigger);
            }
        }
        fresh
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

/// Outcome of writing triggers to the backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub created: Vec<Notification>,
    pub failed: usize,
}

/// Create a notification for each trigger
///
/// Failures are logged and counted, never returned.
pub async fn dispatch(
    store: &dyn RemoteStore,
    owner: &str,
    triggers: Vec<Trigger>,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for trigger in triggers {
        match insert_record::<Notification, _>(store, owner, &trigger.draft).await {
            Ok(notification) => {
                debug!(key = %trigger.key, "Notification created");
                report.created.push(notification);
            }
            Err(e) => {
                warn!(key = %trigger.key, error = %e, "Failed to create notification");
                report.failed += 1;
            }
        }
    }
    report
}
