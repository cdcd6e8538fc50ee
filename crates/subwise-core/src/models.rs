//! Domain models for subwise
//!
//! Every record mirrors a row of the hosted backend, so field names follow
//! the backend's column names. The client never owns these rows; it holds a
//! read/write-through copy for the signed-in user.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::normalize::{deserialize_amount, monthly_equivalent};
use crate::review::ReviewSchedule;

/// Default reminder lead time for new subscriptions
pub const DEFAULT_REMINDER_DAYS: u32 = 3;

/// Allowed range for `reminder_days`
pub const REMINDER_DAYS_RANGE: std::ops::RangeInclusive<u32> = 1..=30;

/// Subscription billing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// Short suffix for "$9.99/mo" style display
    pub fn short_label(&self) -> &'static str {
        match self {
            Self::Weekly => "wk",
            Self::Monthly => "mo",
            Self::Quarterly => "qtr",
            Self::Yearly => "yr",
        }
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" | "week" => Ok(Self::Weekly),
            "monthly" | "month" => Ok(Self::Monthly),
            "quarterly" | "quarter" => Ok(Self::Quarterly),
            "yearly" | "year" | "annual" | "annually" => Ok(Self::Yearly),
            _ => Err(format!("Unknown billing cycle: {}", s)),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    Active,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "inactive" | "cancelled" | "canceled" => Ok(Self::Inactive),
            _ => Err(format!("Unknown subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_reminder_days() -> u32 {
    DEFAULT_REMINDER_DAYS
}

/// A recurring subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Charge per billing cycle; malformed values decode as 0
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub amount: f64,
    pub billing_cycle: BillingCycle,
    /// Category identifier (names are resolved through the category list)
    #[serde(rename = "category", default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub status: SubscriptionStatus,
    pub next_billing_date: NaiveDate,
    #[serde(default = "default_reminder_days")]
    pub reminder_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Cost normalized to one month
    pub fn monthly_cost(&self) -> f64 {
        monthly_equivalent(self.amount, self.billing_cycle)
    }
}

/// A subscription to be created (before the backend assigns an id)
#[derive(Debug, Clone, Serialize)]
pub struct NewSubscription {
    pub name: String,
    pub amount: f64,
    pub billing_cycle: BillingCycle,
    #[serde(rename = "category")]
    pub category_id: Option<String>,
    pub status: SubscriptionStatus,
    pub next_billing_date: NaiveDate,
    pub reminder_days: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NewSubscription {
    /// Active subscription with the default reminder lead time
    pub fn new(
        name: impl Into<String>,
        amount: f64,
        billing_cycle: BillingCycle,
        next_billing_date: NaiveDate,
    ) -> Self {
        Self {
            name: name.into(),
            amount,
            billing_cycle,
            category_id: None,
            status: SubscriptionStatus::Active,
            next_billing_date,
            reminder_days: DEFAULT_REMINDER_DAYS,
            description: None,
        }
    }

    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn with_reminder_days(mut self, days: u32) -> Self {
        self.reminder_days = days;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name, "Subscription")?;
        validate_amount(self.amount, "amount")?;
        validate_reminder_days(self.reminder_days)
    }
}

/// Partial subscription update; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubscriptionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub billing_cycle: Option<BillingCycle>,
    #[serde(rename = "category", skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SubscriptionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_billing_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SubscriptionUpdate {
    pub fn status(status: SubscriptionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name, "Subscription")?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount, "amount")?;
        }
        if let Some(days) = self.reminder_days {
            validate_reminder_days(days)?;
        }
        Ok(())
    }
}

/// A spending category with a monthly budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub user_id: String,
    pub name: String,
    /// Monthly budget; malformed values decode as 0
    #[serde(default, deserialize_with = "deserialize_amount")]
    pub budget: f64,
    #[serde(default)]
    pub color: String,
}

/// A category to be created
#[derive(Debug, Clone, Serialize)]
pub struct NewCategory {
    pub name: String,
    pub budget: f64,
    pub color: String,
}

impl NewCategory {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name, "Category")?;
        validate_amount(self.budget, "budget")
    }
}

/// Partial category update
#[derive(Debug, Clone, Default, Serialize)]
pub struct CategoryUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl CategoryUpdate {
    pub fn budget(budget: f64) -> Self {
        Self {
            budget: Some(budget),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name, "Category")?;
        }
        if let Some(budget) = self.budget {
            validate_amount(budget, "budget")?;
        }
        Ok(())
    }
}

/// Kinds of in-app notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    /// A payment falls inside the subscription's reminder window
    Payment,
    /// A yearly subscription renews within a week
    Renewal,
    /// A category is at or over 90% of its budget
    Budget,
    /// A subscription was deactivated
    Cancellation,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Payment => "payment",
            Self::Renewal => "renewal",
            Self::Budget => "budget",
            Self::Cancellation => "cancellation",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Payment => "Upcoming Payment",
            Self::Renewal => "Annual Renewal",
            Self::Budget => "Budget Alert",
            Self::Cancellation => "Subscription Cancelled",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An in-app notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub is_read: bool,
    /// Subscription this notification is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    /// `type:subject:bucket` of the trigger that created it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A notification to be created
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub is_read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
}

impl NewNotification {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        related_id: Option<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            notification_type,
            is_read: false,
            related_id,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Whether `existing` stands for the same trigger condition
    ///
    /// Keyed rows compare by key only, so edits to the wording inputs (name,
    /// amount) do not make an old condition look new. Rows written without a
    /// key fall back to comparing type, related id and message.
    pub fn matches(&self, existing: &Notification) -> bool {
        match (&self.dedup_key, &existing.dedup_key) {
            (Some(key), Some(stored)) => key == stored,
            _ => {
                existing.notification_type == self.notification_type
                    && existing.related_id == self.related_id
                    && existing.message == self.message
            }
        }
    }
}

/// Contact fields on a profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// A user's profile (1:1 with the user)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub user_id: String,
    #[serde(flatten)]
    pub contact: ContactDetails,
    /// Storage path of the picture; resolved to a signed URL when read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(flatten)]
    pub review: ReviewSchedule,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Partial profile update
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProfileUpdate {
    #[serde(flatten)]
    pub contact: ContactDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    /// Written as a whole when present
    #[serde(flatten)]
    pub review: Option<ReviewSchedule>,
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidData(format!("{} name must not be empty", what)));
    }
    Ok(())
}

fn validate_amount(value: f64, field: &str) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(Error::InvalidData(format!(
            "{} must be a non-negative number, got {}",
            field, value
        )));
    }
    Ok(())
}

fn validate_reminder_days(days: u32) -> Result<()> {
    if !REMINDER_DAYS_RANGE.contains(&days) {
        return Err(Error::InvalidData(format!(
            "reminder_days must be between {} and {}, got {}",
            REMINDER_DAYS_RANGE.start(),
            REMINDER_DAYS_RANGE.end(),
            days
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_billing_cycle_parse() {
        assert_eq!("Monthly".parse::<BillingCycle>().unwrap(), BillingCycle::Monthly);
        assert_eq!("annual".parse::<BillingCycle>().unwrap(), BillingCycle::Yearly);
        assert!("fortnightly".parse::<BillingCycle>().is_err());
    }

    #[test]
    fn test_subscription_from_backend_row() {
        let row = json!({
            "id": "s1",
            "user_id": "u1",
            "name": "Netflix",
            "amount": "15.49",
            "billing_cycle": "monthly",
            "category": "c1",
            "status": "active",
            "next_billing_date": "2024-05-01",
            "reminder_days": 7,
            "created_at": "2024-01-01T10:00:00+00:00",
            "updated_at": "2024-01-02T10:00:00+00:00"
        });
        let sub: Subscription = serde_json::from_value(row).unwrap();
        assert_eq!(sub.amount, 15.49);
        assert_eq!(sub.category_id.as_deref(), Some("c1"));
        assert!(sub.is_active());
    }

    #[test]
    fn test_malformed_amount_decodes_as_zero() {
        let row = json!({
            "id": "s1",
            "user_id": "u1",
            "name": "Mystery",
            "amount": "not a number",
            "billing_cycle": "yearly",
            "next_billing_date": "2024-05-01"
        });
        let sub: Subscription = serde_json::from_value(row).unwrap();
        assert_eq!(sub.amount, 0.0);
        assert_eq!(sub.reminder_days, DEFAULT_REMINDER_DAYS);
        assert_eq!(sub.status, SubscriptionStatus::Active);

        let missing: Category = serde_json::from_value(json!({
            "id": "c1", "user_id": "u1", "name": "Music"
        }))
        .unwrap();
        assert_eq!(missing.budget, 0.0);
    }

    #[test]
    fn test_notification_wire_names() {
        let n = NewNotification::new(NotificationType::Budget, "Budget Alert", "msg", None);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "budget");
        assert_eq!(value["is_read"], false);
        assert!(value.get("related_id").is_none());
    }

    #[test]
    fn test_new_subscription_validation() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let ok = NewSubscription::new("Spotify", 10.99, BillingCycle::Monthly, date);
        assert!(ok.validate().is_ok());

        let negative = NewSubscription::new("Spotify", -1.0, BillingCycle::Monthly, date);
        assert!(negative.validate().is_err());

        let nan = NewSubscription::new("Spotify", f64::NAN, BillingCycle::Monthly, date);
        assert!(nan.validate().is_err());

        let blank = NewSubscription::new("  ", 1.0, BillingCycle::Monthly, date);
        assert!(blank.validate().is_err());

        let too_far = ok.clone().with_reminder_days(31);
        assert!(too_far.validate().is_err());
        let zero = ok.with_reminder_days(0);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_profile_flattens_contact() {
        let row = json!({
            "id": "p1",
            "user_id": "u1",
            "email": "a@example.com",
            "city": "Lisbon",
            "profile_picture": "u1/profile-picture.png"
        });
        let profile: Profile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.contact.email.as_deref(), Some("a@example.com"));
        assert_eq!(profile.contact.city.as_deref(), Some("Lisbon"));
        assert!(profile.contact.phone.is_none());
        assert!(!profile.review.enabled);
        assert!(profile.review.next_review.is_none());

        let update = ProfileUpdate {
            contact: ContactDetails {
                phone: Some("555".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({"phone": "555"}));
    }
}
