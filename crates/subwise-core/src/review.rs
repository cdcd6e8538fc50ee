//! Periodic subscription review schedule
//!
//! A user can ask to be reminded to review their subscriptions weekly,
//! monthly, quarterly or yearly. The schedule is stored on the profile row as
//! `schedule_review_enabled`, `schedule_review_frequency`, `last_review_date`
//! and `next_review_date`; this module only does the calendar math.
//!
//! An optional [`ReviewSlot`] pins each review to a fixed time: the nth
//! weekday of the month, or just the weekday for weekly reviews. Slot times
//! are UTC.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// How often a review comes around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewFrequency {
    Weekly,
    #[default]
    Monthly,
    Quarterly,
    Yearly,
}

impl ReviewFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Quarterly => "quarterly",
            Self::Yearly => "yearly",
        }
    }

    /// One period after `from`
    ///
    /// Month arithmetic clamps to the end of a shorter month, so a monthly
    /// review from Jan 31 lands on the last day of February.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::Weekly => return from + Duration::days(7),
            Self::Monthly => 1,
            Self::Quarterly => 3,
            Self::Yearly => 12,
        };
        from.checked_add_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl FromStr for ReviewFrequency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "quarterly" => Ok(Self::Quarterly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("Unknown review frequency: {}", s)),
        }
    }
}

impl std::fmt::Display for ReviewFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed weekday and time a review snaps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewSlot {
    /// 0 = Sunday ... 6 = Saturday
    pub day_of_week: u8,
    /// 1 = first occurrence in the month ... 5 = fifth; unused for weekly reviews
    pub week_of_month: u8,
    pub time: NaiveTime,
}

impl Default for ReviewSlot {
    fn default() -> Self {
        Self {
            day_of_week: 1,
            week_of_month: 1,
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl ReviewSlot {
    /// First slot occurrence that is not before `from`
    pub fn first_at_or_after(&self, from: NaiveDateTime, weekly: bool) -> NaiveDateTime {
        if weekly {
            let weekday = from.weekday().num_days_from_sunday() as i64;
            let offset = (self.day_of_week as i64 - weekday).rem_euclid(7);
            let candidate = (from.date() + Duration::days(offset)).and_time(self.time);
            return if candidate >= from {
                candidate
            } else {
                candidate + Duration::days(7)
            };
        }

        let this_month = self.in_month(from.year(), from.month());
        if this_month >= from {
            return this_month;
        }
        let (year, month) = if from.month() == 12 {
            (from.year() + 1, 1)
        } else {
            (from.year(), from.month() + 1)
        };
        self.in_month(year, month)
    }

    /// The slot for a given month
    ///
    /// A fifth occurrence that does not exist spills into the next month, the
    /// same as counting weeks forward on a calendar.
    fn in_month(&self, year: i32, month: u32) -> NaiveDateTime {
        let first = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN);
        let first_weekday = first.weekday().num_days_from_sunday() as i64;
        let offset = (self.day_of_week as i64 - first_weekday).rem_euclid(7);
        let weeks = self.week_of_month.saturating_sub(1) as i64;
        let date = first + Duration::days(offset + weeks * 7);
        date.and_time(self.time)
    }

    fn validate(&self) -> Result<()> {
        if self.day_of_week > 6 {
            return Err(Error::InvalidData(format!(
                "day_of_week must be 0-6, got {}",
                self.day_of_week
            )));
        }
        if !(1..=5).contains(&self.week_of_month) {
            return Err(Error::InvalidData(format!(
                "week_of_month must be 1-5, got {}",
                self.week_of_month
            )));
        }
        Ok(())
    }
}

/// Null columns read as the default value
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Review settings as stored on the profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSchedule {
    #[serde(
        rename = "schedule_review_enabled",
        default,
        deserialize_with = "null_as_default"
    )]
    pub enabled: bool,
    #[serde(
        rename = "schedule_review_frequency",
        default,
        deserialize_with = "null_as_default"
    )]
    pub frequency: ReviewFrequency,
    #[serde(rename = "last_review_date", default)]
    pub last_reviewed: Option<DateTime<Utc>>,
    #[serde(rename = "next_review_date", default)]
    pub next_review: Option<DateTime<Utc>>,
    #[serde(rename = "review_slot", default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<ReviewSlot>,
}

/// Fields a user can change on the schedule
#[derive(Debug, Clone, Default)]
pub struct ScheduleChange {
    pub frequency: Option<ReviewFrequency>,
    pub slot: Option<ReviewSlot>,
}

impl ReviewSchedule {
    /// Turn reminders on, counting today as the last review
    pub fn enable(&self, now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            last_reviewed: Some(now),
            next_review: Some(self.next_review_after(now)),
            ..self.clone()
        }
    }

    /// Apply a change; the schedule becomes enabled and the next review is
    /// recomputed from the last one (or from `now` if there was none)
    pub fn update(&self, change: ScheduleChange, now: DateTime<Utc>) -> Result<Self> {
        let mut schedule = self.clone();
        if let Some(frequency) = change.frequency {
            schedule.frequency = frequency;
        }
        if let Some(slot) = change.slot {
            slot.validate()?;
            schedule.slot = Some(slot);
        }
        let base = schedule.last_reviewed.unwrap_or(now);
        schedule.enabled = true;
        schedule.last_reviewed = Some(base);
        schedule.next_review = Some(schedule.next_review_after(base));
        Ok(schedule)
    }

    /// Turn reminders off and forget both review dates
    pub fn disable(&self) -> Self {
        Self {
            enabled: false,
            last_reviewed: None,
            next_review: None,
            ..self.clone()
        }
    }

    /// Record a completed review and schedule the next one
    pub fn mark_reviewed(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_reviewed: Some(now),
            next_review: Some(self.next_review_after(now)),
            ..self.clone()
        }
    }

    /// Whether a review is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_review.is_some_and(|next| next <= now)
    }

    /// One period after `from`, snapped forward to the slot if there is one
    pub fn next_review_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let advanced = self.frequency.advance(from);
        match &self.slot {
            Some(slot) => slot
                .first_at_or_after(
                    advanced.naive_utc(),
                    self.frequency == ReviewFrequency::Weekly,
                )
                .and_utc(),
            None => advanced,
        }
    }
}
