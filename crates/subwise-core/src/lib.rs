//! Subwise Core Library
//!
//! Shared functionality for the subwise subscription expense tracker:
//! - Monthly-equivalent normalization and date math
//! - Spending aggregation, trend and forecast
//! - Budget evaluation and alerts
//! - Notification triggers with session-scoped dedup
//! - Remote backend contract with in-memory and PostgREST adapters
//! - Synced per-table collections driven by change feeds
//! - Profiles, profile pictures and the subscription review schedule

pub mod aggregate;
pub mod budget;
pub mod config;
pub mod error;
pub mod models;
pub mod normalize;
pub mod notify;
pub mod profile;
pub mod remote;
pub mod review;
pub mod session;
pub mod sync;

/// Test utilities including the mock PostgREST server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    BillingCycle, Category, CategoryUpdate, NewCategory, NewNotification, NewSubscription,
    Notification, NotificationType, Profile, ProfileUpdate, Subscription, SubscriptionStatus,
    SubscriptionUpdate,
};
pub use notify::{DispatchReport, NotificationLedger, Trigger, TriggerEngine, TriggerKey};
pub use profile::{ProfileService, RetryPolicy};
pub use remote::{BlobStore, ChangeEvent, MemoryStore, RemoteStore, RestStore, Snapshot, Table};
pub use review::{ReviewFrequency, ReviewSchedule, ReviewSlot, ScheduleChange};
pub use session::{Clock, DashboardView, FixedClock, Session, SessionOptions, SystemClock};
pub use sync::{SyncPhase, SyncedCollection};
