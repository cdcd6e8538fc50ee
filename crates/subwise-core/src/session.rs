//! Signed-in user session
//!
//! A [`Session`] is created when a user id becomes available and owns
//! everything scoped to that user: one synced collection per table, the
//! notification ledger and the background trigger task. Writes go to the
//! backend first and the returned row is then reconciled into the owning
//! collection, so a collection never holds a row the backend rejected.
//!
//! [`Session::sign_out`] closes the change feeds, stops the trigger task,
//! clears every collection back to uninitialized and forgets emitted keys.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::aggregate::{
    self, Forecast, SpendingSummary, SpendingTrend, DEFAULT_UPCOMING_WINDOW_DAYS,
};
use crate::budget::{self, BudgetAlert, BudgetOverview, BudgetStatus};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    Category, CategoryUpdate, NewCategory, NewSubscription, Notification, Subscription,
    SubscriptionStatus, SubscriptionUpdate,
};
use crate::notify::{
    cancellation_trigger, dispatch, DispatchReport, NotificationLedger, Trigger, TriggerEngine,
};
use crate::remote::{
    delete_record, insert_record, update_all_records, update_record, RemoteStore, Table,
};
use crate::sync::{SyncOptions, SyncPhase, SyncedCollection};

/// Source of the current local time
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Current instant for stored timestamps; fixed clocks read as UTC
    fn now_utc(&self) -> DateTime<Utc> {
        self.now().and_utc()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl FixedClock {
    /// Midnight of `date`
    pub fn on(date: NaiveDate) -> Self {
        Self(date.and_time(NaiveTime::MIN))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub upcoming_window_days: u32,
    pub forecast_days: u32,
    /// Run the background trigger task
    pub notifications_enabled: bool,
    pub reevaluate_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            upcoming_window_days: DEFAULT_UPCOMING_WINDOW_DAYS,
            forecast_days: DEFAULT_UPCOMING_WINDOW_DAYS,
            notifications_enabled: true,
            reevaluate_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            upcoming_window_days: config.dashboard.upcoming_window_days,
            forecast_days: config.dashboard.upcoming_window_days,
            notifications_enabled: config.notifications.enabled,
            reevaluate_interval: config.notifications.reevaluate_interval,
        }
    }
}

/// Everything the dashboard shows, derived from the current collections
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub today: NaiveDate,
    pub summary: SpendingSummary,
    pub budgets: Vec<BudgetStatus>,
    pub alerts: Vec<BudgetAlert>,
    pub overview: BudgetOverview,
    pub upcoming: Vec<Subscription>,
    pub trend: SpendingTrend,
    pub forecast: Forecast,
}

/// State shared between the session handle and its trigger task
#[derive(Clone)]
struct Shared {
    store: Arc<dyn RemoteStore>,
    owner: String,
    clock: Arc<dyn Clock>,
    ledger: Arc<Mutex<NotificationLedger>>,
    subscriptions: Arc<SyncedCollection<Subscription>>,
    categories: Arc<SyncedCollection<Category>>,
    notifications: Arc<SyncedCollection<Notification>>,
}

impl Shared {
    fn inputs_ready(&self) -> bool {
        self.subscriptions.phase() == SyncPhase::Ready
            && self.categories.phase() == SyncPhase::Ready
    }

    /// Evaluate every trigger class against the current collections
    async fn evaluate(&self) -> Result<DispatchReport> {
        let subscriptions = self.subscriptions.items();
        let categories = self.categories.items();
        let triggers = TriggerEngine.evaluate(&subscriptions, &categories, self.clock.today());
        self.emit(triggers).await
    }

    /// Create notifications for the triggers not seen before
    async fn emit(&self, triggers: Vec<Trigger>) -> Result<DispatchReport> {
        let existing = self.notifications.items();
        let pending = self.ledger.lock().await.pending(triggers, &existing);
        if pending.is_empty() {
            return Ok(DispatchReport::default());
        }

        let report = dispatch(self.store.as_ref(), &self.owner, pending).await;
        for notification in &report.created {
            self.notifications.upsert(notification.clone()).await?;
        }
        Ok(report)
    }
}

/// Re-evaluate triggers on subscription/category changes and on a timer
async fn watch_triggers(shared: Shared, interval: Duration) {
    let mut subscriptions = shared.subscriptions.watch();
    let mut categories = shared.categories.watch();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = subscriptions.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            changed = categories.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = ticker.tick() => debug!(user_id = %shared.owner, "Periodic notification check"),
        }

        if !shared.inputs_ready() {
            continue;
        }
        // Dedup needs the persisted notifications
        if shared.notifications.ready().await.is_err() {
            continue;
        }

        match shared.evaluate().await {
            Ok(report) if !report.created.is_empty() || report.failed > 0 => {
                info!(
                    user_id = %shared.owner,
                    created = report.created.len(),
                    failed = report.failed,
                    "Notification check finished"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(user_id = %shared.owner, error = %e, "Notification check failed"),
        }
    }
}

pub struct Session {
    shared: Shared,
    options: SessionOptions,
    signed_in: bool,
    trigger_task: Option<JoinHandle<()>>,
}

impl Session {
    /// Start a session for `user_id` on the system clock
    pub fn sign_in(store: Arc<dyn RemoteStore>, user_id: &str, options: SessionOptions) -> Self {
        Self::sign_in_with_clock(store, user_id, options, Arc::new(SystemClock))
    }

    pub fn sign_in_with_clock(
        store: Arc<dyn RemoteStore>,
        user_id: &str,
        options: SessionOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        info!(user_id, backend = store.name(), "Signing in");

        let shared = Shared {
            subscriptions: Arc::new(SyncedCollection::start(
                store.clone(),
                user_id,
                SyncOptions::default(),
            )),
            // Category edits change budget evaluation, so resync the whole list
            categories: Arc::new(SyncedCollection::start(
                store.clone(),
                user_id,
                SyncOptions {
                    resync_on_change: true,
                },
            )),
            notifications: Arc::new(SyncedCollection::start(
                store.clone(),
                user_id,
                SyncOptions::default(),
            )),
            store,
            owner: user_id.to_string(),
            clock,
            ledger: Arc::new(Mutex::new(NotificationLedger::new())),
        };

        let trigger_task = options
            .notifications_enabled
            .then(|| tokio::spawn(watch_triggers(shared.clone(), options.reevaluate_interval)));

        Self {
            shared,
            options,
            signed_in: true,
            trigger_task,
        }
    }

    fn owner(&self) -> Result<&str> {
        if self.signed_in {
            Ok(&self.shared.owner)
        } else {
            Err(Error::SignedOut)
        }
    }

    pub fn user_id(&self) -> &str {
        &self.shared.owner
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    pub fn today(&self) -> NaiveDate {
        self.shared.clock.today()
    }

    /// Wait until all three collections have loaded
    pub async fn wait_ready(&self) -> Result<()> {
        self.shared.subscriptions.ready().await?;
        self.shared.categories.ready().await?;
        self.shared.notifications.ready().await?;
        Ok(())
    }

    /// Re-run the bulk fetch of every collection (manual retry after an error)
    pub async fn refresh(&self) -> Result<()> {
        self.owner()?;
        self.shared.subscriptions.refresh().await?;
        self.shared.categories.refresh().await?;
        self.shared.notifications.refresh().await?;
        Ok(())
    }

    pub fn subscriptions(&self) -> &SyncedCollection<Subscription> {
        &self.shared.subscriptions
    }

    pub fn categories(&self) -> &SyncedCollection<Category> {
        &self.shared.categories
    }

    pub fn notifications(&self) -> &SyncedCollection<Notification> {
        &self.shared.notifications
    }

    pub fn unread_count(&self) -> usize {
        self.shared
            .notifications
            .items()
            .iter()
            .filter(|n| !n.is_read)
            .count()
    }

    /// Derived dashboard view for today
    pub fn dashboard(&self) -> DashboardView {
        let today = self.today();
        let subscriptions = self.shared.subscriptions.items();
        let categories = self.shared.categories.items();
        let window = self.options.upcoming_window_days;

        let budgets = budget::evaluate_subscriptions(&subscriptions, &categories);
        DashboardView {
            today,
            summary: aggregate::summarize(&subscriptions, &categories, today, window),
            alerts: budget::alerts(&budgets),
            overview: budget::overview(&budgets),
            budgets,
            upcoming: aggregate::upcoming_renewals(&subscriptions, today, window),
            trend: aggregate::spending_trend(&subscriptions, today),
            forecast: aggregate::forecast(&subscriptions, today, self.options.forecast_days),
        }
    }

    /// Run the trigger engine now
    pub async fn evaluate_now(&self) -> Result<DispatchReport> {
        self.owner()?;
        self.shared.evaluate().await
    }

    // Subscriptions

    pub async fn add_subscription(&self, draft: NewSubscription) -> Result<Subscription> {
        draft.validate()?;
        let owner = self.owner()?;
        let created: Subscription =
            insert_record(self.shared.store.as_ref(), owner, &draft).await?;
        self.shared.subscriptions.upsert(created.clone()).await?;
        debug!(id = %created.id, "Subscription added");
        Ok(created)
    }

    pub async fn update_subscription(
        &self,
        id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<Subscription> {
        update.validate()?;
        let owner = self.owner()?;
        let updated: Subscription =
            update_record(self.shared.store.as_ref(), owner, id, update).await?;
        self.shared.subscriptions.upsert(updated.clone()).await?;
        Ok(updated)
    }

    /// Change a subscription's status; deactivating one emits a cancellation notice
    pub async fn set_subscription_status(
        &self,
        id: &str,
        status: SubscriptionStatus,
    ) -> Result<Subscription> {
        let was_active = self
            .shared
            .subscriptions
            .items()
            .iter()
            .find(|s| s.id == id)
            .map_or(true, Subscription::is_active);

        let updated = self
            .update_subscription(id, &SubscriptionUpdate::status(status))
            .await?;

        if was_active && !updated.is_active() {
            let trigger = cancellation_trigger(&updated, self.today());
            let report = self.shared.emit(vec![trigger]).await?;
            if report.failed > 0 {
                warn!(id, "Cancellation notification was not created");
            }
        }
        Ok(updated)
    }

    pub async fn delete_subscription(&self, id: &str) -> Result<()> {
        let owner = self.owner()?;
        delete_record::<Subscription>(self.shared.store.as_ref(), owner, id).await?;
        self.shared.subscriptions.remove(id).await
    }

    // Categories

    pub async fn add_category(&self, draft: NewCategory) -> Result<Category> {
        draft.validate()?;
        let owner = self.owner()?;
        let created: Category = insert_record(self.shared.store.as_ref(), owner, &draft).await?;
        self.shared.categories.upsert(created.clone()).await?;
        Ok(created)
    }

    pub async fn update_category(&self, id: &str, update: &CategoryUpdate) -> Result<Category> {
        update.validate()?;
        let owner = self.owner()?;
        let updated: Category =
            update_record(self.shared.store.as_ref(), owner, id, update).await?;
        self.shared.categories.upsert(updated.clone()).await?;
        Ok(updated)
    }

    /// Set several budgets at once; nothing is written if any value is invalid
    pub async fn set_budgets(&self, budgets: &[(String, f64)]) -> Result<Vec<Category>> {
        let updates: Vec<(&str, CategoryUpdate)> = budgets
            .iter()
            .map(|(id, budget)| (id.as_str(), CategoryUpdate::budget(*budget)))
            .collect();
        for (_, update) in &updates {
            update.validate()?;
        }

        let mut updated = Vec::with_capacity(updates.len());
        for (id, update) in &updates {
            updated.push(self.update_category(id, update).await?);
        }
        Ok(updated)
    }

    pub async fn delete_category(&self, id: &str) -> Result<()> {
        let owner = self.owner()?;
        delete_record::<Category>(self.shared.store.as_ref(), owner, id).await?;
        self.shared.categories.remove(id).await
    }

    // Notifications

    pub async fn mark_read(&self, id: &str) -> Result<Notification> {
        let owner = self.owner()?;
        let updated: Notification = update_record(
            self.shared.store.as_ref(),
            owner,
            id,
            &json!({ "is_read": true }),
        )
        .await?;
        self.shared.notifications.upsert(updated.clone()).await?;
        Ok(updated)
    }

    pub async fn mark_all_read(&self) -> Result<usize> {
        let owner = self.owner()?;
        let updated: Vec<Notification> =
            update_all_records(self.shared.store.as_ref(), owner, &json!({ "is_read": true }))
                .await?;
        let count = updated.len();
        for notification in updated {
            self.shared.notifications.upsert(notification).await?;
        }
        Ok(count)
    }

    pub async fn delete_notification(&self, id: &str) -> Result<()> {
        let owner = self.owner()?;
        delete_record::<Notification>(self.shared.store.as_ref(), owner, id).await?;
        self.shared.notifications.remove(id).await
    }

    pub async fn clear_notifications(&self) -> Result<()> {
        let owner = self.owner()?;
        self.shared
            .store
            .delete_all(Table::Notifications, owner)
            .await?;
        for notification in self.shared.notifications.items().iter() {
            self.shared.notifications.remove(&notification.id).await?;
        }
        Ok(())
    }

    /// Tear down feeds and the trigger task, clear every collection
    pub async fn sign_out(&mut self) -> Result<()> {
        if !self.signed_in {
            return Ok(());
        }
        self.signed_in = false;

        if let Some(task) = self.trigger_task.take() {
            task.abort();
            let _ = task.await;
        }
        self.shared.subscriptions.reset().await?;
        self.shared.categories.reset().await?;
        self.shared.notifications.reset().await?;
        *self.shared.ledger.lock().await = NotificationLedger::new();

        info!(user_id = %self.shared.owner, "Signed out");
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = self.trigger_task.take() {
            task.abort();
        }
    }
}
