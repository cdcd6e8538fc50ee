//! CLI command tests
//!
//! This module contains all tests for the CLI commands. Each test works on
//! its own snapshot file in a temp directory.

use std::path::{Path, PathBuf};

use chrono::{Duration, Local, NaiveDate};
use subwise_core::models::{BillingCycle, ContactDetails, NotificationType, SubscriptionStatus};
use subwise_core::review::ReviewFrequency;
use subwise_core::remote::{MemoryStore, Snapshot};
use subwise_core::Config;
use tempfile::TempDir;

use crate::commands::{self, money, truncate, App, Target, LOCAL_USER};

fn snapshot_path(dir: &TempDir) -> PathBuf {
    dir.path().join("subwise.json")
}

async fn setup_app() -> (TempDir, App) {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);
    commands::cmd_init(&path).unwrap();
    let app = App::open(Target::Local(path), LOCAL_USER, Config::default(), false)
        .await
        .unwrap();
    (dir, app)
}

fn read_snapshot(path: &Path) -> Snapshot {
    MemoryStore::load(path).unwrap().snapshot().unwrap()
}

fn in_days(n: i64) -> String {
    (Local::now().date_naive() + Duration::days(n))
        .format("%Y-%m-%d")
        .to_string()
}

async fn add_subscription(app: &App, name: &str, amount: f64, next: &str, category: Option<&str>) {
    commands::cmd_subscriptions_add(
        app,
        name,
        amount,
        BillingCycle::Monthly,
        next,
        category,
        3,
        None,
    )
    .await
    .unwrap();
}

// ========== Helper Tests ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello world", 8), "hello...");
    assert_eq!(truncate("", 5), "");
    assert_eq!(truncate("café crème", 7), "café...");
}

#[test]
fn test_money() {
    assert_eq!(money(9.99), "$9.99");
    assert_eq!(money(0.0), "$0.00");
    assert_eq!(money(1234.5), "$1234.50");
}

#[test]
fn test_resolve_user_priority() {
    let mut config = Config::default();
    assert_eq!(
        commands::resolve_user(None, &config, false).unwrap(),
        LOCAL_USER
    );
    assert!(commands::resolve_user(None, &config, true).is_err());

    config.backend.user_id = Some("from-config".to_string());
    assert_eq!(
        commands::resolve_user(None, &config, true).unwrap(),
        "from-config"
    );
    assert_eq!(
        commands::resolve_user(Some("flag"), &config, true).unwrap(),
        "flag"
    );
}

// ========== Init / Open Tests ==========

#[test]
fn test_cmd_init_creates_empty_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = snapshot_path(&dir);

    commands::cmd_init(&path).unwrap();
    assert!(path.exists());
    let snapshot = read_snapshot(&path);
    assert!(snapshot.subscriptions.is_empty());
    assert!(snapshot.categories.is_empty());

    // Second init leaves the file alone
    commands::cmd_init(&path).unwrap();
}

#[tokio::test]
async fn test_open_missing_snapshot_suggests_init() {
    let dir = TempDir::new().unwrap();
    let result = App::open(
        Target::Local(snapshot_path(&dir)),
        LOCAL_USER,
        Config::default(),
        false,
    )
    .await;

    let err = result.err().expect("open should fail");
    assert!(err.to_string().contains("subwise init"));
}

#[test]
fn test_cmd_config() {
    let mut config = Config::default();
    config.backend.api_key = "secret".to_string();
    assert!(commands::cmd_config(&config, None).is_ok());
}

// ========== Category Command Tests ==========

#[tokio::test]
async fn test_cmd_categories_add_persists() {
    let (dir, app) = setup_app().await;

    commands::cmd_categories_add(&app, "Streaming", 40.0, "#ef4444")
        .await
        .unwrap();
    assert_eq!(app.session.categories().items().len(), 1);

    let snapshot = read_snapshot(&snapshot_path(&dir));
    assert_eq!(snapshot.categories.len(), 1);
    assert_eq!(snapshot.categories[0]["name"], "Streaming");
    assert_eq!(snapshot.categories[0]["user_id"], LOCAL_USER);
}

#[tokio::test]
async fn test_cmd_categories_add_rejects_negative_budget() {
    let (dir, app) = setup_app().await;

    let result = commands::cmd_categories_add(&app, "Bad", -5.0, "#000000").await;
    assert!(result.is_err());
    assert!(read_snapshot(&snapshot_path(&dir)).categories.is_empty());
}

#[tokio::test]
async fn test_cmd_categories_budget_by_name() {
    let (_dir, app) = setup_app().await;
    commands::cmd_categories_add(&app, "Cloud", 10.0, "#0ea5e9")
        .await
        .unwrap();

    commands::cmd_categories_budget(&app, "cloud", 25.0)
        .await
        .unwrap();

    let category = commands::find_category(&app, "Cloud").unwrap();
    assert_eq!(category.budget, 25.0);
}

#[tokio::test]
async fn test_cmd_categories_delete() {
    let (dir, app) = setup_app().await;
    commands::cmd_categories_add(&app, "Temp", 0.0, "#ffffff")
        .await
        .unwrap();

    commands::cmd_categories_delete(&app, "Temp").await.unwrap();
    assert!(app.session.categories().items().is_empty());
    assert!(read_snapshot(&snapshot_path(&dir)).categories.is_empty());

    assert!(commands::cmd_categories_delete(&app, "Temp").await.is_err());
}

// ========== Subscription Command Tests ==========

#[tokio::test]
async fn test_cmd_subscriptions_list_empty() {
    let (_dir, app) = setup_app().await;
    assert!(commands::cmd_subscriptions_list(&app).is_ok());
}

#[tokio::test]
async fn test_cmd_subscriptions_add_with_category() {
    let (dir, app) = setup_app().await;
    commands::cmd_categories_add(&app, "Streaming", 40.0, "#ef4444")
        .await
        .unwrap();
    let streaming = commands::find_category(&app, "streaming").unwrap();

    add_subscription(&app, "Netflix", 15.49, &in_days(20), Some("Streaming")).await;

    let sub = commands::find_subscription(&app, "netflix").unwrap();
    assert_eq!(sub.category_id.as_deref(), Some(streaming.id.as_str()));
    assert_eq!(sub.status, SubscriptionStatus::Active);

    let snapshot = read_snapshot(&snapshot_path(&dir));
    assert_eq!(snapshot.subscriptions.len(), 1);
    assert_eq!(snapshot.subscriptions[0]["category"], streaming.id.as_str());
    assert!(commands::cmd_subscriptions_list(&app).is_ok());
}

#[tokio::test]
async fn test_cmd_subscriptions_add_invalid_date() {
    let (_dir, app) = setup_app().await;

    let result = commands::cmd_subscriptions_add(
        &app,
        "Netflix",
        15.49,
        BillingCycle::Monthly,
        "07/01/2024",
        None,
        3,
        None,
    )
    .await;
    assert!(result.is_err());
    assert!(app.session.subscriptions().items().is_empty());
}

#[tokio::test]
async fn test_cmd_subscriptions_add_unknown_category() {
    let (_dir, app) = setup_app().await;

    let result = commands::cmd_subscriptions_add(
        &app,
        "Netflix",
        15.49,
        BillingCycle::Monthly,
        &in_days(10),
        Some("Nope"),
        3,
        None,
    )
    .await;
    let err = result.unwrap_err();
    assert!(err.to_string().contains("Category not found"));
}

#[tokio::test]
async fn test_cmd_subscriptions_add_rejects_reminder_out_of_range() {
    let (_dir, app) = setup_app().await;

    let result = commands::cmd_subscriptions_add(
        &app,
        "Netflix",
        15.49,
        BillingCycle::Monthly,
        &in_days(10),
        None,
        45,
        None,
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_cmd_subscriptions_status_inactive_notifies_cancellation() {
    let (dir, app) = setup_app().await;
    add_subscription(&app, "Hulu", 17.99, &in_days(20), None).await;

    commands::cmd_subscriptions_status(&app, "Hulu", SubscriptionStatus::Inactive)
        .await
        .unwrap();

    let sub = commands::find_subscription(&app, "Hulu").unwrap();
    assert!(!sub.is_active());

    let notifications = app.session.notifications().items();
    assert_eq!(notifications.len(), 1);
    assert_eq!(
        notifications[0].notification_type,
        NotificationType::Cancellation
    );
    assert_eq!(
        read_snapshot(&snapshot_path(&dir)).notifications.len(),
        1
    );
}

#[tokio::test]
async fn test_cmd_subscriptions_delete() {
    let (dir, app) = setup_app().await;
    add_subscription(&app, "Gym", 29.0, &in_days(12), None).await;
    let sub = commands::find_subscription(&app, "Gym").unwrap();

    commands::cmd_subscriptions_delete(&app, &sub.id).await.unwrap();
    assert!(app.session.subscriptions().items().is_empty());
    assert!(read_snapshot(&snapshot_path(&dir)).subscriptions.is_empty());
}

#[tokio::test]
async fn test_find_subscription_not_found() {
    let (_dir, app) = setup_app().await;
    let err = commands::find_subscription(&app, "Missing").unwrap_err();
    assert!(err.to_string().contains("Subscription not found"));
}

// ========== Notification Command Tests ==========

#[tokio::test]
async fn test_cmd_notify_dry_run_writes_nothing() {
    let (dir, app) = setup_app().await;
    add_subscription(&app, "Spotify", 10.99, &in_days(1), None).await;

    commands::cmd_notify(&app, true).await.unwrap();

    assert!(app.session.notifications().items().is_empty());
    assert!(read_snapshot(&snapshot_path(&dir)).notifications.is_empty());
}

#[tokio::test]
async fn test_cmd_notify_creates_payment_reminder_once() {
    let (dir, app) = setup_app().await;
    add_subscription(&app, "Spotify", 10.99, &in_days(1), None).await;

    commands::cmd_notify(&app, false).await.unwrap();
    commands::cmd_notify(&app, false).await.unwrap();

    let notifications = app.session.notifications().items();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].notification_type, NotificationType::Payment);
    assert_eq!(
        notifications[0].message,
        "Payment of $10.99 for Spotify is due in 1 day"
    );
    assert_eq!(
        read_snapshot(&snapshot_path(&dir)).notifications.len(),
        1
    );
}

#[tokio::test]
async fn test_cmd_notifications_read_all_and_clear() {
    let (dir, app) = setup_app().await;
    add_subscription(&app, "Spotify", 10.99, &in_days(1), None).await;
    add_subscription(&app, "Gym", 29.0, &in_days(2), None).await;
    commands::cmd_notify(&app, false).await.unwrap();
    assert_eq!(app.session.unread_count(), 2);
    assert!(commands::cmd_notifications_list(&app, true).is_ok());

    commands::cmd_notifications_read_all(&app).await.unwrap();
    assert_eq!(app.session.unread_count(), 0);

    commands::cmd_notifications_clear(&app).await.unwrap();
    assert!(app.session.notifications().items().is_empty());
    assert!(read_snapshot(&snapshot_path(&dir)).notifications.is_empty());
}

#[tokio::test]
async fn test_cmd_notifications_read_and_delete_one() {
    let (_dir, app) = setup_app().await;
    add_subscription(&app, "Spotify", 10.99, &in_days(1), None).await;
    commands::cmd_notify(&app, false).await.unwrap();
    let id = app.session.notifications().items()[0].id.clone();

    commands::cmd_notifications_read(&app, &id).await.unwrap();
    assert!(app.session.notifications().items()[0].is_read);

    commands::cmd_notifications_delete(&app, &id).await.unwrap();
    assert!(app.session.notifications().items().is_empty());

    assert!(commands::cmd_notifications_read(&app, &id).await.is_err());
}

// ========== Dashboard Command Tests ==========

#[tokio::test]
async fn test_dashboard_commands_empty() {
    let (_dir, app) = setup_app().await;

    assert!(commands::cmd_summary(&app, false).is_ok());
    assert!(commands::cmd_summary(&app, true).is_ok());
    assert!(commands::cmd_budgets(&app).is_ok());
    assert!(commands::cmd_upcoming(&app, None).is_ok());
    assert!(commands::cmd_forecast(&app, 30).is_ok());
}

#[tokio::test]
async fn test_dashboard_commands_with_data() {
    let (_dir, app) = setup_app().await;
    commands::cmd_categories_add(&app, "Streaming", 20.0, "#ef4444")
        .await
        .unwrap();
    add_subscription(&app, "Netflix", 15.49, &in_days(5), Some("Streaming")).await;
    add_subscription(&app, "Disney", 8.0, &in_days(40), Some("Streaming")).await;

    let view = app.session.dashboard();
    assert_eq!(view.summary.active_count, 2);
    assert_eq!(view.summary.upcoming_renewal_count, 1);
    assert_eq!(view.overview.over_budget_count, 1);

    assert!(commands::cmd_summary(&app, false).is_ok());
    assert!(commands::cmd_budgets(&app).is_ok());
    assert!(commands::cmd_upcoming(&app, Some(60)).is_ok());
    assert!(commands::cmd_forecast(&app, 60).is_ok());
}

// ========== Profile Command Tests ==========

#[tokio::test]
async fn test_profile_show_creates_profile() {
    let (dir, app) = setup_app().await;
    commands::cmd_profile_show(&app).await.unwrap();
    commands::cmd_profile_show(&app).await.unwrap();

    let snapshot = read_snapshot(&snapshot_path(&dir));
    assert_eq!(snapshot.profiles.len(), 1);
    assert_eq!(snapshot.profiles[0]["user_id"], LOCAL_USER);
}

#[tokio::test]
async fn test_profile_set_persists_contact() {
    let (dir, app) = setup_app().await;
    let contact = ContactDetails {
        city: Some("Lisbon".into()),
        bio: Some("Cutting costs".into()),
        ..Default::default()
    };
    commands::cmd_profile_set(&app, contact).await.unwrap();

    let snapshot = read_snapshot(&snapshot_path(&dir));
    assert_eq!(snapshot.profiles[0]["city"], "Lisbon");
    assert_eq!(snapshot.profiles[0]["bio"], "Cutting costs");

    let nothing = commands::cmd_profile_set(&app, ContactDetails::default()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_profile_picture_needs_remote() {
    let (dir, app) = setup_app().await;
    let file = dir.path().join("me.png");
    std::fs::write(&file, [0u8; 16]).unwrap();

    let err = commands::cmd_profile_picture(&app, &file).await.unwrap_err();
    assert!(err.to_string().contains("--remote"));
}

#[tokio::test]
async fn test_review_schedule_commands() {
    let (dir, app) = setup_app().await;
    let path = snapshot_path(&dir);

    commands::cmd_review_enable(&app).await.unwrap();
    let row = read_snapshot(&path).profiles[0].clone();
    assert_eq!(row["schedule_review_enabled"], true);
    assert_eq!(row["schedule_review_frequency"], "monthly");
    assert!(row["next_review_date"].is_string());

    commands::cmd_review_set(
        &app,
        Some(ReviewFrequency::Quarterly),
        Some(1),
        Some(2),
        Some("09:30"),
    )
    .await
    .unwrap();
    let row = read_snapshot(&path).profiles[0].clone();
    assert_eq!(row["schedule_review_frequency"], "quarterly");
    assert_eq!(row["review_slot"]["week_of_month"], 2);

    assert!(commands::cmd_review_set(&app, None, None, Some(7), None)
        .await
        .is_err());
    assert!(commands::cmd_review_set(&app, None, None, None, Some("9am"))
        .await
        .is_err());
    assert!(commands::cmd_review_set(&app, None, None, None, None)
        .await
        .is_err());

    commands::cmd_review_done(&app).await.unwrap();
    commands::cmd_review_status(&app).await.unwrap();
    assert!(!app.profiles.review_due().await.unwrap());

    commands::cmd_review_disable(&app).await.unwrap();
    let row = read_snapshot(&path).profiles[0].clone();
    assert_eq!(row["schedule_review_enabled"], false);
    assert!(row["next_review_date"].is_null());
    assert_eq!(row["schedule_review_frequency"], "quarterly");
}

#[test]
fn test_in_days_format() {
    let parsed = NaiveDate::parse_from_str(&in_days(0), "%Y-%m-%d").unwrap();
    assert_eq!(parsed, Local::now().date_naive());
}
