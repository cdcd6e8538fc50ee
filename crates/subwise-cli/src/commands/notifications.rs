//! Notification command implementations

use anyhow::{Context, Result};
use subwise_core::models::Notification;
use subwise_core::notify::{NotificationLedger, TriggerEngine};

use super::{truncate, App};

fn print_notification(n: &Notification) {
    let marker = if n.is_read { "  " } else { "● " };
    println!(
        "   {}{} │ {:22} │ {}",
        marker,
        n.created_at.format("%Y-%m-%d %H:%M"),
        truncate(&n.title, 22),
        n.message
    );
}

pub async fn cmd_notify(app: &App, dry_run: bool) -> Result<()> {
    if dry_run {
        let subscriptions = app.session.subscriptions().items();
        let categories = app.session.categories().items();
        let existing = app.session.notifications().items();

        let triggers = TriggerEngine.evaluate(&subscriptions, &categories, app.session.today());
        let pending = NotificationLedger::new().pending(triggers, &existing);

        if pending.is_empty() {
            println!("Nothing to notify");
            return Ok(());
        }

        println!();
        println!("🔍 Would create {} notification(s)", pending.len());
        println!("   ─────────────────────────────────────────────────────────────");
        for trigger in &pending {
            println!(
                "   {:22} │ {}",
                trigger.draft.title, trigger.draft.message
            );
        }
        return Ok(());
    }

    let report = app
        .session
        .evaluate_now()
        .await
        .context("Failed to evaluate notifications")?;
    app.save()?;

    if report.created.is_empty() && report.failed == 0 {
        println!("Nothing to notify");
        return Ok(());
    }

    println!();
    println!("🔔 Created {} notification(s)", report.created.len());
    println!("   ─────────────────────────────────────────────────────────────");
    for n in &report.created {
        print_notification(n);
    }
    if report.failed > 0 {
        println!();
        println!(
            "   ⚠️  {} notification(s) could not be written, run again later",
            report.failed
        );
    }

    Ok(())
}

pub fn cmd_notifications_list(app: &App, unread_only: bool) -> Result<()> {
    let notifications = app.session.notifications().items();
    let shown: Vec<&Notification> = notifications
        .iter()
        .filter(|n| !unread_only || !n.is_read)
        .collect();

    if shown.is_empty() {
        println!("No notifications");
        return Ok(());
    }

    println!();
    println!(
        "🔔 Notifications ({} unread)",
        app.session.unread_count()
    );
    println!("   ─────────────────────────────────────────────────────────────");
    for n in shown {
        print_notification(n);
        println!("     id: {}", n.id);
    }

    Ok(())
}

pub async fn cmd_notifications_read(app: &App, id: &str) -> Result<()> {
    let n = app
        .session
        .mark_read(id)
        .await
        .with_context(|| format!("Failed to mark {} read", id))?;
    app.save()?;

    println!("✅ Marked read: {}", n.title);
    Ok(())
}

pub async fn cmd_notifications_read_all(app: &App) -> Result<()> {
    let count = app
        .session
        .mark_all_read()
        .await
        .context("Failed to mark notifications read")?;
    app.save()?;

    println!("✅ Marked {} notification(s) read", count);
    Ok(())
}

pub async fn cmd_notifications_delete(app: &App, id: &str) -> Result<()> {
    app.session
        .delete_notification(id)
        .await
        .with_context(|| format!("Failed to delete notification {}", id))?;
    app.save()?;

    println!("🗑️  Deleted notification {}", id);
    Ok(())
}

pub async fn cmd_notifications_clear(app: &App) -> Result<()> {
    let count = app.session.notifications().items().len();
    app.session
        .clear_notifications()
        .await
        .context("Failed to clear notifications")?;
    app.save()?;

    println!("🗑️  Cleared {} notification(s)", count);
    Ok(())
}
