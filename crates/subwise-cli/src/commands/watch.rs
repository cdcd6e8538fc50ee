//! Watch command: keep a session open until Ctrl-C

use std::collections::HashSet;

use anyhow::Result;
use tracing::{info, warn};

use super::{money, App};

pub async fn cmd_watch(app: &App) -> Result<()> {
    let mut subscriptions = app.session.subscriptions().watch();
    let mut categories = app.session.categories().watch();
    let mut notifications = app.session.notifications().watch();

    let mut seen: HashSet<String> = app
        .session
        .notifications()
        .items()
        .iter()
        .map(|n| n.id.clone())
        .collect();

    println!();
    println!("👀 Watching as {} (Ctrl-C to stop)", app.session.user_id());
    println!(
        "   {} subscriptions, {} categories, {} unread notification(s)",
        app.session.subscriptions().items().len(),
        app.session.categories().items().len(),
        app.session.unread_count()
    );
    if !app.config.notifications.enabled {
        println!("   Notifications are disabled in config; only data changes are shown");
    }

    loop {
        tokio::select! {
            changed = subscriptions.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = app.session.dashboard();
                println!(
                    "   📋 {} active subscription(s), {} per month",
                    view.summary.active_count,
                    money(view.summary.total_monthly_spend)
                );
            }
            changed = categories.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("Categories now {}", categories.borrow().items.len());
            }
            changed = notifications.changed() => {
                if changed.is_err() {
                    break;
                }
                let items = notifications.borrow_and_update().items.clone();
                let mut fresh = false;
                for n in items.iter().filter(|n| !seen.contains(&n.id)) {
                    println!("   🔔 {}: {}", n.title, n.message);
                    fresh = true;
                }
                seen = items.iter().map(|n| n.id.clone()).collect();
                if fresh && app.is_local() {
                    if let Err(e) = app.save() {
                        warn!("Failed to save snapshot: {:#}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("Stopping...");
                break;
            }
        }
    }

    app.save()
}
