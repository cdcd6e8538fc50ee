//! Subscription command implementations

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use subwise_core::models::{BillingCycle, NewSubscription, Subscription, SubscriptionStatus};

use super::{find_category, money, truncate, App};

/// Find a subscription by id or (case-insensitive) name
pub fn find_subscription(app: &App, name_or_id: &str) -> Result<Subscription> {
    let subscriptions = app.session.subscriptions().items();
    subscriptions
        .iter()
        .find(|s| s.id == name_or_id)
        .or_else(|| {
            subscriptions
                .iter()
                .find(|s| s.name.eq_ignore_ascii_case(name_or_id))
        })
        .cloned()
        .ok_or_else(|| anyhow!("Subscription not found: {}", name_or_id))
}

pub fn cmd_subscriptions_list(app: &App) -> Result<()> {
    let subscriptions = app.session.subscriptions().items();

    if subscriptions.is_empty() {
        println!("No subscriptions yet. Add one with:");
        println!("  subwise subscriptions add <name> <amount> --next YYYY-MM-DD");
        return Ok(());
    }

    let categories = app.session.categories().items();

    println!();
    println!("📋 Subscriptions");
    println!("   ─────────────────────────────────────────────────────────────");

    for sub in subscriptions.iter() {
        let status_icon = match sub.status {
            SubscriptionStatus::Active => "✅",
            SubscriptionStatus::Inactive => "⏸️ ",
        };
        let category = sub
            .category_id
            .as_deref()
            .and_then(|id| categories.iter().find(|c| c.id == id))
            .map(|c| c.name.as_str())
            .unwrap_or("-");

        println!(
            "   {} {:20} │ {:>9}/{:<3} │ next {} │ {:14} │ {}",
            status_icon,
            truncate(&sub.name, 20),
            money(sub.amount),
            sub.billing_cycle.short_label(),
            sub.next_billing_date,
            truncate(category, 14),
            sub.id
        );
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub async fn cmd_subscriptions_add(
    app: &App,
    name: &str,
    amount: f64,
    cycle: BillingCycle,
    next: &str,
    category: Option<&str>,
    reminder: u32,
    description: Option<&str>,
) -> Result<()> {
    let next_billing_date = NaiveDate::parse_from_str(next, "%Y-%m-%d")
        .context("Invalid --next date format (use YYYY-MM-DD)")?;

    let mut draft =
        NewSubscription::new(name, amount, cycle, next_billing_date).with_reminder_days(reminder);
    if let Some(category) = category {
        draft = draft.with_category(find_category(app, category)?.id);
    }
    draft.description = description.map(str::to_string);

    let created = app
        .session
        .add_subscription(draft)
        .await
        .context("Failed to add subscription")?;
    app.save()?;

    println!(
        "✅ Added {} ({}/{}, next {})",
        created.name,
        money(created.amount),
        created.billing_cycle.short_label(),
        created.next_billing_date
    );
    println!("   ID: {}", created.id);

    Ok(())
}

pub async fn cmd_subscriptions_status(
    app: &App,
    name_or_id: &str,
    status: SubscriptionStatus,
) -> Result<()> {
    let sub = find_subscription(app, name_or_id)?;

    let updated = app
        .session
        .set_subscription_status(&sub.id, status)
        .await
        .context("Failed to update subscription")?;
    app.save()?;

    println!("✅ {} is now {}", updated.name, updated.status);
    if sub.is_active() && !updated.is_active() {
        println!("   Monthly spend drops by {}", money(sub.monthly_cost()));
    }

    Ok(())
}

pub async fn cmd_subscriptions_delete(app: &App, name_or_id: &str) -> Result<()> {
    let sub = find_subscription(app, name_or_id)?;

    app.session
        .delete_subscription(&sub.id)
        .await
        .context("Failed to delete subscription")?;
    app.save()?;

    println!("🗑️  Deleted {}", sub.name);

    Ok(())
}
