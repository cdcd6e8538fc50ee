//! Dashboard command implementations

use anyhow::Result;
use subwise_core::aggregate::{self, TrendDirection};
use subwise_core::budget::AlertLevel;
use subwise_core::normalize::days_between;

use super::{money, truncate, App};

pub fn cmd_summary(app: &App, json: bool) -> Result<()> {
    let view = app.session.dashboard();

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let categories = app.session.categories().items();

    println!();
    println!("📊 Spending Summary ({})", view.today);
    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   Monthly spend:     {:>10}",
        money(view.summary.total_monthly_spend)
    );
    println!("   Active:            {:>10}", view.summary.active_count);
    println!("   Inactive:          {:>10}", view.summary.inactive_count);
    println!(
        "   Renewing soon:     {:>10}",
        view.summary.upcoming_renewal_count
    );

    let arrow = match view.trend.direction {
        TrendDirection::Up => "↑",
        TrendDirection::Down => "↓",
        TrendDirection::Neutral => "→",
    };
    println!(
        "   vs last month:     {:>9.1}% {}",
        view.trend.percentage, arrow
    );

    if !categories.is_empty() {
        println!();
        println!("   By category:");
        for category in categories.iter() {
            let spent = view
                .summary
                .category_spend
                .get(&category.id)
                .copied()
                .unwrap_or(0.0);
            println!(
                "   {:24} {:>10}",
                truncate(&category.name, 24),
                money(spent)
            );
        }
    }

    if !view.alerts.is_empty() {
        println!();
        for alert in &view.alerts {
            let icon = match alert.level {
                AlertLevel::Warning => "⚠️ ",
                AlertLevel::Danger => "🔴",
            };
            println!("   {} {}", icon, alert.message);
        }
    }

    if !view.upcoming.is_empty() {
        println!();
        println!("   Next up:");
        for sub in view.upcoming.iter().take(5) {
            println!(
                "   {} {:20} {:>10}",
                sub.next_billing_date,
                truncate(&sub.name, 20),
                money(sub.amount)
            );
        }
    }
    println!();

    Ok(())
}

pub fn cmd_budgets(app: &App) -> Result<()> {
    let view = app.session.dashboard();

    if view.budgets.is_empty() {
        println!("No categories yet. Add one with:");
        println!("  subwise categories add <name> --budget <amount>");
        return Ok(());
    }

    println!();
    println!("💰 Budgets");
    println!("   ─────────────────────────────────────────────────────────────");

    for status in &view.budgets {
        let icon = match status.level {
            Some(AlertLevel::Danger) => "🔴",
            Some(AlertLevel::Warning) => "🟡",
            None => "🟢",
        };
        println!(
            "   {} {:20} │ {:>9} of {:>9} │ {:>6.1}% │ {:>9} left",
            icon,
            truncate(&status.name, 20),
            money(status.spent),
            money(status.budget),
            status.percentage_used,
            money(status.remaining)
        );
    }

    println!("   ─────────────────────────────────────────────────────────────");
    println!(
        "   Total: {} of {} ({:.1}%), {} over budget",
        money(view.overview.total_spent),
        money(view.overview.total_budget),
        view.overview.percentage_used,
        view.overview.over_budget_count
    );
    println!();

    Ok(())
}

pub fn cmd_upcoming(app: &App, days: Option<u32>) -> Result<()> {
    let window = days.unwrap_or(app.config.dashboard.upcoming_window_days);
    let today = app.session.today();
    let subscriptions = app.session.subscriptions().items();
    let upcoming = aggregate::upcoming_renewals(&subscriptions, today, window);

    if upcoming.is_empty() {
        println!("Nothing renews in the next {} days", window);
        return Ok(());
    }

    println!();
    println!("📅 Renewing in the next {} days", window);
    println!("   ─────────────────────────────────────────────────────────────");

    for sub in &upcoming {
        let days_left = days_between(today, sub.next_billing_date);
        let when = match days_left {
            0 => "today".to_string(),
            1 => "tomorrow".to_string(),
            n => format!("in {} days", n),
        };
        println!(
            "   {} {:20} │ {:>9}/{:<3} │ {}",
            sub.next_billing_date,
            truncate(&sub.name, 20),
            money(sub.amount),
            sub.billing_cycle.short_label(),
            when
        );
    }
    println!();

    Ok(())
}

pub fn cmd_forecast(app: &App, days: u32) -> Result<()> {
    let subscriptions = app.session.subscriptions().items();
    let forecast = aggregate::forecast(&subscriptions, app.session.today(), days);

    println!();
    println!("🔮 Forecast {} → {}", forecast.start, forecast.end);
    println!("   ─────────────────────────────────────────────────────────────");

    if forecast.items.is_empty() {
        println!("   No charges expected");
    }
    for item in &forecast.items {
        println!(
            "   {} {:24} {:>10}",
            item.date,
            truncate(&item.name, 24),
            money(item.amount)
        );
    }

    println!("   ─────────────────────────────────────────────────────────────");
    println!("   Total: {}", money(forecast.total));
    println!();

    Ok(())
}
