//! Category command implementations

use anyhow::{anyhow, Context, Result};
use subwise_core::models::{Category, NewCategory};

use super::{money, truncate, App};

/// Find a category by id or (case-insensitive) name
pub fn find_category(app: &App, name_or_id: &str) -> Result<Category> {
    let categories = app.session.categories().items();
    categories
        .iter()
        .find(|c| c.id == name_or_id)
        .or_else(|| {
            categories
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(name_or_id))
        })
        .cloned()
        .ok_or_else(|| anyhow!("Category not found: {}", name_or_id))
}

pub fn cmd_categories_list(app: &App) -> Result<()> {
    let categories = app.session.categories().items();

    if categories.is_empty() {
        println!("No categories yet. Add one with:");
        println!("  subwise categories add <name> --budget <amount>");
        return Ok(());
    }

    let subscriptions = app.session.subscriptions().items();

    println!();
    println!("🏷️  Categories");
    println!("   ─────────────────────────────────────────────────────────────");

    for category in categories.iter() {
        let count = subscriptions
            .iter()
            .filter(|s| s.category_id.as_deref() == Some(category.id.as_str()))
            .count();
        println!(
            "   {:20} │ budget {:>9} │ {:8} │ {:>3} subs │ {}",
            truncate(&category.name, 20),
            money(category.budget),
            category.color,
            count,
            category.id
        );
    }

    Ok(())
}

pub async fn cmd_categories_add(app: &App, name: &str, budget: f64, color: &str) -> Result<()> {
    let created = app
        .session
        .add_category(NewCategory {
            name: name.to_string(),
            budget,
            color: color.to_string(),
        })
        .await
        .context("Failed to add category")?;
    app.save()?;

    println!(
        "✅ Added category {} (budget {})",
        created.name,
        money(created.budget)
    );
    println!("   ID: {}", created.id);

    Ok(())
}

pub async fn cmd_categories_budget(app: &App, name_or_id: &str, amount: f64) -> Result<()> {
    let category = find_category(app, name_or_id)?;

    let updated = app
        .session
        .set_budgets(&[(category.id.clone(), amount)])
        .await
        .context("Failed to update budget")?;
    app.save()?;

    for category in updated {
        println!(
            "✅ {} budget set to {}",
            category.name,
            money(category.budget)
        );
    }

    Ok(())
}

pub async fn cmd_categories_delete(app: &App, name_or_id: &str) -> Result<()> {
    let category = find_category(app, name_or_id)?;

    app.session
        .delete_category(&category.id)
        .await
        .context("Failed to delete category")?;
    app.save()?;

    println!("🗑️  Deleted category {}", category.name);
    println!("   Subscriptions that used it no longer count towards any budget");

    Ok(())
}
