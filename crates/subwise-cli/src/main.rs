//! Subwise CLI - Subscription expense tracker
//!
//! Usage:
//!   subwise init                          Create a local snapshot
//!   subwise subscriptions add NAME AMOUNT Track a subscription
//!   subwise summary                       Monthly spend, trend, renewals
//!   subwise notify                        Create due notifications
//!   subwise profile review enable         Remind me to review monthly
//!   subwise --remote watch                Follow the hosted backend live

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::{bail, Context, Result};
use clap::Parser;
use subwise_core::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;
use commands::{App, Target};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = Config::load_from(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::Init => {
            if cli.remote {
                bail!("init only applies to local snapshots");
            }
            commands::cmd_init(&cli.snapshot)
        }
        Commands::Config => commands::cmd_config(&config, cli.config.as_deref()),
        command => {
            let background = matches!(command, Commands::Watch);
            let user = commands::resolve_user(cli.user.as_deref(), &config, cli.remote)?;
            let target = if cli.remote {
                Target::Remote
            } else {
                Target::Local(cli.snapshot.clone())
            };
            let app = App::open(target, &user, config, background).await?;
            run(&app, command).await
        }
    }
}

/// Dispatch a command that needs an open session
async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::Summary { json } => commands::cmd_summary(app, json),
        Commands::Budgets => commands::cmd_budgets(app),
        Commands::Upcoming { days } => commands::cmd_upcoming(app, days),
        Commands::Forecast { days } => commands::cmd_forecast(app, days),
        Commands::Subscriptions { action } => match action {
            None | Some(SubscriptionsAction::List) => commands::cmd_subscriptions_list(app),
            Some(SubscriptionsAction::Add {
                name,
                amount,
                cycle,
                next,
                category,
                reminder,
                description,
            }) => {
                commands::cmd_subscriptions_add(
                    app,
                    &name,
                    amount,
                    cycle,
                    &next,
                    category.as_deref(),
                    reminder,
                    description.as_deref(),
                )
                .await
            }
            Some(SubscriptionsAction::Status { name_or_id, status }) => {
                commands::cmd_subscriptions_status(app, &name_or_id, status).await
            }
            Some(SubscriptionsAction::Delete { name_or_id }) => {
                commands::cmd_subscriptions_delete(app, &name_or_id).await
            }
        },
        Commands::Categories { action } => match action {
            None | Some(CategoriesAction::List) => commands::cmd_categories_list(app),
            Some(CategoriesAction::Add {
                name,
                budget,
                color,
            }) => commands::cmd_categories_add(app, &name, budget, &color).await,
            Some(CategoriesAction::Budget { name_or_id, amount }) => {
                commands::cmd_categories_budget(app, &name_or_id, amount).await
            }
            Some(CategoriesAction::Delete { name_or_id }) => {
                commands::cmd_categories_delete(app, &name_or_id).await
            }
        },
        Commands::Notify { dry_run } => commands::cmd_notify(app, dry_run).await,
        Commands::Notifications { action } => match action {
            None => commands::cmd_notifications_list(app, false),
            Some(NotificationsAction::List { unread }) => {
                commands::cmd_notifications_list(app, unread)
            }
            Some(NotificationsAction::Read { id }) => {
                commands::cmd_notifications_read(app, &id).await
            }
            Some(NotificationsAction::ReadAll) => commands::cmd_notifications_read_all(app).await,
            Some(NotificationsAction::Delete { id }) => {
                commands::cmd_notifications_delete(app, &id).await
            }
            Some(NotificationsAction::Clear) => commands::cmd_notifications_clear(app).await,
        },
        Commands::Profile { action } => match action {
            None | Some(ProfileAction::Show) => commands::cmd_profile_show(app).await,
            Some(ProfileAction::Set(contact)) => {
                commands::cmd_profile_set(app, contact.into()).await
            }
            Some(ProfileAction::Picture { file }) => {
                commands::cmd_profile_picture(app, &file).await
            }
            Some(ProfileAction::Review { action }) => match action {
                None | Some(ReviewAction::Status) => commands::cmd_review_status(app).await,
                Some(ReviewAction::Enable) => commands::cmd_review_enable(app).await,
                Some(ReviewAction::Set {
                    frequency,
                    day,
                    week,
                    time,
                }) => commands::cmd_review_set(app, frequency, day, week, time.as_deref()).await,
                Some(ReviewAction::Disable) => commands::cmd_review_disable(app).await,
                Some(ReviewAction::Done) => commands::cmd_review_done(app).await,
            },
        },
        Commands::Watch => commands::cmd_watch(app).await,
        Commands::Init | Commands::Config => Ok(()),
    }
}
