//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use subwise_core::models::{BillingCycle, ContactDetails, SubscriptionStatus};
use subwise_core::review::ReviewFrequency;

/// Subwise - Know what your subscriptions really cost
#[derive(Parser)]
#[command(name = "subwise")]
#[command(about = "Subscription expense tracker", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Local snapshot file (ignored with --remote)
    #[arg(long, default_value = "subwise.json", global = true)]
    pub snapshot: PathBuf,

    /// Use the configured hosted backend instead of a local snapshot
    ///
    /// Set backend.url in the config file or SUBWISE_URL, plus
    /// SUBWISE_API_KEY and SUBWISE_ACCESS_TOKEN.
    #[arg(long, global = true)]
    pub remote: bool,

    /// User id (defaults to SUBWISE_USER_ID, backend.user_id, or "local")
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Config file (defaults to ~/.config/subwise/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty snapshot file
    Init,

    /// Show spending totals, trend and upcoming renewals
    Summary {
        /// Print the full dashboard view as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show budget usage per category
    Budgets,

    /// List subscriptions renewing soon
    Upcoming {
        /// Window in days (defaults to dashboard.upcoming_window_days)
        #[arg(short, long)]
        days: Option<u32>,
    },

    /// Project charges over the next days
    Forecast {
        /// Number of days to project
        #[arg(short, long, default_value = "30")]
        days: u32,
    },

    /// Manage subscriptions
    Subscriptions {
        #[command(subcommand)]
        action: Option<SubscriptionsAction>,
    },

    /// Manage categories and budgets
    Categories {
        #[command(subcommand)]
        action: Option<CategoriesAction>,
    },

    /// Check for payment, renewal and budget notifications
    Notify {
        /// Show what would be created without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage notifications
    Notifications {
        #[command(subcommand)]
        action: Option<NotificationsAction>,
    },

    /// Show or edit your profile and review schedule
    Profile {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },

    /// Keep a session open and report changes as they arrive
    Watch,

    /// Show the resolved configuration
    Config,
}

#[derive(Subcommand)]
pub enum SubscriptionsAction {
    /// List all subscriptions
    List,

    /// Add a subscription
    Add {
        /// Display name
        name: String,

        /// Charge per billing cycle
        amount: f64,

        /// Billing cycle: weekly, monthly, quarterly, yearly
        #[arg(short, long, default_value = "monthly")]
        cycle: BillingCycle,

        /// Next billing date (YYYY-MM-DD)
        #[arg(short, long)]
        next: String,

        /// Category name or id
        #[arg(long)]
        category: Option<String>,

        /// Days before billing to send a reminder (1-30)
        #[arg(short, long, default_value = "3")]
        reminder: u32,

        /// Free-form description
        #[arg(long)]
        description: Option<String>,
    },

    /// Set a subscription active or inactive
    Status {
        /// Subscription name or id
        name_or_id: String,

        /// New status: active or inactive
        status: SubscriptionStatus,
    },

    /// Delete a subscription
    Delete {
        /// Subscription name or id
        name_or_id: String,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List categories
    List,

    /// Add a category
    Add {
        /// Category name
        name: String,

        /// Monthly budget
        #[arg(short, long, default_value = "0")]
        budget: f64,

        /// Display color
        #[arg(long, default_value = "#3b82f6")]
        color: String,
    },

    /// Set a category's monthly budget
    Budget {
        /// Category name or id
        name_or_id: String,

        /// New monthly budget
        amount: f64,
    },

    /// Delete a category
    Delete {
        /// Category name or id
        name_or_id: String,
    },
}

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// List notifications, newest first
    List {
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark one notification read
    Read {
        /// Notification id
        id: String,
    },

    /// Mark every notification read
    ReadAll,

    /// Delete one notification
    Delete {
        /// Notification id
        id: String,
    },

    /// Delete all notifications
    Clear,
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// Show the profile (created on first use)
    Show,

    /// Update contact details
    Set(ContactArgs),

    /// Upload a profile picture (jpg, png or gif, up to 5MB)
    Picture {
        /// Image file
        file: PathBuf,
    },

    /// Manage the subscription review schedule
    Review {
        #[command(subcommand)]
        action: Option<ReviewAction>,
    },
}

/// Contact fields; only the ones given are changed
#[derive(Args)]
pub struct ContactArgs {
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub phone: Option<String>,
    #[arg(long)]
    pub address: Option<String>,
    #[arg(long)]
    pub city: Option<String>,
    #[arg(long)]
    pub state: Option<String>,
    #[arg(long)]
    pub zip: Option<String>,
    #[arg(long)]
    pub country: Option<String>,
    #[arg(long)]
    pub bio: Option<String>,
}

impl From<ContactArgs> for ContactDetails {
    fn from(args: ContactArgs) -> Self {
        Self {
            email: args.email,
            name: args.name,
            phone: args.phone,
            address: args.address,
            city: args.city,
            state: args.state,
            zip_code: args.zip,
            country: args.country,
            bio: args.bio,
        }
    }
}

#[derive(Subcommand)]
pub enum ReviewAction {
    /// Show the schedule and whether a review is due
    Status,

    /// Turn review reminders on, counting now as the last review
    Enable,

    /// Change how often reviews come around and when
    Set {
        /// weekly, monthly, quarterly or yearly
        #[arg(short, long)]
        frequency: Option<ReviewFrequency>,

        /// Weekday to snap to: 0 = Sunday ... 6 = Saturday
        #[arg(long)]
        day: Option<u8>,

        /// Which occurrence of the weekday in the month (1-5)
        #[arg(long)]
        week: Option<u8>,

        /// Time of day in UTC (HH:MM)
        #[arg(long)]
        time: Option<String>,
    },

    /// Turn review reminders off
    Disable,

    /// Record that you just reviewed your subscriptions
    Done,
}
