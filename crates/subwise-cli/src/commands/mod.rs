//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared session setup (`App`), init and config commands
//! - `dashboard` - Summary, budgets, upcoming renewals and forecast
//! - `subscriptions` - Subscription management commands
//! - `categories` - Category and budget management commands
//! - `notifications` - Trigger evaluation and notification management
//! - `profile` - Profile details, picture and review schedule
//! - `watch` - Long-running session that reports changes

pub mod categories;
pub mod core;
pub mod dashboard;
pub mod notifications;
pub mod profile;
pub mod subscriptions;
pub mod watch;

// Re-export command functions for main.rs
pub use categories::*;
pub use core::*;
pub use dashboard::*;
pub use notifications::*;
pub use profile::*;
pub use subscriptions::*;
pub use watch::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// "$12.34"
pub fn money(amount: f64) -> String {
    format!("${:.2}", amount)
}
