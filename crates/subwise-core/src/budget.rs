//! Budget evaluation
//!
//! Compares each category's derived monthly spend with its budget and
//! classifies it as fine, warning (>= 90%) or danger (>= 100%).

use std::collections::HashMap;

use serde::Serialize;

use crate::aggregate::category_spend;
use crate::models::{Category, Subscription};

/// Percentage at which a category starts warning
pub const WARNING_THRESHOLD: f64 = 90.0;

/// Percentage at which a category is over budget
pub const DANGER_THRESHOLD: f64 = 100.0;

/// Share of `budget` used by `spend`, in percent
///
/// Zero (never NaN or infinity) when either side is not positive.
pub fn percentage_used(spend: f64, budget: f64) -> f64 {
    if spend > 0.0 && budget > 0.0 {
        spend / budget * 100.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Warning,
    Danger,
}

impl AlertLevel {
    pub fn classify(percentage: f64) -> Option<Self> {
        if percentage >= DANGER_THRESHOLD {
            Some(Self::Danger)
        } else if percentage >= WARNING_THRESHOLD {
            Some(Self::Warning)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Danger => "danger",
        }
    }
}

/// Budget position of one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub category_id: String,
    pub name: String,
    pub budget: f64,
    pub spent: f64,
    /// Negative when over budget
    pub remaining: f64,
    pub percentage_used: f64,
    pub level: Option<AlertLevel>,
}

impl BudgetStatus {
    pub fn alert(&self) -> Option<BudgetAlert> {
        let level = self.level?;
        let message = match level {
            AlertLevel::Danger => format!(
                "{} is over budget by ${:.2}",
                self.name,
                self.spent - self.budget
            ),
            AlertLevel::Warning => format!(
                "{} is at {:.1}% of budget",
                self.name, self.percentage_used
            ),
        };
        Some(BudgetAlert {
            category: self.name.clone(),
            level,
            message,
        })
    }
}

/// A warning or danger alert for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetAlert {
    pub category: String,
    pub level: AlertLevel,
    pub message: String,
}

/// Evaluate every category against its spend, in category order
pub fn evaluate(categories: &[Category], spend: &HashMap<String, f64>) -> Vec<BudgetStatus> {
    categories
        .iter()
        .map(|category| {
            let spent = spend.get(&category.id).copied().unwrap_or(0.0);
            let percentage = percentage_used(spent, category.budget);
            BudgetStatus {
                category_id: category.id.clone(),
                name: category.name.clone(),
                budget: category.budget,
                spent,
                remaining: category.budget - spent,
                percentage_used: percentage,
                level: AlertLevel::classify(percentage),
            }
        })
        .collect()
}

/// Evaluate straight from subscriptions
pub fn evaluate_subscriptions(
    subscriptions: &[Subscription],
    categories: &[Category],
) -> Vec<BudgetStatus> {
    evaluate(categories, &category_spend(subscriptions, categories))
}

pub fn alerts(statuses: &[BudgetStatus]) -> Vec<BudgetAlert> {
    statuses.iter().filter_map(BudgetStatus::alert).collect()
}

/// Totals across all categories
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BudgetOverview {
    pub total_budget: f64,
    pub total_spent: f64,
    pub percentage_used: f64,
    pub over_budget_count: usize,
}

pub fn overview(statuses: &[BudgetStatus]) -> BudgetOverview {
    let total_budget: f64 = statuses.iter().map(|s| s.budget).sum();
    let total_spent: f64 = statuses.iter().map(|s| s.spent).sum();
    BudgetOverview {
        total_budget,
        total_spent,
        percentage_used: percentage_used(total_spent, total_budget),
        over_budget_count: statuses
            .iter()
            .filter(|s| s.level == Some(AlertLevel::Danger))
            .count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingCycle;
    use crate::test_utils::*;

    fn spend_of(id: &str, amount: f64) -> HashMap<String, f64> {
        HashMap::from([(id.to_string(), amount)])
    }

    #[test]
    fn test_zero_budget_is_zero_percent() {
        assert_eq!(percentage_used(50.0, 0.0), 0.0);
        assert_eq!(percentage_used(0.0, 100.0), 0.0);
        assert_eq!(percentage_used(-5.0, 100.0), 0.0);

        let statuses = evaluate(&[category("c1", "Music", 0.0)], &spend_of("c1", 30.0));
        assert_eq!(statuses[0].percentage_used, 0.0);
        assert!(statuses[0].level.is_none());
        assert!(alerts(&statuses).is_empty());
    }

    #[test]
    fn test_warning_at_95_percent() {
        let statuses = evaluate(&[category("c1", "Streaming", 100.0)], &spend_of("c1", 95.0));
        let alerts = alerts(&statuses);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
        assert!(alerts[0].message.contains("95.0%"), "{}", alerts[0].message);
    }

    #[test]
    fn test_danger_reports_overage() {
        let statuses = evaluate(&[category("c1", "Streaming", 100.0)], &spend_of("c1", 120.0));
        let alerts = alerts(&statuses);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Danger);
        assert!(alerts[0].message.contains("20.00"), "{}", alerts[0].message);
        assert_eq!(statuses[0].remaining, -20.0);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(AlertLevel::classify(89.99), None);
        assert_eq!(AlertLevel::classify(90.0), Some(AlertLevel::Warning));
        assert_eq!(AlertLevel::classify(99.99), Some(AlertLevel::Warning));
        assert_eq!(AlertLevel::classify(100.0), Some(AlertLevel::Danger));
    }

    #[test]
    fn test_overview_from_subscriptions() {
        let categories = vec![
            category("c1", "Streaming", 20.0),
            category("c2", "Fitness", 100.0),
        ];
        let subs = vec![
            subscription("s1", "Netflix", 25.0, BillingCycle::Monthly).with_category("c1"),
            subscription("s2", "Gym", 600.0, BillingCycle::Yearly).with_category("c2"),
        ];

        let statuses = evaluate_subscriptions(&subs, &categories);
        let totals = overview(&statuses);
        assert_eq!(totals.total_budget, 120.0);
        assert_eq!(totals.total_spent, 75.0);
        assert!((totals.percentage_used - 62.5).abs() < 1e-9);
        assert_eq!(totals.over_budget_count, 1);
        assert!(overview(&[]).percentage_used == 0.0);
    }
}
