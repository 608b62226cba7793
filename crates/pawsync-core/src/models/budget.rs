use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require, require_id, validate_amount, validate_currency, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

/// Threshold used when a budget does not set one.
pub const DEFAULT_ALERT_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    Weekly,
    Monthly,
    Yearly,
}

fn default_threshold() -> f64 {
    DEFAULT_ALERT_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    pub id: String,
    pub name: String,
    pub category: String,
    pub amount: f64,
    pub currency: String,
    pub period: BudgetPeriod,
    #[serde(default = "default_threshold")]
    pub alert_threshold: f64,
    #[serde(default)]
    pub pet_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBudget {
    pub name: String,
    pub category: String,
    pub amount: f64,
    pub currency: String,
    pub period: BudgetPeriod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<BudgetPeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_threshold: Option<f64>,
}

/// Payload of the budget status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub budget_id: String,
    pub spent: f64,
    pub remaining: f64,
    pub percentage: f64,
    #[serde(default)]
    pub is_over_threshold: bool,
}

impl BudgetStatus {
    pub fn is_over_budget(&self) -> bool {
        self.remaining < 0.0
    }
}

fn validate_threshold(threshold: Option<f64>) -> Result<(), SyncError> {
    require(
        threshold.map_or(true, |t| (0.0..=1.0).contains(&t)),
        "Alert threshold must be between 0 and 1",
    )
}

impl Validate for CreateBudget {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.name, "Name")?;
        require_id(&self.category, "Category")?;
        validate_amount(self.amount)?;
        validate_currency(&self.currency)?;
        validate_threshold(self.alert_threshold)
    }
}

impl Validate for BudgetPatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(category) = &self.category {
            require_id(category, "Category")?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        validate_threshold(self.alert_threshold)
    }
}

impl Resource for Budget {
    const TYPE: ResourceType = ResourceType::Budgets;
    type Create = CreateBudget;
    type Patch = BudgetPatch;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_threshold_uses_default() {
        let json = r#"{"id":"B1","name":"Food","category":"food","amount":500,"currency":"TRY","period":"monthly","createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let budget: Budget = serde_json::from_str(json).unwrap();
        assert_eq!(budget.alert_threshold, DEFAULT_ALERT_THRESHOLD);
        assert_eq!(budget.period, BudgetPeriod::Monthly);
    }

    #[test]
    fn test_threshold_bounds() {
        let patch = BudgetPatch {
            alert_threshold: Some(1.5),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
        let patch = BudgetPatch {
            alert_threshold: Some(0.9),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn test_status_over_budget() {
        let status = BudgetStatus {
            budget_id: "B1".into(),
            spent: 520.0,
            remaining: -20.0,
            percentage: 1.04,
            is_over_threshold: true,
        };
        assert!(status.is_over_budget());
    }
}
