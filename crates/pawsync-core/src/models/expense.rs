use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{require_id, validate_amount, validate_currency, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub pet_id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateExpense {
    pub pet_id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpensePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

/// Payload of the expense statistics endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseStats {
    pub total: f64,
    pub count: u64,
    #[serde(default)]
    pub by_category: BTreeMap<String, f64>,
}

impl Validate for CreateExpense {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.pet_id, "Pet")?;
        validate_amount(self.amount)?;
        validate_currency(&self.currency)
    }
}

impl Validate for ExpensePatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(pet_id) = &self.pet_id {
            require_id(pet_id, "Pet")?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        if let Some(currency) = &self.currency {
            validate_currency(currency)?;
        }
        Ok(())
    }
}

impl Resource for Expense {
    const TYPE: ResourceType = ResourceType::Expenses;
    type Create = CreateExpense;
    type Patch = ExpensePatch;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_serializes_camel_case() {
        let input = CreateExpense {
            pet_id: "P1".into(),
            amount: 50.0,
            currency: "TRY".into(),
            category: None,
            description: None,
            date: None,
        };
        assert!(input.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&input).unwrap(),
            serde_json::json!({"petId": "P1", "amount": 50.0, "currency": "TRY"})
        );
    }

    #[test]
    fn test_negative_amount_rejected() {
        let patch = ExpensePatch {
            amount: Some(-3.0),
            ..Default::default()
        };
        assert!(patch.validate().is_err());
    }

    #[test]
    fn test_parse_stats() {
        let stats: ExpenseStats = serde_json::from_str(
            r#"{"total": 120.5, "count": 3, "byCategory": {"food": 100.5, "toys": 20}}"#,
        )
        .unwrap();
        assert_eq!(stats.by_category["toys"], 20.0);
    }
}
