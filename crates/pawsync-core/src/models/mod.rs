//! Domain models for pet-care resources.
//!
//! This module contains the wire types of every cached collection:
//!
//! - `Pet`: the animals the other resources hang off
//! - `Expense`, `Budget`: spending and category budgets with alert thresholds
//! - `HealthRecord`: vaccinations, checkups, medications
//! - `Event`: calendar entries
//! - `FeedingSchedule`: recurring feeding times
//!
//! Each resource has a `Create*` input and an all-optional `*Patch` type.

pub mod budget;
pub mod event;
pub mod expense;
pub mod feeding;
pub mod health;
pub mod pet;

use serde::{de::DeserializeOwned, Serialize};

use crate::cache::ResourceType;
use crate::error::SyncError;

pub use budget::{Budget, BudgetPatch, BudgetPeriod, BudgetStatus, CreateBudget};
pub use event::{CreateEvent, Event, EventPatch};
pub use expense::{CreateExpense, Expense, ExpensePatch, ExpenseStats};
pub use feeding::{CreateFeedingSchedule, FeedingSchedule, FeedingSchedulePatch};
pub use health::{CreateHealthRecord, HealthRecord, HealthRecordPatch, HealthRecordType};
pub use pet::{CreatePet, Pet, PetPatch};

/// Structural checks run before any network call.
pub trait Validate {
    fn validate(&self) -> Result<(), SyncError>;
}

/// A server-owned record that the mutation engine can create, patch and
/// delete in the cache.
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const TYPE: ResourceType;

    type Create: Serialize + Validate + Send + Sync;
    type Patch: Serialize + Validate + Send + Sync;

    fn id(&self) -> &str;
}

pub(crate) fn require(condition: bool, message: &str) -> Result<(), SyncError> {
    if condition {
        Ok(())
    } else {
        Err(SyncError::Validation(message.to_string()))
    }
}

pub(crate) fn require_id(value: &str, field: &str) -> Result<(), SyncError> {
    require(!value.trim().is_empty(), &format!("{} is required", field))
}

pub(crate) fn validate_amount(amount: f64) -> Result<(), SyncError> {
    require(amount.is_finite() && amount >= 0.0, "Amount must be a non-negative number")
}

/// ISO 4217 style: three ASCII uppercase letters.
pub(crate) fn validate_currency(currency: &str) -> Result<(), SyncError> {
    require(
        currency.len() == 3 && currency.chars().all(|c| c.is_ascii_uppercase()),
        "Currency must be a three-letter code",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_validation() {
        assert!(validate_currency("TRY").is_ok());
        assert!(validate_currency("usd").is_err());
        assert!(validate_currency("EURO").is_err());
    }

    #[test]
    fn test_amount_validation() {
        assert!(validate_amount(0.0).is_ok());
        assert!(validate_amount(-1.0).is_err());
        assert!(validate_amount(f64::NAN).is_err());
    }
}
