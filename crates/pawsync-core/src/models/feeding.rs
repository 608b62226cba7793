use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require_id, validate_amount, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedingSchedule {
    pub id: String,
    pub pet_id: String,
    pub time: NaiveTime,
    pub food_type: String,
    pub amount: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFeedingSchedule {
    pub pet_id: String,
    pub time: NaiveTime,
    pub food_type: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedingSchedulePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl Validate for CreateFeedingSchedule {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.pet_id, "Pet")?;
        require_id(&self.food_type, "Food type")?;
        validate_amount(self.amount)
    }
}

impl Validate for FeedingSchedulePatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(food_type) = &self.food_type {
            require_id(food_type, "Food type")?;
        }
        if let Some(amount) = self.amount {
            validate_amount(amount)?;
        }
        Ok(())
    }
}

impl Resource for FeedingSchedule {
    const TYPE: ResourceType = ResourceType::FeedingSchedules;
    type Create = CreateFeedingSchedule;
    type Patch = FeedingSchedulePatch;

    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_schedule_defaults_active() {
        let json = r#"{"id":"F1","petId":"P1","time":"08:30:00","foodType":"dry","amount":80,"createdAt":"2024-01-01T00:00:00Z","updatedAt":"2024-01-01T00:00:00Z"}"#;
        let schedule: FeedingSchedule = serde_json::from_str(json).unwrap();
        assert!(schedule.is_active);
        assert_eq!(schedule.time, NaiveTime::from_hms_opt(8, 30, 0).unwrap());
    }
}
