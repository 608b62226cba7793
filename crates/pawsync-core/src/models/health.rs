use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{require, require_id, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthRecordType {
    Vaccination,
    Checkup,
    Medication,
    Surgery,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub id: String,
    pub pet_id: String,
    #[serde(rename = "type")]
    pub record_type: HealthRecordType,
    pub title: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub next_due_date: Option<NaiveDate>,
    #[serde(default)]
    pub veterinarian: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HealthRecord {
    /// Whether a follow-up is due on or before `today`.
    pub fn is_due(&self, today: NaiveDate) -> bool {
        self.next_due_date.is_some_and(|due| due <= today)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHealthRecord {
    pub pet_id: String,
    #[serde(rename = "type")]
    pub record_type: HealthRecordType,
    pub title: String,
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub veterinarian: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecordPatch {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub record_type: Option<HealthRecordType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_due_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub veterinarian: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Validate for CreateHealthRecord {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.pet_id, "Pet")?;
        require_id(&self.title, "Title")?;
        require(
            self.next_due_date.map_or(true, |due| due >= self.date),
            "Next due date cannot be before the record date",
        )
    }
}

impl Validate for HealthRecordPatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(title) = &self.title {
            require_id(title, "Title")?;
        }
        Ok(())
    }
}

impl Resource for HealthRecord {
    const TYPE: ResourceType = ResourceType::HealthRecords;
    type Create = CreateHealthRecord;
    type Patch = HealthRecordPatch;

    fn id(&self) -> &str {
        &self.id
    }
}
