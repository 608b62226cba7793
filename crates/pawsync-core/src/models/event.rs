use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{require, require_id, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub pet_id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_upcoming(&self, now: DateTime<Utc>) -> bool {
        self.start_time > now
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEvent {
    pub pet_id: String,
    pub title: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder_minutes: Option<u32>,
}

impl Validate for CreateEvent {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.pet_id, "Pet")?;
        require_id(&self.title, "Title")?;
        require(
            self.end_time.map_or(true, |end| end >= self.start_time),
            "Event cannot end before it starts",
        )
    }
}

impl Validate for EventPatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(title) = &self.title {
            require_id(title, "Title")?;
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            require(end >= start, "Event cannot end before it starts")?;
        }
        Ok(())
    }
}

impl Resource for Event {
    const TYPE: ResourceType = ResourceType::Events;
    type Create = CreateEvent;
    type Patch = EventPatch;

    fn id(&self) -> &str {
        &self.id
    }
}
