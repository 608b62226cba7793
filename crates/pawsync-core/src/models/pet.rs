use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{require, require_id, Resource, Validate};
use crate::cache::ResourceType;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pet {
    pub id: String,
    pub name: String,
    pub species: String,
    #[serde(default)]
    pub breed: Option<String>,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub weight: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Pet {
    /// Age in whole years on `today`, if the birth date is known.
    pub fn age_years(&self, today: NaiveDate) -> Option<u32> {
        self.birth_date.and_then(|born| today.years_since(born))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePet {
    pub name: String,
    pub species: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

fn validate_weight(weight: Option<f64>) -> Result<(), SyncError> {
    require(
        weight.map_or(true, |w| w.is_finite() && w > 0.0),
        "Weight must be a positive number",
    )
}

impl Validate for CreatePet {
    fn validate(&self) -> Result<(), SyncError> {
        require_id(&self.name, "Name")?;
        require_id(&self.species, "Species")?;
        validate_weight(self.weight)
    }
}

impl Validate for PetPatch {
    fn validate(&self) -> Result<(), SyncError> {
        if let Some(name) = &self.name {
            require_id(name, "Name")?;
        }
        validate_weight(self.weight)
    }
}

impl Resource for Pet {
    const TYPE: ResourceType = ResourceType::Pets;
    type Create = CreatePet;
    type Patch = PetPatch;

    fn id(&self) -> &str {
        &self.id
    }
}
