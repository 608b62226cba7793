use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use super::envelope::Page;
use crate::cache::ResourceType;
use crate::error::SyncError;

/// Parameters of a list request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    /// Resource-specific filter fields (`petId`, `category`, ...).
    #[serde(flatten)]
    pub filters: Map<String, Value>,
}

impl ListQuery {
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            filters: Map::new(),
        }
    }

    /// Use the fields of `filter` (when it is an object) as filter params.
    pub fn with_filter(mut self, filter: &Value) -> Self {
        if let Value::Object(fields) = filter {
            for (name, value) in fields {
                if !value.is_null() {
                    self.filters.insert(name.clone(), value.clone());
                }
            }
        }
        self
    }

    /// Flat `name=value` pairs for a query string.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![
            ("page".to_string(), self.page.to_string()),
            ("limit".to_string(), self.limit.to_string()),
        ];
        for (name, value) in &self.filters {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            pairs.push((name.clone(), text));
        }
        pairs
    }
}

/// The remote resource service. Every method resolves to the normalized
/// payload or a `SyncError`; no method panics on a failed response.
#[async_trait]
pub trait ResourceService: Send + Sync {
    async fn list(&self, resource: ResourceType, query: &ListQuery) -> Result<Page, SyncError>;

    async fn get(&self, resource: ResourceType, id: &str) -> Result<Value, SyncError>;

    /// Returns the authoritative created record.
    async fn create(&self, resource: ResourceType, body: &Value) -> Result<Value, SyncError>;

    /// Partial update. Returns the authoritative updated record.
    async fn update(&self, resource: ResourceType, id: &str, patch: &Value)
        -> Result<Value, SyncError>;

    async fn delete(&self, resource: ResourceType, id: &str) -> Result<(), SyncError>;

    /// Derived endpoints: statistics, alerts, status.
    async fn derived(
        &self,
        resource: ResourceType,
        name: &str,
        params: &Value,
    ) -> Result<Value, SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_list_query_pairs() {
        let query = ListQuery::new(2, 20).with_filter(&json!({"petId": "P1", "minAmount": 5, "x": null}));
        let pairs = query.to_pairs();
        assert!(pairs.contains(&("page".to_string(), "2".to_string())));
        assert!(pairs.contains(&("petId".to_string(), "P1".to_string())));
        assert!(pairs.contains(&("minAmount".to_string(), "5".to_string())));
        assert_eq!(pairs.len(), 4);
    }
}
