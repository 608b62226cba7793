use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Qualifier fields that describe a page rather than a filter.
const PAGE_FIELDS: [&str; 2] = ["page", "limit"];

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Qualifier could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceType {
    Pets,
    Expenses,
    Budgets,
    HealthRecords,
    Events,
    FeedingSchedules,
}

impl ResourceType {
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Pets,
        ResourceType::Expenses,
        ResourceType::Budgets,
        ResourceType::HealthRecords,
        ResourceType::Events,
        ResourceType::FeedingSchedules,
    ];

    /// URL path segment of the resource's endpoints.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ResourceType::Pets => "pets",
            ResourceType::Expenses => "expenses",
            ResourceType::Budgets => "budgets",
            ResourceType::HealthRecords => "health-records",
            ResourceType::Events => "events",
            ResourceType::FeedingSchedules => "feeding-schedules",
        }
    }

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.path_segment() == segment)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    List,
    Detail,
    Derived,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::List => write!(f, "list"),
            Scope::Detail => write!(f, "detail"),
            Scope::Derived => write!(f, "derived"),
        }
    }
}

/// Hierarchical identifier of a cached query: `resource / scope / qualifier`.
///
/// The qualifier is canonicalized on construction, so two structurally equal
/// qualifiers always produce equal keys regardless of field order.
#[derive(Debug, Clone)]
pub struct CacheKey {
    resource: ResourceType,
    scope: Scope,
    qualifier: Value,
    fingerprint: String,
}

impl CacheKey {
    pub fn build(
        resource: ResourceType,
        scope: Scope,
        qualifier: impl Serialize,
    ) -> Result<Self, KeyError> {
        let raw = serde_json::to_value(qualifier)?;
        Ok(Self::from_value(resource, scope, raw))
    }

    /// Build a key from an already-serialized qualifier.
    pub fn from_value(resource: ResourceType, scope: Scope, qualifier: Value) -> Self {
        let qualifier = canonicalize(qualifier);
        let fingerprint = fingerprint(&qualifier);
        Self {
            resource,
            scope,
            qualifier,
            fingerprint,
        }
    }

    pub fn list(resource: ResourceType, filter: impl Serialize) -> Result<Self, KeyError> {
        Self::build(resource, Scope::List, filter)
    }

    pub fn detail(resource: ResourceType, id: &str) -> Self {
        Self::from_value(resource, Scope::Detail, serde_json::json!({ "id": id }))
    }

    /// Derived keys always carry a `kind` field next to their parameters.
    pub fn derived(
        resource: ResourceType,
        kind: &str,
        params: impl Serialize,
    ) -> Result<Self, KeyError> {
        let mut qualifier = match serde_json::to_value(params)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        qualifier.insert("kind".to_string(), Value::String(kind.to_string()));
        Ok(Self::from_value(resource, Scope::Derived, Value::Object(qualifier)))
    }

    /// The list key for one page of `filter`.
    pub fn page(&self, page: u32, limit: u32) -> Self {
        let mut qualifier = match &self.qualifier {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        qualifier.insert("page".to_string(), Value::from(page));
        qualifier.insert("limit".to_string(), Value::from(limit));
        Self::from_value(self.resource, self.scope, Value::Object(qualifier))
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn qualifier(&self) -> &Value {
        &self.qualifier
    }

    /// Deterministic serialization of the qualifier.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource
            && self.scope == other.scope
            && self.fingerprint == other.fingerprint
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource.hash(state);
        self.scope.hash(state);
        self.fingerprint.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource, self.scope, self.fingerprint)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum QualifierMatch {
    /// Same canonical fingerprint.
    Exact(String),
    /// Every field of the partial qualifier is present and equal.
    Partial(Value),
}

/// Selects a family of keys: a resource, optionally narrowed by scope and a
/// qualifier.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFilter {
    resource: ResourceType,
    scope: Option<Scope>,
    qualifier: Option<QualifierMatch>,
}

impl KeyFilter {
    pub fn resource(resource: ResourceType) -> Self {
        Self {
            resource,
            scope: None,
            qualifier: None,
        }
    }

    pub fn lists(resource: ResourceType) -> Self {
        Self::resource(resource).scope(Scope::List)
    }

    pub fn exact(key: &CacheKey) -> Self {
        Self {
            resource: key.resource,
            scope: Some(key.scope),
            qualifier: Some(QualifierMatch::Exact(key.fingerprint.clone())),
        }
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Narrow to keys whose qualifier contains every field of `qualifier`.
    pub fn qualifier(mut self, qualifier: Value) -> Self {
        self.qualifier = Some(QualifierMatch::Partial(canonicalize(qualifier)));
        self
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        if self.resource != key.resource {
            return false;
        }
        if let Some(scope) = self.scope {
            if scope != key.scope {
                return false;
            }
        }
        match &self.qualifier {
            None => true,
            Some(QualifierMatch::Exact(fingerprint)) => &key.fingerprint == fingerprint,
            Some(QualifierMatch::Partial(partial)) => contains(&key.qualifier, partial),
        }
    }
}

impl From<&CacheKey> for KeyFilter {
    fn from(key: &CacheKey) -> Self {
        KeyFilter::exact(key)
    }
}

/// Whether `record` belongs in a list cached under `list_qualifier`.
///
/// Every filter field other than `page`/`limit` that the record also carries
/// must be equal.
pub fn list_filter_matches(list_qualifier: &Value, record: &Value) -> bool {
    let (Value::Object(filter), Value::Object(fields)) = (list_qualifier, record) else {
        return true;
    };
    filter
        .iter()
        .filter(|(name, _)| !PAGE_FIELDS.contains(&name.as_str()))
        .all(|(name, expected)| match fields.get(name) {
            Some(actual) => actual == expected,
            None => true,
        })
}

/// Sort object fields recursively and drop `null` object members.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize with explicitly sorted object keys so the result does not depend
/// on the map implementation serde_json was built with.
fn fingerprint(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut names: Vec<&String> = map.keys().collect();
            names.sort();
            out.push('{');
            for (i, name) in names.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*name).clone()).to_string());
                out.push(':');
                write_canonical(&map[name.as_str()], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(have), Value::Object(want)) => want
            .iter()
            .all(|(name, v)| have.get(name).is_some_and(|h| h == v)),
        (have, want) => have == want,
    }
}
