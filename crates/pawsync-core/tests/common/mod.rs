//! Scriptable in-memory resource service shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use pawsync_core::api::PageMeta;
use pawsync_core::{ListQuery, Page, ResourceService, ResourceType, SyncError};

pub const SERVER_TIME: &str = "2024-05-01T10:00:00Z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Get,
    Create,
    Update,
    Delete,
    Derived,
}

#[derive(Default)]
struct FakeState {
    records: HashMap<ResourceType, Vec<Value>>,
    derived: HashMap<String, Value>,
    next_ids: VecDeque<String>,
    issued: u64,
    calls: HashMap<Op, usize>,
    list_queries: Vec<ListQuery>,
    failures: HashMap<Op, VecDeque<SyncError>>,
    gates: HashMap<Op, VecDeque<oneshot::Receiver<()>>>,
}

/// Server stand-in. Every call is counted; failures and gates are queued
/// per operation and consumed by the next call of that operation.
#[derive(Default)]
pub struct FakeService {
    state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, resource: ResourceType, records: Vec<Value>) {
        self.state.lock().records.insert(resource, records);
    }

    pub fn set_derived(&self, name: &str, payload: Value) {
        self.state.lock().derived.insert(name.to_string(), payload);
    }

    /// Id given to the next created record.
    pub fn next_id(&self, id: &str) {
        self.state.lock().next_ids.push_back(id.to_string());
    }

    pub fn fail_next(&self, op: Op, error: SyncError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Hold the next call of `op` open until the returned sender fires.
    pub fn gate(&self, op: Op) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().gates.entry(op).or_default().push_back(rx);
        tx
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Page numbers of every list request, in call order.
    pub fn requested_pages(&self) -> Vec<u32> {
        self.state.lock().list_queries.iter().map(|q| q.page).collect()
    }

    pub fn server_records(&self, resource: ResourceType) -> Vec<Value> {
        self.state
            .lock()
            .records
            .get(&resource)
            .cloned()
            .unwrap_or_default()
    }

    async fn enter(&self, op: Op) -> Result<(), SyncError> {
        let (gate, failure) = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_default() += 1;
            let gate = state.gates.get_mut(&op).and_then(VecDeque::pop_front);
            let failure = state.failures.get_mut(&op).and_then(VecDeque::pop_front);
            (gate, failure)
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn matches_filters(record: &Value, query: &ListQuery) -> bool {
    query
        .filters
        .iter()
        .all(|(name, expected)| record.get(name).map_or(true, |actual| actual == expected))
}

fn not_found() -> SyncError {
    SyncError::remote_with_code("Record not found", "not_found")
}

#[async_trait]
impl ResourceService for FakeService {
    async fn list(&self, resource: ResourceType, query: &ListQuery) -> Result<Page, SyncError> {
        self.state.lock().list_queries.push(query.clone());
        self.enter(Op::List).await?;
        let state = self.state.lock();
        let matching: Vec<Value> = state
            .records
            .get(&resource)
            .map(|all| all.iter().filter(|r| matches_filters(r, query)).cloned().collect())
            .unwrap_or_default();
        let total = matching.len() as u64;
        let skip = (query.page.saturating_sub(1) * query.limit) as usize;
        let records = matching
            .into_iter()
            .skip(skip)
            .take(query.limit as usize)
            .collect();
        Ok(Page {
            records,
            meta: Some(PageMeta {
                total,
                page: query.page,
                limit: query.limit,
            }),
        })
    }

    async fn get(&self, resource: ResourceType, id: &str) -> Result<Value, SyncError> {
        self.enter(Op::Get).await?;
        let state = self.state.lock();
        state
            .records
            .get(&resource)
            .and_then(|all| all.iter().find(|r| r["id"] == id).cloned())
            .ok_or_else(not_found)
    }

    async fn create(&self, resource: ResourceType, body: &Value) -> Result<Value, SyncError> {
        self.enter(Op::Create).await?;
        let mut state = self.state.lock();
        state.issued += 1;
        let id = match state.next_ids.pop_front() {
            Some(id) => id,
            None => format!("srv-{}", state.issued),
        };
        let mut record = body.clone();
        if let Some(fields) = record.as_object_mut() {
            fields.insert("id".to_string(), json!(id));
            fields.insert("createdAt".to_string(), json!(SERVER_TIME));
            fields.insert("updatedAt".to_string(), json!(SERVER_TIME));
        }
        state.records.entry(resource).or_default().push(record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        resource: ResourceType,
        id: &str,
        patch: &Value,
    ) -> Result<Value, SyncError> {
        self.enter(Op::Update).await?;
        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(&resource)
            .and_then(|all| all.iter_mut().find(|r| r["id"] == id))
            .ok_or_else(not_found)?;
        if let (Some(fields), Some(changes)) = (record.as_object_mut(), patch.as_object()) {
            for (name, value) in changes {
                fields.insert(name.clone(), value.clone());
            }
            fields.insert("updatedAt".to_string(), json!(SERVER_TIME));
        }
        Ok(record.clone())
    }

    async fn delete(&self, resource: ResourceType, id: &str) -> Result<(), SyncError> {
        self.enter(Op::Delete).await?;
        let mut state = self.state.lock();
        let all = state.records.entry(resource).or_default();
        let before = all.len();
        all.retain(|r| r["id"] != id);
        if all.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    async fn derived(
        &self,
        _resource: ResourceType,
        name: &str,
        _params: &Value,
    ) -> Result<Value, SyncError> {
        self.enter(Op::Derived).await?;
        self.state
            .lock()
            .derived
            .get(name)
            .cloned()
            .ok_or_else(not_found)
    }
}

pub fn expense(id: &str, pet_id: &str, amount: f64, category: &str) -> Value {
    json!({
        "id": id,
        "petId": pet_id,
        "amount": amount,
        "currency": "TRY",
        "category": category,
        "createdAt": SERVER_TIME,
        "updatedAt": SERVER_TIME,
    })
}

pub fn budget(id: &str, category: &str, threshold: f64) -> Value {
    json!({
        "id": id,
        "name": format!("{} budget", category),
        "category": category,
        "amount": 500.0,
        "currency": "TRY",
        "period": "monthly",
        "alertThreshold": threshold,
        "createdAt": SERVER_TIME,
        "updatedAt": SERVER_TIME,
    })
}

pub fn ids(records: &[Value]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r["id"].as_str().map(str::to_string))
        .collect()
}

/// Ids of a cached list value.
pub fn list_ids(value: Option<Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => ids(&items),
        _ => Vec::new(),
    }
}
