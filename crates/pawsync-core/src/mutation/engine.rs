use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::derived::derived_invalidations;
use super::records::{
    find_in_list, merge_patch, patch_in_list, record_id, remove_from_list, replace_in_list,
};
use crate::api::ResourceService;
use crate::cache::{
    list_filter_matches, CacheKey, CacheStore, KeyFilter, ResourceType, RestoreOutcome, Scope,
    Snapshot,
};
use crate::error::SyncError;
use crate::models::{require_id, Resource, Validate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Create => write!(f, "create"),
            MutationKind::Update => write!(f, "update"),
            MutationKind::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Optimistic,
    Committed,
    RolledBack,
}

/// A mutation between its optimistic apply and its settlement.
///
/// Settles exactly once: `commit` or `rollback` consume it, and dropping an
/// unsettled mutation (its future was cancelled) rolls it back.
pub struct PendingMutation {
    store: CacheStore,
    kind: MutationKind,
    resource: ResourceType,
    target_id: String,
    snapshots: Vec<Snapshot>,
    phase: MutationPhase,
    counter: Arc<AtomicUsize>,
}

impl PendingMutation {
    fn begin(
        store: CacheStore,
        kind: MutationKind,
        resource: ResourceType,
        target_id: &str,
        snapshots: Vec<Snapshot>,
        counter: Arc<AtomicUsize>,
    ) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        debug!(
            %kind,
            %resource,
            id = target_id,
            entries = snapshots.len(),
            from = ?MutationPhase::Idle,
            "Optimistic apply"
        );
        Self {
            store,
            kind,
            resource,
            target_id: target_id.to_string(),
            snapshots,
            phase: MutationPhase::Optimistic,
            counter,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn phase(&self) -> MutationPhase {
        self.phase
    }

    /// Keys touched by the optimistic apply.
    pub fn target_keys(&self) -> Vec<&CacheKey> {
        self.snapshots.iter().map(|s| &s.key).collect()
    }

    pub fn commit(mut self) {
        self.phase = MutationPhase::Committed;
        info!(kind = %self.kind, resource = %self.resource, id = %self.target_id, "Mutation committed");
    }

    /// Put every snapshot back. Fails with `Conflict` when an entry the
    /// mutation edited was evicted meanwhile.
    pub fn rollback(mut self) -> Result<(), SyncError> {
        self.phase = MutationPhase::RolledBack;
        self.restore_all()
    }

    fn restore_all(&mut self) -> Result<(), SyncError> {
        let mut conflict = false;
        for snapshot in std::mem::take(&mut self.snapshots) {
            match self.store.restore(&snapshot) {
                RestoreOutcome::Restored => {}
                RestoreOutcome::Superseded => {
                    debug!(key = %snapshot.key, "Snapshot superseded, keeping newer value");
                    if self.kind == MutationKind::Create {
                        let temp_id = self.target_id.as_str();
                        self.store.edit(&KeyFilter::exact(&snapshot.key), |_, list| {
                            remove_from_list(list, temp_id).is_some()
                        });
                    }
                    self.store.invalidate(&KeyFilter::exact(&snapshot.key));
                }
                // A create only ever added a record; nothing to resurrect
                RestoreOutcome::Evicted if self.kind == MutationKind::Create => {}
                RestoreOutcome::Evicted => {
                    warn!(key = %snapshot.key, "Snapshot target evicted during mutation");
                    conflict = true;
                }
            }
        }
        warn!(kind = %self.kind, resource = %self.resource, id = %self.target_id, conflict, "Mutation rolled back");
        if conflict {
            Err(SyncError::Conflict)
        } else {
            Ok(())
        }
    }
}

impl Drop for PendingMutation {
    fn drop(&mut self) {
        if self.phase == MutationPhase::Optimistic {
            self.phase = MutationPhase::RolledBack;
            let _ = self.restore_all();
        }
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Generic create/update/delete with optimistic apply and rollback.
///
/// Mutations are sent exactly once; they are not assumed idempotent.
pub struct MutationEngine {
    store: CacheStore,
    service: Arc<dyn ResourceService>,
    next_temp: AtomicU64,
    pending: Arc<AtomicUsize>,
}

impl MutationEngine {
    pub fn new(store: CacheStore, service: Arc<dyn ResourceService>) -> Self {
        Self {
            store,
            service,
            next_temp: AtomicU64::new(0),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mutations currently between optimistic apply and settlement.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub async fn create<R: Resource>(&self, input: &R::Create) -> Result<R, SyncError> {
        input.validate()?;
        let body = serde_json::to_value(input).map_err(invalid_input)?;
        let Value::Object(mut fields) = body.clone() else {
            return Err(SyncError::Validation("Input must be an object".to_string()));
        };

        let temp_id = format!("temp-{}", self.next_temp.fetch_add(1, Ordering::Relaxed) + 1);
        let now = Utc::now().to_rfc3339();
        fields.insert("id".to_string(), Value::String(temp_id.clone()));
        fields.insert("createdAt".to_string(), Value::String(now.clone()));
        fields.insert("updatedAt".to_string(), Value::String(now));
        let optimistic = Value::Object(fields);

        let snapshots = self.store.apply_optimistic(&KeyFilter::lists(R::TYPE), |key, list| {
            if is_page_key(key) || !list_filter_matches(key.qualifier(), &optimistic) {
                return false;
            }
            match list.as_array_mut() {
                Some(items) => {
                    items.push(optimistic.clone());
                    true
                }
                None => false,
            }
        });
        let pending = self.begin(MutationKind::Create, R::TYPE, &temp_id, snapshots);

        let (record, value) = match self.service.create(R::TYPE, &body).await.and_then(decode::<R>) {
            Ok(created) => created,
            Err(e) => return Err(fail(pending, e)),
        };

        self.store.edit(&KeyFilter::lists(R::TYPE), |key, list| {
            if is_page_key(key) {
                return false;
            }
            if replace_in_list(list, &temp_id, &value) {
                return true;
            }
            // A refetch replaced the list while the request was open
            if !list_filter_matches(key.qualifier(), &value)
                || find_in_list(list, record.id()).is_some()
            {
                return false;
            }
            match list.as_array_mut() {
                Some(items) => {
                    items.push(value.clone());
                    true
                }
                None => false,
            }
        });
        self.store.set(&CacheKey::detail(R::TYPE, record.id()), value.clone());
        self.invalidate_after(R::TYPE, None, Some(&value));
        pending.commit();
        Ok(record)
    }

    /// Patch the detail entry and every accumulated list holding the record.
    ///
    /// Raw page entries (qualifiers with `page`/`limit`) are not patched
    /// optimistically; they keep the old record until the commit marks them
    /// stale.
    pub async fn update<R: Resource>(&self, id: &str, patch: &R::Patch) -> Result<R, SyncError> {
        require_id(id, "Id")?;
        patch.validate()?;
        let body = serde_json::to_value(patch).map_err(invalid_input)?;
        let Some(fields) = body.as_object() else {
            return Err(SyncError::Validation("Patch must be an object".to_string()));
        };

        let now = Utc::now().to_rfc3339();
        let mut before: Option<Value> = None;
        let snapshots =
            self.store
                .apply_optimistic(&KeyFilter::resource(R::TYPE), |key, value| match key.scope() {
                    Scope::Detail if key.qualifier()["id"] == id => {
                        before.get_or_insert_with(|| value.clone());
                        merge_patch(value, fields, &now)
                    }
                    Scope::List if !is_page_key(key) => {
                        if let Some(record) = find_in_list(value, id) {
                            before.get_or_insert_with(|| record.clone());
                        }
                        patch_in_list(value, id, fields, &now)
                    }
                    _ => false,
                });
        let pending = self.begin(MutationKind::Update, R::TYPE, id, snapshots);

        let (record, value) = match self.service.update(R::TYPE, id, &body).await.and_then(decode::<R>) {
            Ok(updated) => updated,
            Err(e) => return Err(fail(pending, e)),
        };

        self.store.edit(&KeyFilter::lists(R::TYPE), |key, list| {
            if is_page_key(key) || find_in_list(list, id).is_none() {
                return false;
            }
            // The record may have moved out of a filtered list
            if list_filter_matches(key.qualifier(), &value) {
                replace_in_list(list, id, &value)
            } else {
                remove_from_list(list, id).is_some()
            }
        });
        self.store.set(&CacheKey::detail(R::TYPE, id), value.clone());
        self.invalidate_after(R::TYPE, before.as_ref(), Some(&value));
        pending.commit();
        Ok(record)
    }

    pub async fn delete<R: Resource>(&self, id: &str) -> Result<(), SyncError> {
        require_id(id, "Id")?;
        let detail = CacheKey::detail(R::TYPE, id);
        let mut before = self.store.get(&detail);

        let snapshots = self.store.apply_optimistic(&KeyFilter::lists(R::TYPE), |key, list| {
            if is_page_key(key) {
                return false;
            }
            match remove_from_list(list, id) {
                Some(removed) => {
                    before.get_or_insert(removed);
                    true
                }
                None => false,
            }
        });
        let pending = self.begin(MutationKind::Delete, R::TYPE, id, snapshots);

        if let Err(e) = self.service.delete(R::TYPE, id).await {
            return Err(fail(pending, e));
        }

        self.store.remove(&detail);
        // A refetch may have brought the record back while the call was open
        self.store.edit(&KeyFilter::lists(R::TYPE), |key, list| {
            !is_page_key(key) && remove_from_list(list, id).is_some()
        });
        let before = before.unwrap_or_else(|| json!({ "id": id }));
        self.invalidate_after(R::TYPE, Some(&before), None);
        pending.commit();
        Ok(())
    }

    fn begin(
        &self,
        kind: MutationKind,
        resource: ResourceType,
        target_id: &str,
        snapshots: Vec<Snapshot>,
    ) -> PendingMutation {
        PendingMutation::begin(
            self.store.clone(),
            kind,
            resource,
            target_id,
            snapshots,
            Arc::clone(&self.pending),
        )
    }

    fn invalidate_after(&self, resource: ResourceType, before: Option<&Value>, after: Option<&Value>) {
        for filter in derived_invalidations(resource, before, after) {
            self.store.invalidate(&filter);
        }
        // Raw pages no longer reflect the collection
        for key in self.store.matching_keys(&KeyFilter::lists(resource)) {
            if is_page_key(&key) {
                self.store.invalidate(&KeyFilter::exact(&key));
            }
        }
        debug!(
            %resource,
            id = after.or(before).and_then(record_id).unwrap_or_default(),
            "Invalidated derived entries"
        );
    }
}

fn fail(pending: PendingMutation, error: SyncError) -> SyncError {
    warn!(
        kind = %pending.kind(),
        resource = %pending.resource(),
        id = pending.target_id(),
        error = %error,
        "Mutation failed, rolling back"
    );
    match pending.rollback() {
        Ok(()) => error,
        Err(conflict) => conflict,
    }
}

fn decode<R: Resource>(value: Value) -> Result<(R, Value), SyncError> {
    let record = serde_json::from_value(value.clone())?;
    Ok((record, value))
}

fn invalid_input(err: serde_json::Error) -> SyncError {
    SyncError::Validation(format!("Input could not be encoded: {}", err))
}

/// Raw page entries are refetched rather than edited in place.
fn is_page_key(key: &CacheKey) -> bool {
    key.qualifier().get("page").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expenses(pet: &str) -> CacheKey {
        CacheKey::list(ResourceType::Expenses, json!({ "petId": pet })).unwrap()
    }

    fn pending(store: &CacheStore, kind: MutationKind, id: &str, snapshots: Vec<Snapshot>) -> PendingMutation {
        PendingMutation::begin(
            store.clone(),
            kind,
            ResourceType::Expenses,
            id,
            snapshots,
            Arc::new(AtomicUsize::new(0)),
        )
    }

    #[test]
    fn test_dropped_mutation_rolls_back() {
        let store = CacheStore::new();
        let key = expenses("P1");
        store.set(&key, json!([{"id": "E1"}]));
        let snapshots = store.apply_optimistic(&KeyFilter::exact(&key), |_, list| {
            remove_from_list(list, "E1").is_some()
        });
        let counter = Arc::new(AtomicUsize::new(0));
        let mutation = PendingMutation::begin(
            store.clone(),
            MutationKind::Delete,
            ResourceType::Expenses,
            "E1",
            snapshots,
            Arc::clone(&counter),
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(store.get(&key), Some(json!([])));

        drop(mutation);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(&key), Some(json!([{"id": "E1"}])));
    }

    #[test]
    fn test_committed_mutation_keeps_edit() {
        let store = CacheStore::new();
        let key = expenses("P1");
        store.set(&key, json!([{"id": "E1"}]));
        let snapshots = store.apply_optimistic(&KeyFilter::exact(&key), |_, list| {
            remove_from_list(list, "E1").is_some()
        });
        let mutation = pending(&store, MutationKind::Delete, "E1", snapshots);
        assert_eq!(mutation.target_keys(), vec![&key]);
        mutation.commit();
        assert_eq!(store.get(&key), Some(json!([])));
    }

    #[test]
    fn test_superseded_create_drops_temp_record() {
        let store = CacheStore::new();
        let key = expenses("P1");
        store.set(&key, json!([{"id": "E1"}]));
        let snapshots = store.apply_optimistic(&KeyFilter::exact(&key), |_, list| {
            list.as_array_mut().map(|a| a.push(json!({"id": "temp-1"}))).is_some()
        });
        // An unrelated edit lands on the same list before the create fails
        store.edit(&KeyFilter::exact(&key), |_, list| {
            list.as_array_mut().map(|a| a.push(json!({"id": "E2"}))).is_some()
        });

        let mutation = pending(&store, MutationKind::Create, "temp-1", snapshots);
        assert!(mutation.rollback().is_ok());
        assert_eq!(store.get(&key), Some(json!([{"id": "E1"}, {"id": "E2"}])));
        assert!(store.entry_info(&key).is_some_and(|i| i.stale));
    }

    #[test]
    fn test_evicted_update_target_is_conflict() {
        let store = CacheStore::new();
        let key = CacheKey::detail(ResourceType::Expenses, "E1");
        store.set(&key, json!({"id": "E1", "amount": 1}));
        let patch = json!({"amount": 2});
        let snapshots = store.apply_optimistic(&KeyFilter::exact(&key), |_, record| {
            merge_patch(record, patch.as_object().unwrap(), "now")
        });
        store.remove(&key);

        let mutation = pending(&store, MutationKind::Update, "E1", snapshots);
        assert_eq!(mutation.rollback(), Err(SyncError::Conflict));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn test_page_keys_are_recognized() {
        let list = expenses("P1");
        assert!(!is_page_key(&list));
        assert!(is_page_key(&list.page(2, 20)));
    }
}
