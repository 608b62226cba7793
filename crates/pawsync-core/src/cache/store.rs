//! The resource cache store.
//!
//! A cloneable handle over the single piece of shared mutable state in the
//! sync layer. Every component reads and writes entries through this API.
//! Subscriber callbacks run synchronously after the store lock is released,
//! so a callback may read the store it is observing.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::key::{CacheKey, KeyFilter};
use crate::error::SyncError;

pub type FetchResult = Result<Value, SyncError>;
pub(crate) type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Updated,
    Invalidated,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: CacheKey,
    pub kind: CacheEventKind,
}

/// Pre-edit value of one entry, captured in the same critical section as the
/// edit itself.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub key: CacheKey,
    pub previous: Value,
    previous_stale: bool,
    written_version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Another write landed after the snapshot; the snapshot was not applied.
    Superseded,
    /// The entry no longer exists.
    Evicted,
}

#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub version: u64,
    pub stale: bool,
    pub fetching: bool,
    pub has_value: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl EntryInfo {
    pub fn age_minutes(&self) -> Option<i64> {
        self.fetched_at.map(|at| (Utc::now() - at).num_minutes())
    }

    pub fn age_display(&self) -> String {
        let Some(minutes) = self.age_minutes() else {
            return "never".to_string();
        };
        if minutes < 1 {
            // Covers clock skew as well
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

struct InFlight {
    ticket: u64,
    future: SharedFetch,
    /// An invalidation landed after the request was sent.
    overtaken: bool,
}

#[derive(Default)]
struct Entry {
    value: Option<Value>,
    fetched_at: Option<DateTime<Utc>>,
    updated_at: Option<Instant>,
    stale: bool,
    version: u64,
    in_flight: Option<InFlight>,
}

struct Subscriber {
    id: u64,
    filter: KeyFilter,
    callback: Callback,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    subscribers: Vec<Subscriber>,
    next_version: u64,
    next_ticket: u64,
    next_subscriber: u64,
}

impl Inner {
    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn callbacks_for(&self, events: Vec<CacheEvent>) -> Vec<(Callback, CacheEvent)> {
        let mut out = Vec::new();
        for event in events {
            for sub in &self.subscribers {
                if sub.filter.matches(&event.key) {
                    out.push((Arc::clone(&sub.callback), event.clone()));
                }
            }
        }
        out
    }
}

/// Handle returned by [`CacheStore::subscribe`]. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.lock().subscribers.retain(|s| s.id != self.id);
        }
    }
}

#[derive(Clone, Default)]
pub struct CacheStore {
    inner: Arc<Mutex<Inner>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &CacheKey) -> Option<Value> {
        self.inner
            .lock()
            .entries
            .get(key)
            .and_then(|e| e.value.clone())
    }

    /// Decode an entry, treating an undecodable value as absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached value did not match requested type");
                None
            }
        }
    }

    /// Store an authoritative value. Returns the entry's new version.
    pub fn set(&self, key: &CacheKey, value: Value) -> u64 {
        let (version, callbacks) = {
            let mut inner = self.inner.lock();
            let version = inner.bump_version();
            let entry = inner.entries.entry(key.clone()).or_default();
            entry.value = Some(value);
            entry.stale = false;
            entry.fetched_at = Some(Utc::now());
            entry.updated_at = Some(Instant::now());
            entry.version = version;
            let callbacks = inner.callbacks_for(vec![CacheEvent {
                key: key.clone(),
                kind: CacheEventKind::Updated,
            }]);
            (version, callbacks)
        };
        dispatch(callbacks);
        version
    }

    pub fn set_from<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<u64, SyncError> {
        Ok(self.set(key, serde_json::to_value(value)?))
    }

    /// Evict an entry.
    pub fn remove(&self, key: &CacheKey) -> Option<Value> {
        let (removed, callbacks) = {
            let mut inner = self.inner.lock();
            let removed = inner.entries.remove(key);
            let callbacks = match removed {
                Some(_) => inner.callbacks_for(vec![CacheEvent {
                    key: key.clone(),
                    kind: CacheEventKind::Removed,
                }]),
                None => Vec::new(),
            };
            (removed, callbacks)
        };
        dispatch(callbacks);
        removed.and_then(|e| e.value)
    }

    /// Mark every entry matching `filter` stale. The whole family is marked
    /// before any subscriber runs. Returns the number of entries marked.
    pub fn invalidate(&self, filter: &KeyFilter) -> usize {
        let (count, callbacks) = {
            let mut inner = self.inner.lock();
            let mut events = Vec::new();
            for (key, entry) in inner.entries.iter_mut() {
                if filter.matches(key) {
                    entry.stale = true;
                    if let Some(in_flight) = entry.in_flight.as_mut() {
                        in_flight.overtaken = true;
                    }
                    events.push(CacheEvent {
                        key: key.clone(),
                        kind: CacheEventKind::Invalidated,
                    });
                }
            }
            debug!(count = events.len(), ?filter, "Invalidated cache entries");
            (events.len(), inner.callbacks_for(events))
        };
        dispatch(callbacks);
        count
    }

    pub fn subscribe<F>(&self, filter: KeyFilter, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.next_subscriber += 1;
        let id = inner.next_subscriber;
        inner.subscribers.push(Subscriber {
            id,
            filter,
            callback: Arc::new(callback),
        });
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn matching_keys(&self, filter: &KeyFilter) -> Vec<CacheKey> {
        self.inner
            .lock()
            .entries
            .keys()
            .filter(|k| filter.matches(k))
            .cloned()
            .collect()
    }

    pub fn entry_info(&self, key: &CacheKey) -> Option<EntryInfo> {
        self.inner.lock().entries.get(key).map(|e| EntryInfo {
            version: e.version,
            stale: e.stale,
            fetching: e.in_flight.is_some(),
            has_value: e.value.is_some(),
            fetched_at: e.fetched_at,
        })
    }

    /// Whether a fetch should run: missing, invalidated, or older than
    /// `stale_time`.
    pub fn is_stale(&self, key: &CacheKey, stale_time: Duration) -> bool {
        let inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(Entry {
                value: Some(_),
                stale: false,
                updated_at: Some(at),
                ..
            }) => at.elapsed() >= stale_time,
            _ => true,
        }
    }

    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Edit every populated entry matching `filter` in one critical section.
    /// `edit` returns true when it changed the value. Snapshots of the
    /// changed entries are returned for rollback.
    pub fn apply_optimistic<F>(&self, filter: &KeyFilter, mut edit: F) -> Vec<Snapshot>
    where
        F: FnMut(&CacheKey, &mut Value) -> bool,
    {
        let (snapshots, callbacks) = {
            let mut inner = self.inner.lock();
            let keys: Vec<CacheKey> = inner
                .entries
                .iter()
                .filter(|(k, e)| e.value.is_some() && filter.matches(k))
                .map(|(k, _)| k.clone())
                .collect();

            let mut snapshots = Vec::new();
            let mut events = Vec::new();
            for key in keys {
                let version = inner.next_version + 1;
                let Some(entry) = inner.entries.get_mut(&key) else {
                    continue;
                };
                let Some(value) = entry.value.as_mut() else {
                    continue;
                };
                let previous = value.clone();
                if !edit(&key, value) {
                    continue;
                }
                entry.version = version;
                entry.updated_at = Some(Instant::now());
                snapshots.push(Snapshot {
                    key: key.clone(),
                    previous,
                    previous_stale: entry.stale,
                    written_version: version,
                });
                inner.next_version = version;
                events.push(CacheEvent {
                    key,
                    kind: CacheEventKind::Updated,
                });
            }
            let callbacks = inner.callbacks_for(events);
            (snapshots, callbacks)
        };
        dispatch(callbacks);
        snapshots
    }

    /// Edit matching entries without keeping snapshots. Returns how many
    /// entries changed.
    pub fn edit<F>(&self, filter: &KeyFilter, edit: F) -> usize
    where
        F: FnMut(&CacheKey, &mut Value) -> bool,
    {
        self.apply_optimistic(filter, edit).len()
    }

    /// Put a snapshot back, unless the entry moved on or disappeared.
    pub fn restore(&self, snapshot: &Snapshot) -> RestoreOutcome {
        let (outcome, callbacks) = {
            let mut inner = self.inner.lock();
            let version = inner.next_version + 1;
            let outcome = match inner.entries.get_mut(&snapshot.key) {
                Some(entry) if entry.value.is_some() => {
                    if entry.version == snapshot.written_version {
                        entry.value = Some(snapshot.previous.clone());
                        // An invalidation that landed meanwhile still stands
                        entry.stale = snapshot.previous_stale || entry.stale;
                        entry.version = version;
                        RestoreOutcome::Restored
                    } else {
                        RestoreOutcome::Superseded
                    }
                }
                _ => RestoreOutcome::Evicted,
            };
            let callbacks = if outcome == RestoreOutcome::Restored {
                inner.next_version = version;
                inner.callbacks_for(vec![CacheEvent {
                    key: snapshot.key.clone(),
                    kind: CacheEventKind::Updated,
                }])
            } else {
                Vec::new()
            };
            (outcome, callbacks)
        };
        dispatch(callbacks);
        outcome
    }

    /// Join the in-flight fetch for `key`, or install the one produced by
    /// `start`. Returns the shared future and whether it was newly started.
    pub(crate) fn attach_or_start<F>(&self, key: &CacheKey, start: F) -> (SharedFetch, bool)
    where
        F: FnOnce(u64) -> SharedFetch,
    {
        let mut inner = self.inner.lock();
        if let Some(in_flight) = inner.entries.get(key).and_then(|e| e.in_flight.as_ref()) {
            return (in_flight.future.clone(), false);
        }
        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let future = start(ticket);
        inner.entries.entry(key.clone()).or_default().in_flight = Some(InFlight {
            ticket,
            future: future.clone(),
            overtaken: false,
        });
        (future, true)
    }

    /// Settle the fetch identified by `ticket`. A result whose ticket no
    /// longer owns the entry (evicted meanwhile) is dropped. A result that
    /// was overtaken by an invalidation is stored but stays stale.
    pub(crate) fn finish_fetch(&self, key: &CacheKey, ticket: u64, result: &FetchResult) {
        let callbacks = {
            let mut inner = self.inner.lock();
            let owns = inner
                .entries
                .get(key)
                .and_then(|e| e.in_flight.as_ref())
                .is_some_and(|f| f.ticket == ticket);
            if !owns {
                debug!(key = %key, "Dropping result of orphaned fetch");
                return;
            }
            let version = inner.bump_version();
            let Some(entry) = inner.entries.get_mut(key) else {
                return;
            };
            let overtaken = entry.in_flight.take().is_some_and(|f| f.overtaken);
            match result {
                Ok(value) => {
                    entry.value = Some(value.clone());
                    entry.stale = overtaken;
                    entry.fetched_at = Some(Utc::now());
                    entry.updated_at = Some(Instant::now());
                    entry.version = version;
                    inner.callbacks_for(vec![CacheEvent {
                        key: key.clone(),
                        kind: CacheEventKind::Updated,
                    }])
                }
                Err(_) => {
                    // A failed fetch on a never-populated entry leaves no trace
                    if entry.value.is_none() {
                        inner.entries.remove(key);
                    }
                    Vec::new()
                }
            }
        };
        dispatch(callbacks);
    }

    /// Populated entries, for persistence.
    pub(crate) fn export(&self) -> Vec<(CacheKey, Value, Option<DateTime<Utc>>, bool)> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter_map(|(k, e)| {
                e.value
                    .as_ref()
                    .map(|v| (k.clone(), v.clone(), e.fetched_at, e.stale))
            })
            .collect()
    }

    /// Seed an entry from persisted data without notifying subscribers.
    pub(crate) fn hydrate(
        &self,
        key: CacheKey,
        value: Value,
        fetched_at: DateTime<Utc>,
        stale: bool,
    ) {
        let mut inner = self.inner.lock();
        let version = inner.bump_version();
        let entry = inner.entries.entry(key).or_default();
        if entry.value.is_some() {
            return;
        }
        entry.value = Some(value);
        entry.fetched_at = Some(fetched_at);
        entry.updated_at = Some(Instant::now());
        entry.stale = stale;
        entry.version = version;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dispatch(callbacks: Vec<(Callback, CacheEvent)>) {
    for (callback, event) in callbacks {
        callback(&event);
    }
}
