//! Pagination accumulator.
//!
//! Merges sequential page fetches into one ordered list per filter. The
//! accumulated list lives in the cache store under the plain list key, so
//! optimistic mutations on the resource show up in it; raw pages are cached
//! under the same key with `page`/`limit` added.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::api::{ListQuery, ResourceService};
use crate::cache::{CacheKey, ResourceType, Scope};
use crate::error::SyncError;
use crate::query::{QueryExecutor, QueryOptions, RetryPolicy};

/// Default number of records requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was merged into the accumulated list.
    Merged { added: usize, has_more: bool },
    /// Nothing was requested (a fetch is in flight or the list is exhausted).
    Skipped,
    /// The response arrived after the filter changed or a refresh started.
    Discarded,
}

/// Merge one page into the accumulated records. Page 1 replaces the list;
/// later pages append only records whose id is not present yet.
pub fn merge_page(accumulated: Vec<Value>, page_records: Vec<Value>, page: u32) -> Vec<Value> {
    let mut merged = if page <= 1 { Vec::new() } else { accumulated };
    let mut seen: HashSet<String> = merged.iter().filter_map(id_of).collect();
    for record in page_records {
        match id_of(&record) {
            Some(id) if seen.contains(&id) => {}
            Some(id) => {
                seen.insert(id);
                merged.push(record);
            }
            None => merged.push(record),
        }
    }
    merged
}

/// A full page means there may be more. An empty page after an exact
/// multiple of the page size is the authoritative end.
pub fn has_more(page_len: usize, page_size: u32) -> bool {
    page_size > 0 && page_len >= page_size as usize
}

fn id_of(record: &Value) -> Option<String> {
    record.get("id").and_then(Value::as_str).map(str::to_string)
}

/// Identifies the request a response belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Tag {
    fingerprint: String,
    page: u32,
    generation: u64,
}

struct Window {
    filter: Value,
    list_key: CacheKey,
    page: u32,
    has_more: bool,
    in_flight: Option<Tag>,
    generation: u64,
}

impl Window {
    fn tag(&self, page: u32) -> Tag {
        Tag {
            fingerprint: self.list_key.fingerprint().to_string(),
            page,
            generation: self.generation,
        }
    }
}

/// Frees the window's in-flight slot when a fetch future is dropped before
/// it settles. A slot already taken by a newer request is left alone.
struct InFlightGuard<'a> {
    window: &'a Mutex<Window>,
    tag: Tag,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut window = self.window.lock();
        if window.in_flight.as_ref() == Some(&self.tag) {
            window.in_flight = None;
        }
    }
}

/// Incrementally loaded list of one resource for one filter.
pub struct PaginatedQuery {
    executor: QueryExecutor,
    service: Arc<dyn ResourceService>,
    resource: ResourceType,
    page_size: u32,
    retry: RetryPolicy,
    window: Mutex<Window>,
}

impl PaginatedQuery {
    /// Nothing is fetched until `refresh`, `set_filter` or `load_more`.
    pub fn new(
        executor: QueryExecutor,
        service: Arc<dyn ResourceService>,
        resource: ResourceType,
        filter: Value,
        page_size: u32,
    ) -> Self {
        let list_key = CacheKey::from_value(resource, Scope::List, filter);
        Self {
            executor,
            service,
            resource,
            page_size,
            retry: RetryPolicy::default(),
            window: Mutex::new(Window {
                filter: list_key.qualifier().clone(),
                list_key,
                page: 0,
                has_more: true,
                in_flight: None,
                generation: 0,
            }),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn resource(&self) -> ResourceType {
        self.resource
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn filter(&self) -> Value {
        self.window.lock().filter.clone()
    }

    pub fn list_key(&self) -> CacheKey {
        self.window.lock().list_key.clone()
    }

    /// Highest page merged so far (0 before the first page lands).
    pub fn page(&self) -> u32 {
        self.window.lock().page
    }

    pub fn has_more(&self) -> bool {
        self.window.lock().has_more
    }

    pub fn is_fetching(&self) -> bool {
        self.window.lock().in_flight.is_some()
    }

    /// Accumulated records as raw values.
    pub fn values(&self) -> Vec<Value> {
        let key = self.list_key();
        match self.executor.store().get(&key) {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    /// Accumulated records decoded as `T`. Records that do not decode are
    /// left out.
    pub fn records<T: DeserializeOwned>(&self) -> Vec<T> {
        self.values()
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    /// Switch to a new filter. An unchanged filter is a no-op; otherwise the
    /// accumulated list is cleared and page 1 of the new filter fetched.
    pub async fn set_filter(&self, filter: Value) -> Result<PageOutcome, SyncError> {
        let new_key = CacheKey::from_value(self.resource, Scope::List, filter);
        let (tag, list_key) = {
            let mut window = self.window.lock();
            if window.list_key == new_key {
                return Ok(PageOutcome::Skipped);
            }
            window.generation += 1;
            window.filter = new_key.qualifier().clone();
            window.list_key = new_key;
            window.page = 0;
            window.has_more = true;
            let tag = window.tag(1);
            window.in_flight = Some(tag.clone());
            (tag, window.list_key.clone())
        };
        debug!(resource = %self.resource, key = %list_key, "Filter changed, resetting window");
        self.executor.store().set(&list_key, Value::Array(Vec::new()));
        self.fetch(tag, list_key).await
    }

    /// Refetch from page 1. Any page still in flight is superseded.
    pub async fn refresh(&self) -> Result<PageOutcome, SyncError> {
        let (tag, list_key) = {
            let mut window = self.window.lock();
            window.generation += 1;
            window.has_more = true;
            let tag = window.tag(1);
            window.in_flight = Some(tag.clone());
            (tag, window.list_key.clone())
        };
        self.fetch(tag, list_key).await
    }

    /// Fetch the next page, unless one is in flight or the list is exhausted.
    pub async fn load_more(&self) -> Result<PageOutcome, SyncError> {
        let (tag, list_key) = {
            let mut window = self.window.lock();
            if window.in_flight.is_some() || !window.has_more {
                return Ok(PageOutcome::Skipped);
            }
            let tag = window.tag(window.page + 1);
            window.in_flight = Some(tag.clone());
            (tag, window.list_key.clone())
        };
        self.fetch(tag, list_key).await
    }

    async fn fetch(&self, tag: Tag, list_key: CacheKey) -> Result<PageOutcome, SyncError> {
        let _guard = InFlightGuard {
            window: &self.window,
            tag: tag.clone(),
        };
        let page_key = list_key.page(tag.page, self.page_size);
        let query = ListQuery::new(tag.page, self.page_size).with_filter(list_key.qualifier());
        let service = Arc::clone(&self.service);
        let resource = self.resource;
        debug!(key = %page_key, "Fetching page");

        let result = self
            .executor
            .execute::<Vec<Value>, _, _>(
                &page_key,
                move || {
                    let service = Arc::clone(&service);
                    let query = query.clone();
                    async move { service.list(resource, &query).await.map(|page| page.records) }
                },
                QueryOptions::default()
                    .stale_time(Duration::ZERO)
                    .retry(self.retry),
            )
            .await;

        {
            let mut window = self.window.lock();
            if window.in_flight.as_ref() != Some(&tag) {
                debug!(key = %page_key, "Discarding page for superseded window");
                return Ok(PageOutcome::Discarded);
            }
            window.in_flight = None;
            if let Some(e) = result.error {
                return Err(e);
            }
        }

        let records = result.data.unwrap_or_default();
        let more = has_more(records.len(), self.page_size);
        let store = self.executor.store();
        let accumulated = match store.get(&list_key) {
            Some(Value::Array(items)) if tag.page > 1 => items,
            _ => Vec::new(),
        };
        let before = accumulated.len();
        let merged = merge_page(accumulated, records, tag.page);
        let added = merged.len() - before;
        store.set(&list_key, Value::Array(merged));

        {
            let mut window = self.window.lock();
            window.page = tag.page;
            window.has_more = more;
        }
        debug!(key = %list_key, page = tag.page, added, has_more = more, "Merged page");
        Ok(PageOutcome::Merged {
            added,
            has_more: more,
        })
    }
}
