//! The composition root.
//!
//! A `SyncContext` is built once at process start. It owns the cache store
//! and hands the same store to the query executor, the mutation engine, the
//! paginated queries and the status refreshers it creates.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::api::ResourceService;
use crate::cache::{CacheKey, CacheStore, ResourceType};
use crate::config::Config;
use crate::error::SyncError;
use crate::models::Resource;
use crate::mutation::MutationEngine;
use crate::pagination::{PaginatedQuery, DEFAULT_PAGE_SIZE};
use crate::query::{QueryExecutor, QueryOptions, QueryResult, RetryPolicy};
use crate::status::{StatusConfig, StatusRefresher};

pub struct SyncContext {
    store: CacheStore,
    executor: QueryExecutor,
    mutations: MutationEngine,
    service: Arc<dyn ResourceService>,
    page_size: u32,
    stale_time: Duration,
    retry: RetryPolicy,
    status_config: StatusConfig,
    refreshers: Mutex<HashMap<String, Arc<StatusRefresher>>>,
}

impl SyncContext {
    pub fn new(service: Arc<dyn ResourceService>) -> Self {
        let store = CacheStore::new();
        Self {
            executor: QueryExecutor::new(store.clone()),
            mutations: MutationEngine::new(store.clone(), Arc::clone(&service)),
            store,
            service,
            page_size: DEFAULT_PAGE_SIZE,
            stale_time: Duration::ZERO,
            retry: RetryPolicy::default(),
            status_config: StatusConfig::default(),
            refreshers: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config, service: Arc<dyn ResourceService>) -> Self {
        Self {
            page_size: config.page_size,
            stale_time: config.stale_time(),
            retry: config.retry_policy(),
            status_config: config.status_config(),
            ..Self::new(service)
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_status_config(mut self, config: StatusConfig) -> Self {
        self.status_config = config;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn mutations(&self) -> &MutationEngine {
        &self.mutations
    }

    pub fn service(&self) -> &Arc<dyn ResourceService> {
        &self.service
    }

    /// Query options carrying the configured stale time and retry policy.
    pub fn options<T>(&self) -> QueryOptions<T> {
        QueryOptions::default()
            .stale_time(self.stale_time)
            .retry(self.retry)
    }

    /// Cached read of one record. With no id the query is disabled and
    /// resolves to no data and no error.
    pub async fn detail<R: Resource>(&self, id: Option<&str>) -> QueryResult<R> {
        let id = id.unwrap_or_default().to_string();
        let key = CacheKey::detail(R::TYPE, &id);
        let options = self.options::<R>().enabled(!id.is_empty());
        let service = Arc::clone(&self.service);
        self.executor
            .execute(
                &key,
                move || {
                    let service = Arc::clone(&service);
                    let id = id.clone();
                    async move {
                        let value = service.get(R::TYPE, &id).await?;
                        serde_json::from_value::<R>(value).map_err(SyncError::from)
                    }
                },
                options,
            )
            .await
    }

    /// Cached read of a derived value (statistics, alerts, status).
    pub async fn derived(
        &self,
        resource: ResourceType,
        kind: &str,
        params: Value,
    ) -> Result<QueryResult<Value>, SyncError> {
        let key = CacheKey::derived(resource, kind, params)
            .map_err(|e| SyncError::Validation(e.to_string()))?;
        let service = Arc::clone(&self.service);
        let name = kind.to_string();
        let qualifier = key.qualifier().clone();
        let result = self
            .executor
            .execute(
                &key,
                move || {
                    let service = Arc::clone(&service);
                    let name = name.clone();
                    let qualifier = qualifier.clone();
                    async move { service.derived(resource, &name, &qualifier).await }
                },
                self.options(),
            )
            .await;
        Ok(result)
    }

    /// A new incrementally loaded list. Nothing is fetched until the caller
    /// refreshes it.
    pub fn paginated(&self, resource: ResourceType, filter: Value) -> PaginatedQuery {
        PaginatedQuery::new(
            self.executor.clone(),
            Arc::clone(&self.service),
            resource,
            filter,
            self.page_size,
        )
        .with_retry(self.retry)
    }

    /// The refresher for `name`. The same instance is returned for the
    /// lifetime of the context, so its breaker state is shared.
    pub fn status_refresher(&self, name: &str, key: CacheKey) -> Arc<StatusRefresher> {
        let mut refreshers = self.refreshers.lock();
        let refresher = refreshers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(StatusRefresher::new(
                self.store.clone(),
                Arc::clone(&self.service),
                name,
                key,
                self.status_config,
            ))
        });
        Arc::clone(refresher)
    }
}
