use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::retry::RetryPolicy;
use crate::cache::store::SharedFetch;
use crate::cache::{CacheKey, CacheStore};
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct QueryOptions<T> {
    /// When false no fetch happens and `placeholder` is returned.
    pub enabled: bool,
    /// How long a fetched value is served without revalidating.
    pub stale_time: Duration,
    pub retry: RetryPolicy,
    pub placeholder: Option<T>,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: Duration::ZERO,
            retry: RetryPolicy::default(),
            placeholder: None,
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn placeholder(mut self, placeholder: T) -> Self {
        self.placeholder = Some(placeholder);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_fetching: bool,
    pub error: Option<SyncError>,
}

impl<T> QueryResult<T> {
    fn settled(data: Option<T>, error: Option<SyncError>) -> Self {
        Self {
            data,
            is_loading: false,
            is_fetching: false,
            error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs fetches against cache keys. Concurrent executions for the same key
/// share one in-flight request.
#[derive(Clone)]
pub struct QueryExecutor {
    store: CacheStore,
}

impl QueryExecutor {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub async fn execute<T, F, Fut>(
        &self,
        key: &CacheKey,
        fetch: F,
        options: QueryOptions<T>,
    ) -> QueryResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        if !options.enabled {
            debug!(key = %key, "Query disabled, serving placeholder");
            return QueryResult::settled(options.placeholder, None);
        }

        if !self.store.is_stale(key, options.stale_time) {
            if let Some(data) = self.store.get_as::<T>(key) {
                return QueryResult::settled(Some(data), None);
            }
        }

        let outcome = self.fetch_shared(key, fetch, options.retry).await;
        let outcome = outcome.and_then(|value| serde_json::from_value::<T>(value).map_err(SyncError::from));
        match outcome {
            Ok(data) => QueryResult::settled(Some(data), None),
            Err(e) => {
                debug!(key = %key, error = %e, "Query failed");
                // Keep whatever was cached rather than blanking the view
                let data = self.store.get_as::<T>(key).or(options.placeholder);
                QueryResult::settled(data, Some(e))
            }
        }
    }

    /// Warm the cache for `key`. Errors are only logged.
    pub async fn prefetch<T, F, Fut>(&self, key: &CacheKey, fetch: F, options: QueryOptions<T>)
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let result = self.execute(key, fetch, options).await;
        if let Some(e) = result.error {
            debug!(key = %key, error = %e, "Prefetch failed");
        }
    }

    /// Live view of an entry, for renderers checking progress between awaits.
    pub fn state<T: DeserializeOwned>(&self, key: &CacheKey) -> QueryResult<T> {
        let data = self.store.get_as::<T>(key);
        let is_fetching = self.store.is_fetching(key);
        QueryResult {
            is_loading: is_fetching && data.is_none(),
            data,
            is_fetching,
            error: None,
        }
    }

    fn fetch_shared<T, F, Fut>(&self, key: &CacheKey, fetch: F, retry: RetryPolicy) -> SharedFetch
    where
        T: Serialize + Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
    {
        let (future, started) = self.store.attach_or_start(key, |ticket| {
            let store = self.store.clone();
            let key = key.clone();
            async move {
                let label = key.to_string();
                let result = retry
                    .run(&label, || fetch())
                    .await
                    .and_then(|data| serde_json::to_value(data).map_err(SyncError::from));
                store.finish_fetch(&key, ticket, &result);
                result
            }
            .boxed()
            .shared()
        });
        if started {
            debug!(key = %key, "Started fetch");
        } else {
            debug!(key = %key, "Attached to in-flight fetch");
        }
        future
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResourceType;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn key() -> CacheKey {
        CacheKey::list(ResourceType::Pets, json!({})).unwrap()
    }

    fn counting_fetch(
        calls: Arc<AtomicU32>,
        result: Result<Vec<String>, SyncError>,
    ) -> impl Fn() -> futures::future::Ready<Result<Vec<String>, SyncError>> + Send + Sync + 'static
    {
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(result.clone())
        }
    }

    #[tokio::test]
    async fn test_fetch_populates_cache() {
        let executor = QueryExecutor::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(&key(), counting_fetch(calls.clone(), Ok(vec!["P1".into()])), QueryOptions::default())
            .await;
        assert_eq!(result.data, Some(vec!["P1".to_string()]));
        assert_eq!(executor.store().get(&key()), Some(json!(["P1"])));
        assert!(!executor.store().is_fetching(&key()));
    }

    #[tokio::test]
    async fn test_fresh_cache_skips_fetch() {
        let executor = QueryExecutor::new(CacheStore::new());
        executor.store().set(&key(), json!(["cached"]));
        let calls = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(
                &key(),
                counting_fetch(calls.clone(), Ok(vec![])),
                QueryOptions::default().stale_time(Duration::from_secs(60)),
            )
            .await;
        assert_eq!(result.data, Some(vec!["cached".to_string()]));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_query_returns_placeholder_without_fetching() {
        let executor = QueryExecutor::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(
                &key(),
                counting_fetch(calls.clone(), Ok(vec!["x".into()])),
                QueryOptions::default().enabled(false).placeholder(Vec::new()),
            )
            .await;
        assert_eq!(result.data, Some(Vec::new()));
        assert!(result.error.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(executor.store().get(&key()).is_none());
    }

    #[tokio::test]
    async fn test_failure_keeps_cached_data() {
        tokio::time::pause();
        let executor = QueryExecutor::new(CacheStore::new());
        executor.store().set(&key(), json!(["old"]));
        let calls = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(
                &key(),
                counting_fetch(calls.clone(), Err(SyncError::Network("down".into()))),
                QueryOptions::default().retry(RetryPolicy::default().with_retries(2)),
            )
            .await;
        assert_eq!(result.data, Some(vec!["old".to_string()]));
        assert_eq!(result.error, Some(SyncError::Network("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(executor.store().get(&key()), Some(json!(["old"])));
    }

    #[tokio::test]
    async fn test_concurrent_executions_share_one_fetch() {
        let executor = QueryExecutor::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let slow_fetch = |calls: Arc<AtomicU32>, name: &'static str| {
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::task::yield_now().await;
                    Ok::<_, SyncError>(vec![name.to_string()])
                }
            }
        };
        let key = key();
        let (a, b) = futures::join!(
            executor.execute(&key, slow_fetch(calls.clone(), "P1"), QueryOptions::default()),
            executor.execute(&key, slow_fetch(calls.clone(), "P2"), QueryOptions::default()),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.data, Some(vec!["P1".to_string()]));
        assert_eq!(a.data, b.data);
    }

    #[tokio::test]
    async fn test_failed_first_fetch_leaves_no_entry() {
        let executor = QueryExecutor::new(CacheStore::new());
        let calls = Arc::new(AtomicU32::new(0));
        let result = executor
            .execute(
                &key(),
                counting_fetch(calls, Err(SyncError::remote("nope"))),
                QueryOptions::<Vec<String>>::default().retry(RetryPolicy::none()),
            )
            .await;
        assert!(result.data.is_none());
        assert!(result.is_error());
        assert!(executor.store().is_empty());
    }
}
