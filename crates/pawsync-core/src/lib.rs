//! pawsync-core - client-side synchronization layer for pet-care data.
//!
//! Keeps locally cached, paginated views of server-owned collections (pets,
//! expenses, budgets, health records, events, feeding schedules) and applies
//! user mutations to them before the server confirms.
//!
//! - `cache`: cache keys, the shared store, on-disk persistence
//! - `query`: cached reads with dedup, retry and conditional execution
//! - `mutation`: optimistic create/update/delete with rollback
//! - `pagination`: incremental list loading per filter
//! - `status`: rate-limited, circuit-broken status polling
//! - `api`: the remote service contract and its HTTP implementation
//! - `models`: wire types of every resource
//! - `context`: the composition root wiring all of the above

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod models;
pub mod mutation;
pub mod pagination;
pub mod query;
pub mod status;

pub use api::{HttpService, ListQuery, Page, ResourceService};
pub use cache::{CacheKey, CachePersister, CacheStore, KeyFilter, ResourceType, Scope};
pub use config::Config;
pub use context::SyncContext;
pub use error::SyncError;
pub use models::{Resource, Validate};
pub use mutation::MutationEngine;
pub use pagination::{PageOutcome, PaginatedQuery};
pub use query::{QueryExecutor, QueryOptions, QueryResult, RetryPolicy};
pub use status::{RefreshOutcome, StatusConfig, StatusRefresher};
