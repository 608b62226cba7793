//! Local caching module.
//!
//! - `key`: deterministic hierarchical cache keys and key filters
//! - `store`: the shared cache store with subscriptions, invalidation and
//!   optimistic edit/restore support
//! - `persist`: on-disk snapshot of the store for offline start

pub mod key;
pub mod persist;
pub mod store;

pub use key::{list_filter_matches, CacheKey, KeyError, KeyFilter, ResourceType, Scope};
pub use persist::CachePersister;
pub use store::{
    CacheEvent, CacheEventKind, CacheStore, EntryInfo, RestoreOutcome, Snapshot, Subscription,
};
