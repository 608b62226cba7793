//! Query execution: cached reads with in-flight dedup, retry with capped
//! exponential backoff, and conditional (dependent) queries.

pub mod executor;
pub mod retry;

pub use executor::{QueryExecutor, QueryOptions, QueryResult};
pub use retry::RetryPolicy;
