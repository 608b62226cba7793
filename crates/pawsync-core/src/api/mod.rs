//! Remote resource service module.
//!
//! The sync layer talks to the backend only through the `ResourceService`
//! trait. `HttpService` is the production implementation; tests supply
//! in-memory fakes.

pub mod client;
pub mod envelope;
pub mod error;
pub mod service;

pub use client::HttpService;
pub use envelope::{ApiResponse, Page, PageMeta};
pub use error::ApiError;
pub use service::{ListQuery, ResourceService};
