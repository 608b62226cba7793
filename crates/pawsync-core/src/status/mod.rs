//! Status refresher.
//!
//! Periodically refreshes one auxiliary status value (budget alerts, for
//! example) behind three guards checked in order: in-flight dedup, a
//! minimum interval between attempts, and a circuit breaker on consecutive
//! failures. The breaker stays open until `reset` is called; the backoff
//! delay it computes is informational.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::ResourceService;
use crate::cache::{CacheKey, CacheStore};

pub const DEFAULT_MIN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusConfig {
    pub min_interval: Duration,
    pub max_consecutive_failures: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

impl StatusConfig {
    /// Backoff after `failures` consecutive failures (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    InFlight,
    RateLimited,
    CircuitOpen,
    Refreshed,
    Failed {
        consecutive_failures: u32,
        backoff: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusRefreshState {
    pub last_attempt_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub in_flight: bool,
}

#[derive(Default)]
struct RefreshState {
    last_attempt_at: Option<Instant>,
    consecutive_failures: u32,
    in_flight: bool,
}

/// Clears the in-flight flag even if the refresh future is dropped.
struct InFlightGuard<'a>(&'a Mutex<RefreshState>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().in_flight = false;
    }
}

pub struct StatusRefresher {
    store: CacheStore,
    service: Arc<dyn ResourceService>,
    key: CacheKey,
    name: String,
    config: StatusConfig,
    state: Mutex<RefreshState>,
}

impl StatusRefresher {
    /// `name` is the derived endpoint polled; the payload is written to `key`.
    pub fn new(
        store: CacheStore,
        service: Arc<dyn ResourceService>,
        name: &str,
        key: CacheKey,
        config: StatusConfig,
    ) -> Self {
        Self {
            store,
            service,
            key,
            name: name.to_string(),
            config,
            state: Mutex::new(RefreshState::default()),
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> StatusRefreshState {
        let state = self.state.lock();
        StatusRefreshState {
            last_attempt_at: state.last_attempt_at,
            consecutive_failures: state.consecutive_failures,
            circuit_open: state.consecutive_failures >= self.config.max_consecutive_failures,
            in_flight: state.in_flight,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        self.state().circuit_open
    }

    /// Close the breaker and forget the rate-limit window.
    pub fn reset(&self) {
        *self.state.lock() = RefreshState::default();
        info!(status = %self.name, "Status refresher reset");
    }

    pub async fn refresh(&self) -> RefreshOutcome {
        {
            let mut state = self.state.lock();
            if state.in_flight {
                return RefreshOutcome::InFlight;
            }
            if let Some(at) = state.last_attempt_at {
                if at.elapsed() < self.config.min_interval {
                    return RefreshOutcome::RateLimited;
                }
            }
            if state.consecutive_failures >= self.config.max_consecutive_failures {
                debug!(status = %self.name, "Circuit open, skipping refresh");
                return RefreshOutcome::CircuitOpen;
            }
            state.in_flight = true;
            state.last_attempt_at = Some(Instant::now());
        }
        let _guard = InFlightGuard(&self.state);

        let result = self
            .service
            .derived(self.key.resource(), &self.name, self.key.qualifier())
            .await;

        match result {
            Ok(payload) => {
                self.state.lock().consecutive_failures = 0;
                self.store.set(&self.key, payload);
                debug!(status = %self.name, "Status refreshed");
                RefreshOutcome::Refreshed
            }
            Err(e) => {
                let failures = {
                    let mut state = self.state.lock();
                    state.consecutive_failures += 1;
                    state.consecutive_failures
                };
                let backoff = self.config.backoff(failures);
                warn!(
                    status = %self.name,
                    consecutive_failures = failures,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Status refresh failed"
                );
                if failures >= self.config.max_consecutive_failures {
                    warn!(status = %self.name, "Circuit open, status polling halted");
                }
                RefreshOutcome::Failed {
                    consecutive_failures: failures,
                    backoff,
                }
            }
        }
    }

    /// Refresh every `period` until the circuit opens.
    pub async fn run_polling(&self, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let outcome = self.refresh().await;
            if outcome == RefreshOutcome::CircuitOpen || self.is_circuit_open() {
                debug!(status = %self.name, "Polling stopped");
                break;
            }
        }
    }
}
