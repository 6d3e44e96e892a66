//! A trip-and-cooldown guard protecting the Tool Client from hammering a
//! dead automation server (spec.md §4.5: "retries transport-level errors
//! only, bounded"). The teacher's circuit breaker
//! (`architehc-selfware` `src/supervision/circuit_breaker.rs`) models a full
//! closed/open/half-open recovery protocol with a separate success
//! threshold for the probe phase; this crate only needs to stop calling a
//! server that is clearly down and start again after a cooldown, so the
//! half-open probing state is dropped — one failed call after the cooldown
//! just re-trips it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::warn;

pub struct CircuitBreaker {
    failures: AtomicU32,
    tripped_at: RwLock<Option<Instant>>,
    config: CircuitBreakerConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive transport failures before the guard trips.
    pub failure_threshold: u32,
    /// How long a trip lasts before the next call is allowed through again.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone)]
pub enum CircuitBreakerError<E> {
    CircuitOpen,
    OperationFailed(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen => write!(f, "circuit breaker is open"),
            Self::OperationFailed(e) => write!(f, "operation failed: {e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CircuitBreakerError<E> {}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            failures: AtomicU32::new(0),
            tripped_at: RwLock::new(None),
            config,
        }
    }

    /// True while the cooldown from a trip is still in effect. Clears the
    /// trip (and failure count) once the cooldown has elapsed, letting the
    /// next call through as a fresh attempt.
    async fn is_open(&self) -> bool {
        let Some(tripped_at) = *self.tripped_at.read().await else {
            return false;
        };
        if tripped_at.elapsed() < self.config.cooldown {
            return true;
        }
        *self.tripped_at.write().await = None;
        self.failures.store(0, Ordering::SeqCst);
        false
    }

    pub fn current_state(&self) -> CircuitState {
        if self.failures.load(Ordering::Relaxed) >= self.config.failure_threshold {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Execute `operation`. Rejects fast with
    /// [`CircuitBreakerError::CircuitOpen`] while tripped and in cooldown.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if self.is_open().await {
            warn!("circuit breaker open, rejecting tool call");
            return Err(CircuitBreakerError::CircuitOpen);
        }

        match operation().await {
            Ok(result) => {
                self.failures.store(0, Ordering::SeqCst);
                Ok(result)
            }
            Err(e) => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    warn!(failures, "failure threshold reached, tripping circuit breaker");
                    *self.tripped_at.write().await = Some(Instant::now());
                }
                Err(CircuitBreakerError::OperationFailed(e))
            }
        }
    }
}
