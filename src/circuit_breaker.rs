// =============================================================================
// circuit_breaker.rs — THE "STOP POKING THAT SITE" GUARDIAN
// =============================================================================
//
// Some auction sites decide, around scan number twelve, that we are a bot.
// (We are.) After that every request is a 403 or a challenge page and
// hammering them every fifteen minutes only makes it worse.
//
// So each host gets its own circuit breaker:
//
// - Closed: requests flow, failures are counted.
// - Open: N consecutive failures happened. The URL is skipped and an error is
//   recorded for it instead, until the cooldown runs out.
// - HalfOpen: cooldown expired, one scan is allowed through to test the water.
//
// Breakers live in a shared registry so the metrics endpoint can read them
// while the scan loop is busy tripping them.
// =============================================================================

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    /// Consecutive failures before the circuit trips.
    pub failure_threshold: u32,
    /// How long a tripped circuit stays open.
    pub reset_timeout: Duration,
    /// Successes needed in half-open before closing again.
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(600),
            success_threshold: 1,
        }
    }
}

struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_state_change: Instant,
    total_trips: u64,
}

pub struct CircuitBreaker {
    name: String,
    inner: RwLock<CircuitBreakerInner>,
    settings: BreakerSettings,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                last_state_change: Instant::now(),
                total_trips: 0,
            }),
            settings,
        }
    }

    /// May a request go out right now? Moves Open → HalfOpen once the
    /// cooldown has elapsed.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_time
                    .map(|t| t.elapsed() >= self.settings.reset_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    info!(
                        host = %self.name,
                        "Circuit breaker OPEN -> HALF_OPEN — giving the site another chance"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.success_count = 0;
                    inner.last_state_change = Instant::now();
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.write();

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.settings.success_threshold {
                    info!(host = %self.name, "Circuit breaker HALF_OPEN -> CLOSED — site is talking to us again");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_state_change = Instant::now();
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.write();
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.settings.failure_threshold {
                    warn!(
                        host = %self.name,
                        failures = inner.failure_count,
                        "Circuit breaker TRIPPED — CLOSED -> OPEN"
                    );
                    inner.state = CircuitState::Open;
                    inner.total_trips += 1;
                    inner.last_state_change = Instant::now();
                }
            }
            CircuitState::HalfOpen => {
                warn!(host = %self.name, "Test request failed in HALF_OPEN — back to OPEN");
                inner.state = CircuitState::Open;
                inner.failure_count = self.settings.failure_threshold;
                inner.total_trips += 1;
                inner.last_state_change = Instant::now();
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.read();
        CircuitBreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            total_trips: inner.total_trips,
            time_in_current_state_secs: inner.last_state_change.elapsed().as_secs(),
        }
    }
}

/// One breaker per host, created on first use.
pub struct HostBreakers {
    settings: BreakerSettings,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl HostBreakers {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            settings,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn for_host(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock();
        Arc::clone(
            breakers
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(host, self.settings))),
        )
    }

    /// Sorted by host name so the metrics output is stable.
    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut out: Vec<_> = self.breakers.lock().values().map(|b| b.snapshot()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn total_trips(&self) -> u64 {
        self.breakers
            .lock()
            .values()
            .map(|b| b.snapshot().total_trips)
            .sum()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub total_trips: u64,
    pub time_in_current_state_secs: u64,
}
