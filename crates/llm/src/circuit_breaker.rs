use common::CircuitBreakerConfigBase;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::errors::ErrorClass;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing, rejecting requests
    HalfOpen, // One probe allowed through
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    /// Per-provider cool-down overrides
    pub recovery_overrides: HashMap<String, Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from_base(&CircuitBreakerConfigBase::default())
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            recovery_overrides: HashMap::new(),
        }
    }

    pub fn from_base(base: &CircuitBreakerConfigBase) -> Self {
        Self::new(
            base.failure_threshold,
            Duration::from_secs(base.recovery_timeout_secs),
        )
    }

    pub fn with_recovery_override(mut self, key: impl Into<String>, timeout: Duration) -> Self {
        self.recovery_overrides.insert(key.into(), timeout);
        self
    }

    pub fn recovery_timeout_for(&self, key: &str) -> Duration {
        self.recovery_overrides
            .get(key)
            .copied()
            .unwrap_or(self.recovery_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Denied,
    Normal,
    Probe,
}

/// State machine for a single provider.
#[derive(Debug, Clone)]
struct ProviderCircuit {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
    trips: u32,
}

impl ProviderCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
            probe_in_flight: false,
            trips: 0,
        }
    }

    fn admit(&mut self, key: &str, now: Instant, recovery_timeout: Duration) -> Admission {
        match self.state {
            CircuitState::Closed => Admission::Normal,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .map_or(true, |last| now.saturating_duration_since(last) >= recovery_timeout);

                if cooled_down {
                    info!(provider = key, "Circuit breaker moving to HALF_OPEN, admitting probe");
                    self.state = CircuitState::HalfOpen;
                    self.probe_in_flight = true;
                    Admission::Probe
                } else {
                    debug!(provider = key, "Circuit breaker OPEN, blocking request");
                    Admission::Denied
                }
            }
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    debug!(provider = key, "Circuit breaker HALF_OPEN, probe already in flight");
                    Admission::Denied
                } else {
                    self.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    fn on_success(&mut self, key: &str) {
        match self.state {
            CircuitState::Closed => {
                if self.consecutive_failures > 0 {
                    debug!(
                        provider = key,
                        failures = self.consecutive_failures,
                        "Circuit breaker resetting failure count"
                    );
                    self.consecutive_failures = 0;
                }
            }
            CircuitState::HalfOpen => {
                info!(provider = key, "Circuit breaker probe succeeded, moving to CLOSED");
                self.state = CircuitState::Closed;
                self.consecutive_failures = 0;
                self.last_failure = None;
                self.probe_in_flight = false;
            }
            CircuitState::Open => {
                // Late success from a request admitted before the circuit opened
                warn!(provider = key, "Circuit breaker success recorded in OPEN state");
            }
        }
    }

    fn on_failure(&mut self, key: &str, now: Instant, threshold: u32, trip_now: bool, probe: bool) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);

        match self.state {
            CircuitState::Closed => {
                if trip_now || self.consecutive_failures >= threshold {
                    warn!(
                        provider = key,
                        failures = self.consecutive_failures,
                        immediate = trip_now,
                        "Circuit breaker OPENING"
                    );
                    self.state = CircuitState::Open;
                    self.trips += 1;
                } else {
                    debug!(
                        provider = key,
                        failures = self.consecutive_failures,
                        threshold,
                        "Circuit breaker recorded failure"
                    );
                }
            }
            CircuitState::HalfOpen if !probe => {
                // Late failure from a request admitted before the circuit opened
                debug!(provider = key, "Circuit breaker failure outside the probe, probe still in flight");
            }
            CircuitState::HalfOpen => {
                warn!(provider = key, "Circuit breaker probe failed, back to OPEN");
                self.state = CircuitState::Open;
                self.probe_in_flight = false;
                self.trips += 1;
            }
            CircuitState::Open => {
                debug!(provider = key, "Circuit breaker additional failure in OPEN state");
            }
        }
    }
}

/// Point-in-time view of one provider's circuit.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub trips: u32,
    /// Remaining cool-down while OPEN
    pub retry_in: Option<Duration>,
}

impl CircuitSnapshot {
    pub fn describe(&self) -> String {
        match self.state {
            CircuitState::Closed => format!("CLOSED (failures: {})", self.consecutive_failures),
            CircuitState::Open => match self.retry_in {
                Some(remaining) => format!("OPEN (recovery in: {:?}, trips: {})", remaining, self.trips),
                None => format!("OPEN (trips: {})", self.trips),
            },
            CircuitState::HalfOpen => "HALF_OPEN (probe in flight)".to_string(),
        }
    }
}

/// Per-provider circuit breakers behind one lock.
///
/// Entries are created on the first recorded failure; an unknown key is
/// treated as CLOSED.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    circuits: Mutex<HashMap<String, ProviderCircuit>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn circuits(&self) -> MutexGuard<'_, HashMap<String, ProviderCircuit>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self, key: &str) -> Admission {
        let now = self.clock.now();
        let recovery_timeout = self.config.recovery_timeout_for(key);
        match self.circuits().get_mut(key) {
            Some(circuit) => circuit.admit(key, now, recovery_timeout),
            None => Admission::Normal,
        }
    }

    /// Whether a request to `key` may proceed.
    ///
    /// In HALF_OPEN exactly one caller gets `true` until that probe is
    /// resolved by `record_success`, `record_failure` or `release_probe`.
    pub fn allow(&self, key: &str) -> bool {
        self.admit(key) != Admission::Denied
    }

    /// Like [`allow`](Self::allow) but returns a permit that releases a
    /// half-open probe slot if dropped unresolved.
    pub fn acquire(&self, key: &str) -> Option<CircuitPermit<'_>> {
        match self.admit(key) {
            Admission::Denied => None,
            admission => Some(CircuitPermit {
                breaker: self,
                key: key.to_string(),
                probe: admission == Admission::Probe,
                settled: false,
            }),
        }
    }

    pub fn record_success(&self, key: &str) {
        if let Some(circuit) = self.circuits().get_mut(key) {
            circuit.on_success(key);
        }
    }

    pub fn record_failure(&self, key: &str) {
        self.record_error(key, ErrorClass::Unknown);
    }

    /// Record a failed call, applying the class-specific breaker rules.
    ///
    /// In HALF_OPEN the caller is taken to be the probe admitted by
    /// [`allow`](Self::allow). Classes that do not count leave the probe
    /// slot untouched; use [`release_probe`](Self::release_probe) for those.
    pub fn record_error(&self, key: &str, class: ErrorClass) {
        self.fail(key, class, true);
    }

    fn fail(&self, key: &str, class: ErrorClass, probe: bool) {
        if !class.counts_toward_breaker() {
            return;
        }

        let now = self.clock.now();
        let threshold = self.config.failure_threshold;
        self.circuits()
            .entry(key.to_string())
            .or_insert_with(ProviderCircuit::new)
            .on_failure(key, now, threshold, class.trips_immediately(), probe);
    }

    /// Give back a half-open probe slot without judging provider health.
    pub fn release_probe(&self, key: &str) {
        if let Some(circuit) = self.circuits().get_mut(key) {
            if circuit.state == CircuitState::HalfOpen && circuit.probe_in_flight {
                debug!(provider = key, "Circuit breaker probe released without a verdict");
                circuit.probe_in_flight = false;
            }
        }
    }

    pub fn state(&self, key: &str) -> CircuitState {
        self.circuits()
            .get(key)
            .map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn failure_count(&self, key: &str) -> u32 {
        self.circuits()
            .get(key)
            .map_or(0, |c| c.consecutive_failures)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = self.clock.now();
        let circuits = self.circuits();
        let ordered: BTreeMap<&String, &ProviderCircuit> = circuits.iter().collect();

        ordered
            .into_iter()
            .map(|(key, circuit)| {
                let retry_in = match (circuit.state, circuit.last_failure) {
                    (CircuitState::Open, Some(last)) => Some(
                        self.config
                            .recovery_timeout_for(key)
                            .saturating_sub(now.saturating_duration_since(last)),
                    ),
                    _ => None,
                };

                CircuitSnapshot {
                    key: key.clone(),
                    state: circuit.state,
                    consecutive_failures: circuit.consecutive_failures,
                    trips: circuit.trips,
                    retry_in,
                }
            })
            .collect()
    }
}

/// Admission to call one provider.
///
/// Dropping an unresolved probe permit (for example when the caller's
/// future is cancelled) counts as neither success nor failure.
#[derive(Debug)]
pub struct CircuitPermit<'a> {
    breaker: &'a CircuitBreaker,
    key: String,
    probe: bool,
    settled: bool,
}

impl CircuitPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success(&self.key);
    }

    /// Only the probe holder can resolve or release the half-open slot.
    pub fn record_error(&mut self, class: ErrorClass) {
        if class.counts_toward_breaker() {
            self.breaker.fail(&self.key, class, self.probe);
        } else if self.probe {
            self.breaker.release_probe(&self.key);
        }
        if self.probe {
            self.settled = true;
        }
    }
}

impl Drop for CircuitPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe(&self.key);
        }
    }
}
