//! Per-host request pacing
//!
//! Each host carries its own minimum interval, exponential backoff and
//! in-flight cap. The scheduler asks `next_allowed` before dequeuing;
//! workers take a scoped lease that guarantees the end-of-request
//! bookkeeping runs on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub mod robots;

pub use robots::RobotsGate;

/// Outcome of one paced request, fed back into backoff state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceOutcome {
    /// 2xx/3xx or an acceptable 4xx; decays backoff
    Success,
    /// 429/503 or network error; doubles backoff. Carries a server-supplied
    /// `Retry-After` if one was present.
    Throttled { retry_after: Option<Duration> },
    /// Request abandoned before completion; leaves pacing state untouched
    Aborted,
}

/// Tunables for a fresh host entry
#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub min_interval: Duration,
    pub backoff_ceiling: Duration,
    pub max_in_flight: usize,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            backoff_ceiling: Duration::from_secs(300),
            max_in_flight: 1,
        }
    }
}

#[derive(Debug)]
struct HostPacing {
    last_start: Option<Instant>,
    min_interval: Duration,
    current_backoff: Duration,
    consecutive_errors: u32,
    retry_after_until: Option<Instant>,
}

struct HostState {
    pacing: Mutex<HostPacing>,
    in_flight: Arc<Semaphore>,
}

/// Per-host pacer; one instance per crawl job
pub struct HostPacer {
    hosts: DashMap<String, Arc<HostState>>,
    config: PacerConfig,
}

impl HostPacer {
    /// Create a pacer with the given defaults
    #[must_use]
    pub fn new(config: PacerConfig) -> Self {
        Self {
            hosts: DashMap::new(),
            config,
        }
    }

    fn host_state(&self, host: &str) -> Arc<HostState> {
        Arc::clone(
            self.hosts
                .entry(host.to_string())
                .or_insert_with(|| {
                    Arc::new(HostState {
                        pacing: Mutex::new(HostPacing {
                            last_start: None,
                            min_interval: self.config.min_interval,
                            current_backoff: Duration::ZERO,
                            consecutive_errors: 0,
                            retry_after_until: None,
                        }),
                        in_flight: Arc::new(Semaphore::new(self.config.max_in_flight.max(1))),
                    })
                })
                .value(),
        )
    }

    /// Earliest instant a new request to `host` may start.
    ///
    /// `max(min_interval, current_backoff)` after the previous start,
    /// further deferred by any `Retry-After` directive.
    #[must_use]
    pub fn next_allowed(&self, host: &str) -> Instant {
        let state = self.host_state(host);
        let pacing = state.pacing.lock();
        let now = Instant::now();
        let gap = pacing.min_interval.max(pacing.current_backoff);
        let mut allowed = match pacing.last_start {
            Some(last) => last + gap,
            None => now,
        };
        if let Some(until) = pacing.retry_after_until {
            allowed = allowed.max(until);
        }
        allowed.max(now)
    }

    /// Whether a request to `host` may start right now (interval elapsed
    /// and an in-flight slot free). Used by the queue's ready scan.
    #[must_use]
    pub fn is_ready(&self, host: &str, now: Instant) -> bool {
        let state = self.host_state(host);
        if state.in_flight.available_permits() == 0 {
            return false;
        }
        self.next_allowed(host) <= now
    }

    /// Record the start of a request without a lease. Prefer
    /// [`scoped_lease`](Self::scoped_lease).
    pub fn begin(&self, host: &str) {
        let state = self.host_state(host);
        state.pacing.lock().last_start = Some(Instant::now());
    }

    /// Record the end of a request without a lease
    pub fn end(&self, host: &str, outcome: PaceOutcome) {
        let state = self.host_state(host);
        Self::apply_outcome(&state, &self.config, outcome);
    }

    /// Acquire a scoped lease: waits for an in-flight slot and for the
    /// host's interval, then marks the start. The returned lease feeds the
    /// outcome back on `complete`; dropping it without completing counts
    /// as `Aborted`.
    pub async fn scoped_lease(&self, host: &str) -> PacerLease {
        let state = self.host_state(host);
        // The semaphore is never closed; a closed-semaphore error would
        // mean the state entry was dropped while borrowed, which DashMap
        // prevents.
        let permit = loop {
            match Arc::clone(&state.in_flight).acquire_owned().await {
                Ok(p) => break p,
                Err(_) => {
                    log::error!("in-flight semaphore for {host} closed unexpectedly");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        };

        loop {
            let wait = {
                let mut pacing = state.pacing.lock();
                let now = Instant::now();
                let gap = pacing.min_interval.max(pacing.current_backoff);
                let mut allowed = match pacing.last_start {
                    Some(last) => last + gap,
                    None => now,
                };
                if let Some(until) = pacing.retry_after_until {
                    allowed = allowed.max(until);
                }
                if allowed <= now {
                    // Start is claimed under the lock so concurrent permit
                    // holders on a cap>1 host cannot start inside the gap.
                    pacing.last_start = Some(now);
                    None
                } else {
                    Some(allowed - now)
                }
            };
            match wait {
                None => break,
                Some(d) => tokio::time::sleep(d).await,
            }
        }

        PacerLease {
            state,
            config: self.config.clone(),
            _permit: permit,
            completed: false,
        }
    }

    /// Consecutive error count for a host (observability)
    #[must_use]
    pub fn consecutive_errors(&self, host: &str) -> u32 {
        self.host_state(host).pacing.lock().consecutive_errors
    }

    /// Current backoff for a host
    #[must_use]
    pub fn current_backoff(&self, host: &str) -> Duration {
        self.host_state(host).pacing.lock().current_backoff
    }

    fn apply_outcome(state: &HostState, config: &PacerConfig, outcome: PaceOutcome) {
        let mut pacing = state.pacing.lock();
        match outcome {
            PaceOutcome::Success => {
                pacing.consecutive_errors = 0;
                pacing.retry_after_until = None;
                // Geometric decay back toward the floor.
                pacing.current_backoff = if pacing.current_backoff <= pacing.min_interval {
                    Duration::ZERO
                } else {
                    pacing.current_backoff / 2
                };
            }
            PaceOutcome::Throttled { retry_after } => {
                pacing.consecutive_errors += 1;
                let doubled = if pacing.current_backoff.is_zero() {
                    pacing.min_interval.max(Duration::from_millis(250))
                } else {
                    pacing.current_backoff * 2
                };
                pacing.current_backoff = doubled.min(config.backoff_ceiling);
                if let Some(ra) = retry_after {
                    // Retry-After is respected exactly when it exceeds the
                    // computed wait.
                    let until = Instant::now() + ra;
                    pacing.retry_after_until = Some(match pacing.retry_after_until {
                        Some(existing) => existing.max(until),
                        None => until,
                    });
                }
            }
            PaceOutcome::Aborted => {}
        }
    }
}

/// Scoped acquisition over one host; guarantees end-of-request bookkeeping
pub struct PacerLease {
    state: Arc<HostState>,
    config: PacerConfig,
    _permit: OwnedSemaphorePermit,
    completed: bool,
}

impl PacerLease {
    /// Feed the request outcome back and release the lease
    pub fn complete(mut self, outcome: PaceOutcome) {
        HostPacer::apply_outcome(&self.state, &self.config, outcome);
        self.completed = true;
    }
}

impl Drop for PacerLease {
    fn drop(&mut self) {
        if !self.completed {
            HostPacer::apply_outcome(&self.state, &self.config, PaceOutcome::Aborted);
        }
    }
}
