//! Planning session manager
//!
//! In-memory, TTL-bounded sessions bridging the planner preview and
//! crawl execution. A session is created when a plan is requested,
//! completes with a blueprint, and is either confirmed into a crawl job,
//! cancelled, or expires. Confirmation checks an option fingerprint
//! captured at creation so a stale confirm is rejected.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{CrawlError, Result};
use crate::events::{PlanSessionStatus, TelemetryBus, TelemetryEvent};

use super::types::Plan;

/// Default session lifetime
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// The finished preview handed to the user
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PlanBlueprint {
    pub plan: Plan,
    /// Hub URLs the plan seeds into the queue on confirmation
    pub seeded_hubs: Vec<String>,
    pub summary: serde_json::Value,
}

/// A live planning session
#[derive(Debug, Clone)]
pub struct PlanningSession {
    pub session_id: String,
    pub domain: String,
    pub status: PlanSessionStatus,
    pub options: serde_json::Value,
    pub options_fingerprint: u64,
    pub blueprint: Option<PlanBlueprint>,
    pub stage_events: Vec<(String, serde_json::Value)>,
    pub created_at: Instant,
    pub expires_at: Instant,
}

/// What a successful confirm hands back
#[derive(Debug, Clone)]
pub struct ConfirmedSession {
    pub session_id: String,
    pub options: serde_json::Value,
    pub blueprint: PlanBlueprint,
}

/// Deterministic fingerprint of an options document
#[must_use]
pub fn options_fingerprint(options: &serde_json::Value) -> u64 {
    // serde_json serialises maps in key order, so equal documents hash
    // equal regardless of how the caller built them.
    xxh3_64(options.to_string().as_bytes())
}

/// Process-wide session map with per-entry locking
pub struct SessionManager {
    sessions: DashMap<String, Arc<Mutex<PlanningSession>>>,
    active_by_domain: DashMap<String, String>,
    ttl: Duration,
    allow_concurrent_per_domain: bool,
    bus: Arc<TelemetryBus>,
}

impl SessionManager {
    #[must_use]
    pub fn new(bus: Arc<TelemetryBus>) -> Self {
        Self::with_ttl(bus, DEFAULT_SESSION_TTL, false)
    }

    #[must_use]
    pub fn with_ttl(bus: Arc<TelemetryBus>, ttl: Duration, allow_concurrent_per_domain: bool) -> Self {
        Self {
            sessions: DashMap::new(),
            active_by_domain: DashMap::new(),
            ttl,
            allow_concurrent_per_domain,
            bus,
        }
    }

    /// Open a session for a domain.
    ///
    /// Fails with `PreconditionFailed` while another session for the same
    /// domain is still active, unless concurrent sessions are allowed.
    pub fn create(&self, domain: &str, options: serde_json::Value) -> Result<String> {
        self.sweep_expired();
        if !self.allow_concurrent_per_domain {
            if let Some(existing) = self.active_by_domain.get(domain) {
                return Err(CrawlError::precondition(
                    "session-active",
                    format!("domain {domain} already has active session {}", existing.value()),
                ));
            }
        }
        let session_id = uuid::Uuid::new_v4().to_string();
        let now = Instant::now();
        let session = PlanningSession {
            session_id: session_id.clone(),
            domain: domain.to_string(),
            status: PlanSessionStatus::Planning,
            options_fingerprint: options_fingerprint(&options),
            options,
            blueprint: None,
            stage_events: Vec::new(),
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        self.active_by_domain
            .insert(domain.to_string(), session_id.clone());
        self.bus.publish(TelemetryEvent::plan_status(
            session_id.clone(),
            PlanSessionStatus::Planning,
        ));
        Ok(session_id)
    }

    /// Record a planner sub-stage and mirror it onto the bus
    pub fn append_stage_event(
        &self,
        session_id: &str,
        stage: &str,
        detail: serde_json::Value,
    ) -> Result<()> {
        let session = self.entry(session_id)?;
        let mut guard = session.lock();
        guard.stage_events.push((stage.to_string(), detail.clone()));
        self.bus
            .publish(TelemetryEvent::plan_stage(session_id, stage, detail));
        Ok(())
    }

    /// Attach the finished blueprint; session becomes `ready`
    pub fn complete_with_blueprint(&self, session_id: &str, blueprint: PlanBlueprint) -> Result<()> {
        let session = self.entry(session_id)?;
        let mut guard = session.lock();
        if guard.status != PlanSessionStatus::Planning {
            return Err(CrawlError::precondition(
                "session-not-planning",
                format!("session {session_id} is {:?}", guard.status),
            ));
        }
        let preview = serde_json::to_value(&blueprint)
            .map_err(|e| CrawlError::Internal(format!("encode blueprint: {e}")))?;
        guard.blueprint = Some(blueprint);
        guard.status = PlanSessionStatus::Ready;
        drop(guard);
        self.bus
            .publish(TelemetryEvent::plan_status(session_id, PlanSessionStatus::Ready));
        self.bus
            .publish(TelemetryEvent::plan_preview(session_id, preview));
        Ok(())
    }

    /// Mark a session failed
    pub fn fail(&self, session_id: &str, reason: &str) -> Result<()> {
        let session = self.entry(session_id)?;
        let mut guard = session.lock();
        guard.status = PlanSessionStatus::Failed;
        let domain = guard.domain.clone();
        drop(guard);
        self.release_domain(&domain, session_id);
        self.bus
            .publish(TelemetryEvent::plan_status(session_id, PlanSessionStatus::Failed));
        self.bus.publish(TelemetryEvent::problem(
            None,
            crate::events::ProblemSeverity::Warning,
            "plan-failed",
            reason,
            None,
        ));
        Ok(())
    }

    /// Confirm a ready session. Atomic: the per-entry lock makes confirm
    /// and cancel mutually exclusive, and a session can be confirmed
    /// exactly once.
    pub fn confirm(&self, session_id: &str, fingerprint: u64) -> Result<ConfirmedSession> {
        let session = self.entry(session_id)?;
        let mut guard = session.lock();
        if Instant::now() >= guard.expires_at {
            guard.status = PlanSessionStatus::Expired;
            return Err(CrawlError::precondition(
                "session-expired",
                format!("session {session_id} expired"),
            ));
        }
        match guard.status {
            PlanSessionStatus::Ready => {}
            PlanSessionStatus::Confirmed => {
                return Err(CrawlError::precondition(
                    "session-confirmed",
                    format!("session {session_id} was already confirmed"),
                ));
            }
            other => {
                return Err(CrawlError::precondition(
                    "session-not-ready",
                    format!("session {session_id} is {other:?}"),
                ));
            }
        }
        if guard.options_fingerprint != fingerprint {
            return Err(CrawlError::precondition(
                "stale-confirmation",
                "session options changed since preview".to_string(),
            ));
        }
        let Some(blueprint) = guard.blueprint.clone() else {
            return Err(CrawlError::Internal(format!(
                "ready session {session_id} has no blueprint"
            )));
        };
        guard.status = PlanSessionStatus::Confirmed;
        let confirmed = ConfirmedSession {
            session_id: session_id.to_string(),
            options: guard.options.clone(),
            blueprint,
        };
        let domain = guard.domain.clone();
        drop(guard);
        self.release_domain(&domain, session_id);
        self.bus.publish(TelemetryEvent::plan_status(
            session_id,
            PlanSessionStatus::Confirmed,
        ));
        Ok(confirmed)
    }

    /// Cancel a session; confirmed sessions cannot be cancelled
    pub fn cancel(&self, session_id: &str) -> Result<()> {
        let session = self.entry(session_id)?;
        let mut guard = session.lock();
        if guard.status == PlanSessionStatus::Confirmed {
            return Err(CrawlError::precondition(
                "session-confirmed",
                format!("session {session_id} was already confirmed"),
            ));
        }
        guard.status = PlanSessionStatus::Cancelled;
        let domain = guard.domain.clone();
        drop(guard);
        self.release_domain(&domain, session_id);
        self.bus.publish(TelemetryEvent::plan_status(
            session_id,
            PlanSessionStatus::Cancelled,
        ));
        Ok(())
    }

    /// Snapshot a session without holding its lock
    pub fn get_read_only(&self, session_id: &str) -> Result<PlanningSession> {
        let session = self.entry(session_id)?;
        let guard = session.lock();
        Ok(guard.clone())
    }

    /// Expire sessions past their TTL, emitting `plan-status: expired`
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut expired: Vec<(String, String)> = Vec::new();
        for entry in self.sessions.iter() {
            let mut guard = entry.value().lock();
            if now >= guard.expires_at
                && matches!(
                    guard.status,
                    PlanSessionStatus::Planning | PlanSessionStatus::Ready
                )
            {
                guard.status = PlanSessionStatus::Expired;
                expired.push((guard.session_id.clone(), guard.domain.clone()));
            }
        }
        for (session_id, domain) in expired {
            self.release_domain(&domain, &session_id);
            self.bus.publish(TelemetryEvent::plan_status(
                session_id,
                PlanSessionStatus::Expired,
            ));
        }
    }

    /// Number of tracked sessions (all states)
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when no sessions are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn entry(&self, session_id: &str) -> Result<Arc<Mutex<PlanningSession>>> {
        self.sessions
            .get(session_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CrawlError::InvalidInput(format!("unknown session {session_id}")))
    }

    fn release_domain(&self, domain: &str, session_id: &str) {
        if let Some(entry) = self.active_by_domain.get(domain) {
            if entry.value() == session_id {
                drop(entry);
                self.active_by_domain.remove(domain);
            }
        }
    }
}
