//! Deployment controller: the per-router confirmed-commit lifecycle.
//!
//! ```text
//! no-pending --apply ok--> pending --confirm--> confirmed --> no-pending
//!                             |
//!                             +--deadline elapses--> rolled_back --> no-pending
//! apply, lost ack --> unknown  (operator attention; superseded by a later apply)
//! ```
//!
//! The device enacts the rollback. Deadlines kept here are advisory and only
//! decide what gets reported and whether a confirm is worth sending.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::commit::{AuditEvent, AuditRecord, PendingCommit};
use crate::config::{Inventory, RouterTarget};
use crate::credentials::CredentialProvider;
use crate::error::{PlsyncError, Result};
use crate::junos::MAX_ROLLBACK_MINUTES;
use crate::render::RenderedConfiguration;
use crate::store::{PendingCommitStore, Reservation};
use crate::transport::{with_session, DeviceTransport, TransportFailure};
use crate::types::{CommitState, ErrorKind};

pub const DEFAULT_ROLLBACK_MINUTES: u32 = 3;
pub const DEFAULT_STALE_MARGIN_MINUTES: i64 = 60;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ---------------------------------------------------------------------------
// Outcomes and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmTarget {
    /// Management address or hostname.
    Router(String),
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmOutcome {
    NothingPending,
    Confirmed { commit: PendingCommit },
    /// The window had closed; no confirm was sent.
    RolledBack { commit: PendingCommit },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Applied { commit: PendingCommit },
    Confirmed { commit: PendingCommit },
    RolledBack { commit: PendingCommit },
    NothingPending,
    Failed { kind: ErrorKind, message: String },
}

impl Outcome {
    pub fn failed(err: &PlsyncError) -> Self {
        Outcome::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn needs_attention(&self) -> bool {
        matches!(self, Outcome::Failed { kind, .. } if kind.needs_attention())
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Confirmed { .. } => "confirmed",
            Outcome::RolledBack { .. } => "rolled_back",
            Outcome::NothingPending => "nothing_pending",
            Outcome::Failed { kind, .. } if kind.needs_attention() => "unknown",
            Outcome::Failed { .. } => "failed",
        }
    }
}

impl From<ConfirmOutcome> for Outcome {
    fn from(o: ConfirmOutcome) -> Self {
        match o {
            ConfirmOutcome::NothingPending => Outcome::NothingPending,
            ConfirmOutcome::Confirmed { commit } => Outcome::Confirmed { commit },
            ConfirmOutcome::RolledBack { commit } => Outcome::RolledBack { commit },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterOutcome {
    pub router: String,
    pub hostname: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Per-router results of a batch operation, in job order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub outcomes: Vec<RouterOutcome>,
}

impl BatchReport {
    pub fn push(&mut self, router: &RouterTarget, outcome: Outcome) {
        self.outcomes.push(RouterOutcome {
            router: router.id(),
            hostname: router.hostname.clone(),
            outcome,
        });
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| o.outcome.is_failure())
    }

    pub fn needs_attention(&self) -> impl Iterator<Item = &RouterOutcome> {
        self.outcomes.iter().filter(|o| o.outcome.needs_attention())
    }

    pub fn get(&self, router: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.router == router)
            .map(|o| &o.outcome)
    }
}

/// One router's share of a batch apply.
#[derive(Debug, Clone)]
pub struct ApplyJob {
    pub router: RouterTarget,
    pub rendered: RenderedConfiguration,
}

// ---------------------------------------------------------------------------
// DeploymentController
// ---------------------------------------------------------------------------

pub struct DeploymentController {
    store: PendingCommitStore,
    transport: Arc<dyn DeviceTransport>,
    credentials: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    default_rollback_minutes: u32,
    stale_margin: Duration,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeploymentController {
    pub fn new(
        store: PendingCommitStore,
        transport: Arc<dyn DeviceTransport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            store,
            transport,
            credentials,
            clock: Arc::new(SystemClock),
            default_rollback_minutes: DEFAULT_ROLLBACK_MINUTES,
            stale_margin: Duration::minutes(DEFAULT_STALE_MARGIN_MINUTES),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn default_rollback_minutes(mut self, minutes: u32) -> Self {
        self.default_rollback_minutes = minutes;
        self
    }

    pub fn stale_margin(mut self, margin: Duration) -> Self {
        self.stale_margin = margin;
        self
    }

    pub fn store(&self) -> &PendingCommitStore {
        &self.store
    }

    /// Mutex serializing apply/confirm/sweep on one router.
    fn router_lock(&self, router: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(router.to_string()).or_default().clone()
    }

    fn audit(
        &self,
        commit: &PendingCommit,
        event: AuditEvent,
        state: CommitState,
        message: Option<String>,
    ) -> Result<()> {
        let record = AuditRecord::new(commit, event, state, self.clock.now(), message);
        self.store.append_audit(&record)
    }

    // -----------------------------------------------------------------------
    // apply
    // -----------------------------------------------------------------------

    /// Send `rendered` to `router` as a confirmed commit with a rollback
    /// window of `rollback_minutes` (or the controller default).
    pub fn apply(
        &self,
        router: &RouterTarget,
        rendered: &RenderedConfiguration,
        rollback_minutes: Option<u32>,
    ) -> Result<PendingCommit> {
        let id = router.id();
        let minutes = rollback_minutes.unwrap_or(self.default_rollback_minutes);
        if !(1..=MAX_ROLLBACK_MINUTES).contains(&minutes) {
            return Err(PlsyncError::Config(format!(
                "rollback window must be 1..={MAX_ROLLBACK_MINUTES} minutes, got {minutes}"
            )));
        }
        let commands = rendered.device_commands();
        if commands.is_empty() {
            return Err(PlsyncError::Config(format!(
                "nothing to apply to {id}: no policy rendered"
            )));
        }

        let lock = self.router_lock(&id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let previous = self.clear_for_apply(&id)?;
        let credentials = self.credentials.credentials_for(router)?;

        let now = self.clock.now();
        let reservation = PendingCommit::new(
            &id,
            &router.hostname,
            &rendered.digest,
            now,
            minutes,
            CommitState::Pending,
        );
        if let Reservation::Held(existing) = self.store.reserve(&reservation)? {
            return Err(PlsyncError::CommitInProgress {
                router: id,
                deadline: existing.deadline.to_rfc3339(),
            });
        }

        info!(router = %id, hostname = %router.hostname, digest = %rendered.short_digest(), minutes, "applying configuration");
        let result = with_session(self.transport.as_ref(), router, &credentials, |session| {
            session.commit_confirmed(&commands, minutes)
        });

        match result {
            Ok(_) => {
                // The window opened when the device acknowledged.
                let entry = PendingCommit::new(
                    &id,
                    &router.hostname,
                    &rendered.digest,
                    self.clock.now(),
                    minutes,
                    CommitState::Pending,
                );
                self.supersede(previous.as_ref())?;
                self.store.put(&entry)?;
                self.audit(&entry, AuditEvent::Applied, CommitState::Pending, None)?;
                info!(router = %id, deadline = %entry.deadline.to_rfc3339(), "commit confirmed; awaiting confirmation");
                Ok(entry)
            }
            Err(TransportFailure::LostAfterCommit(reason)) => {
                let mut entry = reservation;
                entry.state = CommitState::Unknown;
                self.supersede(previous.as_ref())?;
                self.store.put(&entry)?;
                self.audit(
                    &entry,
                    AuditEvent::ApplyUnknown,
                    CommitState::Unknown,
                    Some(reason.clone()),
                )?;
                error!(router = %id, %reason, "apply outcome unknown; verify the device before retrying");
                Err(PlsyncError::PartialApplyUnknown { router: id })
            }
            Err(TransportFailure::Rejected(output)) => {
                self.release(&id, previous)?;
                warn!(router = %id, %output, "device rejected the configuration");
                Err(PlsyncError::CommitRejected { router: id, output })
            }
            Err(failure) => {
                self.release(&id, previous)?;
                warn!(router = %id, %failure, "apply failed before reaching the device");
                Err(PlsyncError::Transport {
                    router: id,
                    reason: failure.to_string(),
                })
            }
        }
    }

    /// Resolve whatever entry blocks a new apply. Caller holds the router lock.
    /// An `unknown` entry is left in place and returned; it is only replaced
    /// once the new commit is known to have reached the device.
    fn clear_for_apply(&self, id: &str) -> Result<Option<PendingCommit>> {
        let Some(existing) = self.store.get(id)? else {
            return Ok(None);
        };
        let now = self.clock.now();
        let state = existing.state;
        match state {
            CommitState::Pending if !existing.deadline_elapsed(now) => {
                Err(PlsyncError::CommitInProgress {
                    router: id.to_string(),
                    deadline: existing.deadline.to_rfc3339(),
                })
            }
            CommitState::Pending => {
                warn!(router = %id, deadline = %existing.deadline.to_rfc3339(), "previous commit was never confirmed; assuming the device rolled it back");
                self.audit(
                    &existing,
                    AuditEvent::RolledBack,
                    CommitState::RolledBack,
                    Some("deadline elapsed before confirmation".into()),
                )?;
                self.store.delete(id)?;
                Ok(None)
            }
            CommitState::Unknown => {
                warn!(router = %id, digest = %existing.digest, "new apply over a commit with unknown outcome");
                Ok(Some(existing))
            }
            CommitState::Confirmed | CommitState::RolledBack => {
                self.store.delete(id)?;
                Ok(None)
            }
        }
    }

    /// The new commit reached the device, so an earlier `unknown` entry is
    /// now history.
    fn supersede(&self, previous: Option<&PendingCommit>) -> Result<()> {
        if let Some(previous) = previous {
            self.audit(
                previous,
                AuditEvent::Superseded,
                CommitState::Unknown,
                Some("replaced by a new apply".into()),
            )?;
        }
        Ok(())
    }

    /// Undo the reservation after a failed apply, putting back any `unknown`
    /// entry it displaced.
    fn release(&self, id: &str, previous: Option<PendingCommit>) -> Result<()> {
        match previous {
            Some(previous) => self.store.put(&previous),
            None => self.store.delete(id).map(|_| ()),
        }
    }

    /// Apply every job, one thread per router. A failure on one router never
    /// stops the others.
    pub fn apply_batch(&self, jobs: &[ApplyJob], rollback_minutes: Option<u32>) -> BatchReport {
        let results: Vec<Outcome> = std::thread::scope(|s| {
            let handles: Vec<_> = jobs
                .iter()
                .map(|job| {
                    s.spawn(move || {
                        match self.apply(&job.router, &job.rendered, rollback_minutes) {
                            Ok(commit) => Outcome::Applied { commit },
                            Err(e) => Outcome::failed(&e),
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| Outcome::Failed {
                        kind: ErrorKind::Internal,
                        message: "apply worker panicked".into(),
                    })
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (job, outcome) in jobs.iter().zip(results) {
            report.push(&job.router, outcome);
        }
        report
    }

    // -----------------------------------------------------------------------
    // confirm
    // -----------------------------------------------------------------------

    /// Confirm the pending commit on one router or on every router with an
    /// entry. Routers are looked up in `inventory` first, then in the store,
    /// so a router dropped from the policy file can still be confirmed.
    pub fn confirm(&self, target: &ConfirmTarget, inventory: &Inventory) -> Result<BatchReport> {
        let routers: Vec<RouterTarget> = match target {
            ConfirmTarget::Router(key) => match self.resolve_router(key, inventory)? {
                Some(router) => vec![router],
                None => {
                    let mut report = BatchReport::default();
                    report.outcomes.push(RouterOutcome {
                        router: key.clone(),
                        hostname: String::new(),
                        outcome: Outcome::NothingPending,
                    });
                    return Ok(report);
                }
            },
            ConfirmTarget::All => {
                let mut routers = Vec::new();
                for entry in self.store.list()? {
                    routers.push(router_for_entry(&entry, inventory)?);
                }
                routers
            }
        };

        let results: Vec<Outcome> = std::thread::scope(|s| {
            let handles: Vec<_> = routers
                .iter()
                .map(|router| {
                    s.spawn(move || match self.confirm_router(router) {
                        Ok(outcome) => outcome.into(),
                        Err(e) => Outcome::failed(&e),
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| Outcome::Failed {
                        kind: ErrorKind::Internal,
                        message: "confirm worker panicked".into(),
                    })
                })
                .collect()
        });

        let mut report = BatchReport::default();
        for (router, outcome) in routers.iter().zip(results) {
            report.push(router, outcome);
        }
        Ok(report)
    }

    fn resolve_router(&self, key: &str, inventory: &Inventory) -> Result<Option<RouterTarget>> {
        if let Some(router) = inventory.find(key) {
            return Ok(Some(router.clone()));
        }
        let entry = self
            .store
            .list()?
            .into_iter()
            .find(|e| e.router == key || e.hostname == key);
        match entry {
            Some(entry) => Ok(Some(router_for_entry(&entry, inventory)?)),
            None => Ok(None),
        }
    }

    /// Store key for `key`, which may be an address or a hostname from the
    /// policy file or from a stored entry. Unknown keys are returned as given.
    pub fn router_id_for(&self, key: &str, inventory: &Inventory) -> Result<String> {
        if let Some(router) = inventory.find(key) {
            return Ok(router.id());
        }
        let entry = self
            .store
            .list()?
            .into_iter()
            .find(|e| e.router == key || e.hostname == key);
        Ok(entry.map_or_else(|| key.to_string(), |e| e.router))
    }

    /// Confirm one router. Idempotent: with nothing pending this is a no-op.
    pub fn confirm_router(&self, router: &RouterTarget) -> Result<ConfirmOutcome> {
        let id = router.id();
        let lock = self.router_lock(&id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(entry) = self.store.get(&id)? else {
            info!(router = %id, "nothing pending");
            return Ok(ConfirmOutcome::NothingPending);
        };
        let now = self.clock.now();
        let state = entry.state;

        match state {
            CommitState::Confirmed | CommitState::RolledBack => {
                self.store.delete(&id)?;
                return Ok(ConfirmOutcome::NothingPending);
            }
            CommitState::Unknown if entry.deadline_elapsed(now) => {
                // Whether it ever applied is still unknown; leave it for an operator.
                warn!(router = %id, "apply outcome unknown and window closed; verify on the device");
                return Err(PlsyncError::PartialApplyUnknown { router: id });
            }
            CommitState::Pending if entry.deadline_elapsed(now) => {
                warn!(
                    router = %id,
                    deadline = %entry.deadline.to_rfc3339(),
                    "rollback window already closed; not sending confirm, treating as rolled back"
                );
                self.audit(
                    &entry,
                    AuditEvent::RolledBack,
                    CommitState::RolledBack,
                    Some("confirm requested after deadline".into()),
                )?;
                self.store.delete(&id)?;
                let mut commit = entry;
                commit.state = CommitState::RolledBack;
                return Ok(ConfirmOutcome::RolledBack { commit });
            }
            CommitState::Pending | CommitState::Unknown => {}
        }

        let credentials = self.credentials.credentials_for(router)?;
        info!(router = %id, digest = %entry.digest, "confirming commit");
        let result = with_session(self.transport.as_ref(), router, &credentials, |session| {
            session.confirm_commit()
        });

        match result {
            Ok(_) => {
                let message = (entry.state == CommitState::Unknown)
                    .then(|| "apply outcome was unknown; confirmation sent".to_string());
                self.audit(&entry, AuditEvent::Confirmed, CommitState::Confirmed, message)?;
                self.store.delete(&id)?;
                info!(router = %id, "commit confirmed");
                let mut commit = entry;
                commit.state = CommitState::Confirmed;
                Ok(ConfirmOutcome::Confirmed { commit })
            }
            Err(TransportFailure::LostAfterCommit(reason)) => {
                self.audit(
                    &entry,
                    AuditEvent::ConfirmUnknown,
                    entry.state,
                    Some(reason.clone()),
                )?;
                warn!(router = %id, %reason, "confirmation not acknowledged; entry kept, run confirm again");
                Err(PlsyncError::Transport {
                    router: id,
                    reason: format!("confirmation not acknowledged: {reason}"),
                })
            }
            Err(TransportFailure::Rejected(output)) => {
                Err(PlsyncError::CommitRejected { router: id, output })
            }
            Err(failure) => Err(PlsyncError::Transport {
                router: id,
                reason: failure.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // query / sweep
    // -----------------------------------------------------------------------

    /// Current entry for `router` with its effective state. Read-only.
    pub fn query(&self, router: &str) -> Result<Option<PendingCommit>> {
        let now = self.clock.now();
        Ok(self.store.get(router)?.map(|mut entry| {
            entry.state = entry.effective_state(now);
            entry
        }))
    }

    /// Every entry with its effective state. Read-only.
    pub fn query_all(&self) -> Result<Vec<PendingCommit>> {
        let now = self.clock.now();
        Ok(self
            .store
            .list()?
            .into_iter()
            .map(|mut entry| {
                entry.state = entry.effective_state(now);
                entry
            })
            .collect())
    }

    /// Purge entries past their deadline by more than the stale margin,
    /// recording each as an `unknown` outcome. Returns the purged entries.
    pub fn sweep(&self) -> Result<Vec<PendingCommit>> {
        let mut purged = Vec::new();
        for candidate in self.store.list()? {
            let lock = self.router_lock(&candidate.router);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

            let now = self.clock.now();
            let Some(entry) = self.store.get(&candidate.router)? else {
                continue;
            };
            if !entry.is_stale(now, self.stale_margin) {
                continue;
            }
            warn!(
                router = %entry.router,
                state = %entry.state,
                deadline = %entry.deadline.to_rfc3339(),
                "purging stale commit record; outcome unknown, verify on the device"
            );
            self.audit(
                &entry,
                AuditEvent::StalePurged,
                CommitState::Unknown,
                Some(format!("last known state {}", entry.state)),
            )?;
            self.store.delete(&entry.router)?;
            purged.push(entry);
        }
        Ok(purged)
    }
}

/// Session target for a stored entry: the inventory's definition when the
/// router is still listed, otherwise the recorded address on the default port.
fn router_for_entry(entry: &PendingCommit, inventory: &Inventory) -> Result<RouterTarget> {
    if let Some(router) = inventory.find(&entry.router) {
        return Ok(router.clone());
    }
    let ip: std::net::IpAddr = entry.router.parse().map_err(|_| {
        PlsyncError::Store(format!("stored router id is not an address: {}", entry.router))
    })?;
    Ok(RouterTarget::new(entry.hostname.clone(), ip))
}
