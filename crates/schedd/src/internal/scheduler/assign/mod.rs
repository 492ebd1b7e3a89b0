//! Matching of one job (task) against queue instances.
//!
//! Matching is greedy and deterministic: queues are tried in the order given
//! by the caller and the first feasible binding wins. In [`MatchMode::Now`] the
//! job has to fit right away, in [`MatchMode::Reservation`] the earliest future
//! start is searched.

pub mod parallel;
pub mod request;
pub mod sequential;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::internal::cluster::ar::ArIdx;
use crate::internal::cluster::host::HostIdx;
use crate::internal::cluster::job::{GrantedSlots, Job, JobId, JobIdx, TaskNumber};
use crate::internal::cluster::pe::PeIdx;
use crate::internal::cluster::queue::QueueIdx;
use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotIndex};
use crate::internal::cluster::Timestamp;
use crate::internal::scheduler::assign::request::ResolvedRequest;
use crate::internal::scheduler::ledger::{Booking, LedgerKey, ResourceLedger};
use crate::resources::SLOTS_RESOURCE_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    Now,
    Reservation,
}

/// Slots bound to a job on one queue instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedQueue {
    pub queue: QueueIdx,
    pub queue_name: String,
    pub host: HostIdx,
    pub host_name: String,
    pub slots: u32,
}

impl GrantedQueue {
    pub fn new(
        snapshot: &ClusterSnapshot,
        index: &SnapshotIndex,
        queue: QueueIdx,
        slots: u32,
    ) -> Self {
        let host = index.host_of(queue);
        GrantedQueue {
            queue,
            queue_name: snapshot.queues[queue].full_name(),
            host,
            host_name: snapshot.hosts[host].name.clone(),
            slots,
        }
    }
}

pub type Gdil = SmallVec<[GrantedQueue; 2]>;

/// A successful match: where, when and what gets booked.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub job_id: JobId,
    pub job_idx: JobIdx,
    pub task: TaskNumber,
    /// Master queue first.
    pub gdil: Gdil,
    pub pe: Option<PeIdx>,
    pub slots: u32,
    pub checkpoint: Option<String>,
    pub start: Timestamp,
    pub duration: u64,
    pub is_reservation: bool,
    pub ar: Option<ArIdx>,
    pub bookings: Vec<Booking>,
}

impl Assignment {
    #[inline]
    pub fn end(&self) -> Timestamp {
        self.start.saturating_add(self.duration)
    }

    pub fn granted_slots(&self) -> Vec<GrantedSlots> {
        self.gdil
            .iter()
            .map(|g| GrantedSlots::new(g.queue_name.clone(), g.slots))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Ok(Assignment),
    /// The job cannot run in this epoch, jobs of the same category might.
    NeverThisJob(String),
    /// No job of this category can be dispatched in this mode in this epoch.
    NeverThisCategory,
}

/// What the matchers read; the ledger reflects all previous decisions of the epoch.
pub struct MatchContext<'a> {
    pub snapshot: &'a ClusterSnapshot,
    pub index: &'a SnapshotIndex,
    pub ledger: &'a ResourceLedger,
    pub now: Timestamp,
    pub default_duration: u64,
}

/// Found binding, handed from the sequential/parallel matchers to [`match_job`].
pub(crate) struct Binding {
    pub gdil: Gdil,
    pub bookings: Vec<Booking>,
    pub start: Timestamp,
}

pub(crate) enum SearchResult {
    Found(Binding),
    NeverThisJob(String),
    NoFit,
}

pub fn match_job(
    ctx: &MatchContext,
    job_idx: JobIdx,
    job: &Job,
    request: &ResolvedRequest,
    task: TaskNumber,
    queues: &[QueueIdx],
    mode: MatchMode,
) -> MatchOutcome {
    let declared = job.request.duration;
    let mut duration = declared.unwrap_or(ctx.default_duration);
    if duration == 0 {
        if mode == MatchMode::Reservation {
            return MatchOutcome::NeverThisJob(
                "a reservation needs a non-zero run time".to_string(),
            );
        }
        duration = 1;
    }

    if let Some(ar_idx) = request.ar {
        let ar = &ctx.snapshot.ars[ar_idx];
        if mode == MatchMode::Reservation {
            return MatchOutcome::NeverThisJob(format!(
                "job runs in advance reservation {} and cannot reserve",
                ar.id
            ));
        }
        if !ar.is_accessible_by(&job.owner) {
            return MatchOutcome::NeverThisJob(format!(
                "no access to advance reservation {}",
                ar.id
            ));
        }
        if !ar.is_active_at(ctx.now) {
            return MatchOutcome::NeverThisJob(format!(
                "advance reservation {} is not active",
                ar.id
            ));
        }
        if declared.is_some_and(|d| ctx.now.saturating_add(d) > ar.end) {
            return MatchOutcome::NeverThisJob(format!(
                "run time exceeds the end of advance reservation {}",
                ar.id
            ));
        }
        duration = duration.min(ar.end - ctx.now);
    }

    let eligible: Vec<QueueIdx> = queues
        .iter()
        .copied()
        .filter(|q| queue_is_eligible(ctx, job, request, *q))
        .collect();
    if eligible.is_empty() {
        log::debug!("No eligible queue for job {}", job.id);
        return MatchOutcome::NeverThisCategory;
    }

    let result = match &request.pe {
        None => sequential::match_sequential(ctx, job, request, &eligible, mode, duration),
        Some(pe) => parallel::match_parallel(ctx, job, request, pe, &eligible, mode, duration),
    };
    match result {
        SearchResult::Found(binding) => {
            let slots = binding.gdil.iter().map(|g| g.slots).sum();
            MatchOutcome::Ok(Assignment {
                job_id: job.id,
                job_idx,
                task,
                gdil: binding.gdil,
                pe: request.pe.as_ref().map(|pe| pe.pe),
                slots,
                checkpoint: job.request.checkpoint.clone(),
                start: binding.start,
                duration,
                is_reservation: mode == MatchMode::Reservation,
                ar: request.ar,
                bookings: binding.bookings,
            })
        }
        SearchResult::NeverThisJob(reason) => MatchOutcome::NeverThisJob(reason),
        SearchResult::NoFit => MatchOutcome::NeverThisCategory,
    }
}

/// Checks that do not depend on current usage.
pub fn queue_is_eligible(
    ctx: &MatchContext,
    job: &Job,
    request: &ResolvedRequest,
    queue_idx: QueueIdx,
) -> bool {
    let queue = &ctx.snapshot.queues[queue_idx];
    let host_idx = ctx.index.host_of(queue_idx);
    let host = &ctx.snapshot.hosts[host_idx];
    let job_request = &job.request;

    if !queue.is_accessible_by(&job.owner) {
        return false;
    }
    if !job_request.queues.is_empty() && !job_request.queues.iter().any(|n| queue.matches_name(n))
    {
        return false;
    }
    if !job_request.hosts.is_empty() && !job_request.hosts.iter().any(|h| *h == queue.host) {
        return false;
    }
    if !job_request
        .attributes
        .iter()
        .all(|(name, value)| host.attributes.get(name) == Some(value))
    {
        return false;
    }
    if let Some(pe) = &job_request.pe {
        if !queue.pe_list.iter().any(|p| *p == pe.name) {
            return false;
        }
    }
    if let Some(ckpt) = &job_request.checkpoint {
        if !queue.ckpt_list.iter().any(|c| c == ckpt) {
            return false;
        }
    }
    let ledger = ctx.ledger;
    for consumable in request.explicit_consumables() {
        let r = consumable.resource;
        if !ledger.is_defined(&LedgerKey::Queue(queue_idx, r))
            && !ledger.is_defined(&LedgerKey::Host(host_idx, r))
            && !ledger.is_defined(&LedgerKey::Global(r))
        {
            return false;
        }
    }
    for (name, amount) in &request.load_requests {
        if !host
            .load_value(name)
            .is_some_and(|value| value >= amount.as_f64())
        {
            return false;
        }
    }
    if let Some(ar) = request.ar {
        if !ledger.is_defined(&LedgerKey::ArSlots(ar, queue_idx)) {
            return false;
        }
    }
    true
}

/// Slot capacity of a queue instance for this job (the AR share for AR jobs).
pub(crate) fn slot_capacity(ctx: &MatchContext, request: &ResolvedRequest, queue: QueueIdx) -> u32 {
    let key = match request.ar {
        Some(ar) => LedgerKey::ArSlots(ar, queue),
        None => LedgerKey::Queue(queue, SLOTS_RESOURCE_ID),
    };
    ctx.ledger
        .capacity(&key)
        .map(|c| c.units() as u32)
        .unwrap_or(0)
}
