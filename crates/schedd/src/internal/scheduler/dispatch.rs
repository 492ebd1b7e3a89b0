//! One scheduling epoch.
//!
//! The epoch splits the snapshot, computes tickets and then walks the pending
//! jobs from the highest priority down. Every job is matched against the
//! current ledger, so each decision sees the bookings of all previous ones.
//! Starts and reservations are debited immediately; the resulting orders are
//! flushed to the coordinator in batches.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::internal::cluster::config::SchedulerConfig;
use crate::internal::cluster::job::{GrantedSlots, Job, JobId, JobIdx, TaskNumber, TaskState};
use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotIndex};
use crate::internal::cluster::Timestamp;
use crate::internal::common::Map;
use crate::internal::common::index::IndexVec;
use crate::internal::scheduler::assign::request::{ResolvedRequest, resolve_request};
use crate::internal::scheduler::assign::{
    Assignment, MatchContext, MatchMode, MatchOutcome, match_job,
};
use crate::internal::scheduler::category::CategoryCache;
use crate::internal::scheduler::ledger::ResourceLedger;
use crate::internal::scheduler::messages::{SchedulerMessage, Severity};
use crate::internal::scheduler::orders::{Coordinator, Order, OrderBuilder};
use crate::internal::scheduler::split::{
    JobBucket, JobSplit, QueueSplit, split_jobs, threshold_orders,
};
use crate::internal::scheduler::tickets::{
    TicketContext, TicketPolicy, is_priority_ordered, sort_pending,
};

/// Counters of one epoch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub pending_jobs: u32,
    pub match_attempts: u32,
    pub reservation_attempts: u32,
    pub category_skips: u32,
    pub started: u32,
    pub reservations: u32,
    pub not_dispatched: u32,
    pub invalid_requests: u32,
    pub immediate_removed: u32,
    pub immediate_rollbacks: u32,
    pub flushes: u32,
}

/// Future booking made for a job that could not start now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub job_id: JobId,
    pub task: TaskNumber,
    pub start: Timestamp,
    pub end: Timestamp,
    pub granted: Vec<GrantedSlots>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EpochSummary {
    pub stats: DispatchStats,
    pub reservations: Vec<ReservationRecord>,
    /// The epoch was cancelled before all pending jobs were looked at.
    pub cancelled: bool,
}

#[derive(Default)]
struct JobDispatch {
    started: Vec<Assignment>,
    /// Not every offered task was started.
    failed: bool,
}

/// Everything threaded through the dispatch loop.
struct EpochState<'a> {
    snapshot: &'a ClusterSnapshot,
    index: &'a SnapshotIndex,
    config: &'a SchedulerConfig,
    ledger: ResourceLedger,
    queues: QueueSplit,
    cache: CategoryCache,
    builder: OrderBuilder,
    stats: DispatchStats,
    reservations: Vec<ReservationRecord>,
    reservations_left: u32,
    messages: Vec<SchedulerMessage>,
    pending_tasks: Map<JobIdx, Vec<TaskNumber>>,
    /// Running or suspended tasks per job, including starts of this epoch.
    job_active: Map<JobIdx, u32>,
    owner_running: Map<String, u32>,
}

/// Runs one scheduling epoch over `snapshot`.
///
/// All orders are sent to `coordinator`; the last batch is always marked with
/// `has_more == false`, also when the epoch is cancelled or fails. Only a violated
/// ledger invariant is returned as an error. An inconsistent snapshot dispatches
/// nothing and is reported as a critical message.
pub fn dispatch_epoch(
    mut snapshot: ClusterSnapshot,
    policy: &mut impl TicketPolicy,
    coordinator: &mut impl Coordinator,
    cancel: &CancellationToken,
) -> crate::Result<EpochSummary> {
    let index = match SnapshotIndex::new(&snapshot) {
        Ok(index) => index,
        Err(error) => {
            log::error!("Skipping epoch: {error}");
            coordinator.post_message(SchedulerMessage::epoch(
                Severity::Critical,
                format!("invalid cluster snapshot: {error}"),
            ));
            let flushes = OrderBuilder::new(snapshot.config.flush_interval).finish(coordinator);
            return Ok(EpochSummary {
                stats: DispatchStats {
                    flushes,
                    ..Default::default()
                },
                ..Default::default()
            });
        }
    };
    let split = trace_time!("scheduler", "split", {
        split_jobs(
            &snapshot,
            &index,
            snapshot.config.max_pending_tasks_per_job,
            snapshot.config.max_user_jobs,
        )
    });
    let mut jobs = std::mem::take(&mut snapshot.jobs);
    let snapshot = snapshot;

    let ledger = ResourceLedger::init(&snapshot, &index, &jobs);
    let queues = QueueSplit::new(&snapshot, &index, &ledger);
    let mut state = EpochState {
        snapshot: &snapshot,
        index: &index,
        config: &snapshot.config,
        ledger,
        messages: queues.messages(&snapshot),
        queues,
        cache: CategoryCache::new(snapshot.config.category_cache),
        builder: OrderBuilder::new(snapshot.config.flush_interval),
        stats: DispatchStats::default(),
        reservations: Vec::new(),
        reservations_left: snapshot.config.max_reservations,
        pending_tasks: Map::new(),
        job_active: Map::new(),
        owner_running: split.running_per_owner().clone(),
    };
    state.report_skipped_jobs(&split, &jobs);
    state
        .builder
        .extend(threshold_orders(&snapshot, &state.queues, &jobs));

    let running: Vec<JobIdx> = split.active();
    let mut pending: Vec<JobIdx> = split.bucket(JobBucket::Pending).to_vec();
    let ticket_orders = trace_time!("scheduler", "tickets", {
        policy.compute_tickets(
            &TicketContext {
                now: snapshot.now,
                config: &snapshot.config.tickets,
            },
            &mut jobs,
            &running,
            split.bucket(JobBucket::Finished),
            &pending,
        )
    });
    state.builder.extend(ticket_orders);
    sort_pending(&jobs, &mut pending);
    debug_assert!(is_priority_ordered(&jobs, &pending));

    for job_idx in &pending {
        let job = &jobs[*job_idx];
        let tasks = split.pending_tasks(*job_idx).to_vec();
        state.cache.register(*job_idx, job, tasks.len() as u32);
        state
            .job_active
            .insert(*job_idx, job.active_tasks().count() as u32);
        state.pending_tasks.insert(*job_idx, tasks);
    }
    state.stats.pending_jobs = pending.len() as u32;

    let mut pending: VecDeque<JobIdx> = pending.into();
    let result = trace_time!("scheduler", "dispatch", {
        state.run(&mut pending, &mut jobs, policy, coordinator, cancel)
    });
    let cancelled = match result {
        Ok(cancelled) => cancelled,
        Err(error) => {
            log::error!("Dispatching aborted: {error}");
            state.post_messages(coordinator);
            coordinator.post_message(SchedulerMessage::epoch(
                Severity::Critical,
                format!("dispatching aborted: {error}"),
            ));
            state.builder.finish(coordinator);
            return Err(error);
        }
    };

    for (job_idx, job) in jobs.iter_enumerated() {
        let bucket = split.bucket_of(job_idx);
        if job.tickets != 0.0
            && !matches!(
                bucket,
                JobBucket::Pending | JobBucket::Running | JobBucket::Suspended
            )
        {
            state
                .builder
                .push(Order::ClearPriorityInfo { job_id: job.id });
        }
    }

    let EpochState {
        builder,
        mut stats,
        reservations,
        messages,
        ..
    } = state;
    for message in messages {
        coordinator.post_message(message);
    }
    stats.flushes = builder.finish(coordinator);

    log::debug!("Epoch finished: {stats:?}");
    Ok(EpochSummary {
        stats,
        reservations,
        cancelled,
    })
}

impl EpochState<'_> {
    /// Returns `true` if the loop was cancelled.
    fn run(
        &mut self,
        pending: &mut VecDeque<JobIdx>,
        jobs: &mut IndexVec<JobIdx, Job>,
        policy: &mut impl TicketPolicy,
        coordinator: &mut impl Coordinator,
        cancel: &CancellationToken,
    ) -> crate::Result<bool> {
        while let Some(job_idx) = pending.pop_front() {
            if cancel.is_cancelled() {
                log::info!("Epoch cancelled, {} pending jobs left", pending.len() + 1);
                self.messages.push(SchedulerMessage::epoch(
                    Severity::Warning,
                    "scheduling epoch cancelled",
                ));
                return Ok(true);
            }
            let job = &jobs[job_idx];
            let dispatch = self.dispatch_job(job_idx, job, coordinator)?;

            if job.immediate && dispatch.failed {
                self.withdraw_immediate(job_idx, job, &dispatch.started);
                continue;
            }
            if dispatch.started.is_empty() {
                self.stats.not_dispatched += 1;
                continue;
            }
            if policy.on_dispatched(job_idx, jobs, pending.make_contiguous()) {
                sort_pending(jobs, pending.make_contiguous());
            }
            debug_assert!(is_priority_ordered(jobs, pending.make_contiguous()));
            self.builder.flush_job_starts_if_due(coordinator);
        }
        Ok(false)
    }

    fn dispatch_job(
        &mut self,
        job_idx: JobIdx,
        job: &Job,
        coordinator: &mut impl Coordinator,
    ) -> crate::Result<JobDispatch> {
        let mut result = JobDispatch::default();
        let tasks = self.pending_tasks.remove(&job_idx).unwrap_or_default();
        let request = match resolve_request(job, self.snapshot, self.index) {
            Ok(request) => request,
            Err(error) => {
                self.stats.invalid_requests += 1;
                self.job_message(job, Severity::Warning, format!("invalid request: {error}"));
                result.failed = true;
                return Ok(result);
            }
        };
        let may_reserve = job.reserve
            && self.config.max_reservations > 0
            && !job.immediate
            && request.ar.is_none();
        let burst = job.immediate && tasks.len() > 1;

        for task in tasks {
            if let Some(reason) = self.limit_reached(job_idx, job) {
                self.job_message(job, Severity::Info, reason);
                result.failed = true;
                break;
            }
            if self.cache.is_category_rejected_ever(job_idx) {
                self.stats.category_skips += 1;
                self.job_message(
                    job,
                    Severity::Info,
                    "a job with the same requirements could not be dispatched",
                );
                result.failed = true;
                break;
            }

            let skip_now = self.cache.is_category_rejected_for_now(job_idx);
            if skip_now {
                self.stats.category_skips += 1;
            } else {
                match self.try_match(job_idx, job, &request, task, MatchMode::Now) {
                    MatchOutcome::Ok(assignment) => {
                        self.start_task(job_idx, job, assignment, &mut result)?;
                        if !burst {
                            self.builder.flush_job_starts_if_due(coordinator);
                        }
                        continue;
                    }
                    MatchOutcome::NeverThisJob(reason) => {
                        self.job_message(job, Severity::Info, format!("cannot run: {reason}"));
                        result.failed = true;
                        break;
                    }
                    MatchOutcome::NeverThisCategory => {
                        self.cache
                            .reject_category(job_idx, may_reserve && self.reservations_left > 0);
                    }
                }
            }

            result.failed = true;
            // a job is either started or reserved within one epoch
            if may_reserve && self.reservations_left > 0 && result.started.is_empty() {
                self.reserve_task(job_idx, job, &request, task)?;
            } else {
                self.job_message(
                    job,
                    Severity::Info,
                    "cannot run now, no queue instance has enough free resources",
                );
            }
            break;
        }
        Ok(result)
    }

    fn try_match(
        &mut self,
        job_idx: JobIdx,
        job: &Job,
        request: &ResolvedRequest,
        task: TaskNumber,
        mode: MatchMode,
    ) -> MatchOutcome {
        let queues = match (mode, request.ar) {
            (MatchMode::Now, None) => self.queues.available(),
            (MatchMode::Now, Some(_)) => self.queues.ar_candidates(),
            (MatchMode::Reservation, _) => self.queues.reservation_candidates(),
        };
        match mode {
            MatchMode::Now => self.stats.match_attempts += 1,
            MatchMode::Reservation => self.stats.reservation_attempts += 1,
        }
        let ctx = MatchContext {
            snapshot: self.snapshot,
            index: self.index,
            ledger: &self.ledger,
            now: self.snapshot.now,
            default_duration: self.config.default_duration,
        };
        match_job(&ctx, job_idx, job, request, task, &queues, mode)
    }

    fn limit_reached(&self, job_idx: JobIdx, job: &Job) -> Option<String> {
        let active = self.job_active.get(&job_idx).copied().unwrap_or(0);
        if let Some(max) = job.max_running_tasks {
            if active >= max {
                return Some(format!("limit of {max} running array tasks reached"));
            }
        }
        let max_user_jobs = self.config.max_user_jobs;
        if max_user_jobs > 0
            && active == 0
            && self.owner_running.get(&job.owner).copied().unwrap_or(0) >= max_user_jobs
        {
            return Some(format!(
                "user {} reached the limit of {max_user_jobs} running jobs",
                job.owner
            ));
        }
        None
    }

    fn start_task(
        &mut self,
        job_idx: JobIdx,
        job: &Job,
        assignment: Assignment,
        result: &mut JobDispatch,
    ) -> crate::Result<()> {
        self.ledger.debit(&assignment)?;
        log::debug!(
            "Starting task {}.{} on {}",
            job.id,
            assignment.task,
            assignment
                .gdil
                .iter()
                .map(|g| format!("{}:{}", g.queue_name, g.slots))
                .collect::<Vec<_>>()
                .join(",")
        );
        self.builder.push(Order::StartJob {
            job_id: job.id,
            task: assignment.task,
            start_time: assignment.start,
            tickets: job.tickets,
            granted: assignment.granted_slots(),
            pe: assignment.pe.map(|pe| self.snapshot.pes[pe].name.clone()),
            checkpoint: assignment.checkpoint.clone(),
        });
        self.stats.started += 1;
        self.cache.release_task(job_idx);
        let active = self.job_active.entry(job_idx).or_insert(0);
        if *active == 0 {
            *self.owner_running.entry(job.owner.clone()).or_insert(0) += 1;
        }
        *active += 1;
        self.refresh_queues();
        result.started.push(assignment);
        Ok(())
    }

    fn reserve_task(
        &mut self,
        job_idx: JobIdx,
        job: &Job,
        request: &ResolvedRequest,
        task: TaskNumber,
    ) -> crate::Result<()> {
        match self.try_match(job_idx, job, request, task, MatchMode::Reservation) {
            MatchOutcome::Ok(assignment) => {
                self.ledger.debit(&assignment)?;
                self.reservations_left -= 1;
                self.stats.reservations += 1;
                let end = assignment.end();
                let granted = assignment.granted_slots();
                self.messages.push(SchedulerMessage::reservation(
                    job.id,
                    format!(
                        "reserved {} slots from {} to {} on {}",
                        assignment.slots,
                        assignment.start,
                        end,
                        granted
                            .iter()
                            .map(|g| g.queue.as_str())
                            .collect::<Vec<_>>()
                            .join(",")
                    ),
                ));
                self.reservations.push(ReservationRecord {
                    job_id: job.id,
                    task,
                    start: assignment.start,
                    end,
                    granted,
                });
                self.refresh_queues();
            }
            MatchOutcome::NeverThisJob(reason) => {
                self.job_message(job, Severity::Info, format!("cannot reserve: {reason}"));
            }
            MatchOutcome::NeverThisCategory => {
                self.cache.reject_category(job_idx, false);
                self.job_message(
                    job,
                    Severity::Info,
                    "cannot run now and no reservation is possible",
                );
            }
        }
        Ok(())
    }

    /// Immediate jobs that cannot run completely are withdrawn, including the
    /// starts made for them in this epoch.
    fn withdraw_immediate(&mut self, job_idx: JobIdx, job: &Job, started: &[Assignment]) {
        if !started.is_empty() {
            let retracted = self.builder.retract_job_starts(job.id);
            debug_assert_eq!(retracted, started.len());
            for assignment in started.iter().rev() {
                self.ledger.credit(assignment);
            }
            self.stats.started -= started.len() as u32;
            self.stats.immediate_rollbacks += 1;
            let active = self.job_active.entry(job_idx).or_insert(0);
            *active = active.saturating_sub(started.len() as u32);
            if *active == 0 {
                if let Some(count) = self.owner_running.get_mut(&job.owner) {
                    *count = count.saturating_sub(1);
                }
            }
            self.cache.clear();
            self.refresh_queues();
            log::debug!(
                "Immediate job {} rolled back, {} starts retracted",
                job.id,
                retracted
            );
        }
        self.stats.immediate_removed += 1;
        self.job_message(
            job,
            Severity::Info,
            "immediate job cannot run now and is removed",
        );
        for task in job.tasks.iter().filter(|t| {
            t.holds_resources() || t.state == TaskState::Pending
        }) {
            self.builder.push(Order::RemoveImmediateJob {
                job_id: job.id,
                task: task.number,
            });
        }
    }

    fn refresh_queues(&mut self) {
        let newly_disabled = self
            .queues
            .refresh(self.snapshot, self.index, &self.ledger);
        for (queue, reason) in newly_disabled {
            self.messages.push(SchedulerMessage::queue(
                self.snapshot.queues[queue].full_name(),
                reason.description(),
            ));
        }
    }

    fn job_message(&mut self, job: &Job, severity: Severity, text: impl Into<String>) {
        let message = SchedulerMessage::job(job.id, severity, text);
        log::debug!("{message}");
        self.messages.push(message);
    }

    fn report_skipped_jobs(&mut self, split: &JobSplit, jobs: &IndexVec<JobIdx, Job>) {
        let reasons = [
            (JobBucket::Hold, "job is on hold"),
            (
                JobBucket::WaitingForPredecessor,
                "job waits for its predecessors",
            ),
            (JobBucket::WaitingForTime, "job waits for its start time"),
            (
                JobBucket::Excluded,
                "owner reached the limit of running jobs",
            ),
            (
                JobBucket::NotStarted,
                "array job reached its limit of running tasks",
            ),
        ];
        for (bucket, text) in reasons {
            for job_idx in split.bucket(bucket) {
                self.job_message(&jobs[*job_idx], Severity::Info, text);
            }
        }
    }

    fn post_messages(&mut self, coordinator: &mut impl Coordinator) {
        for message in self.messages.drain(..) {
            coordinator.post_message(message);
        }
    }
}

