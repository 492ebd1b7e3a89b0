use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::internal::cluster::config::QueueSortMethod;
use crate::internal::cluster::host::{Host, HostIdx};
use crate::internal::cluster::job::{Job, JobIdx, JobTask, TaskNumber, TaskState};
use crate::internal::cluster::queue::{QueueIdx, QueueInstance, QueueState, Threshold};
use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotIndex};
use crate::internal::common::Map;
use crate::internal::common::index::IndexVec;
use crate::internal::scheduler::ledger::ResourceLedger;
use crate::internal::scheduler::messages::SchedulerMessage;
use crate::internal::scheduler::orders::Order;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobBucket {
    Pending,
    NotStarted,
    Running,
    Suspended,
    Hold,
    Error,
    Finished,
    WaitingForPredecessor,
    WaitingForTime,
    Excluded,
}

impl JobBucket {
    pub const ALL: [JobBucket; 10] = [
        JobBucket::Pending,
        JobBucket::NotStarted,
        JobBucket::Running,
        JobBucket::Suspended,
        JobBucket::Hold,
        JobBucket::Error,
        JobBucket::Finished,
        JobBucket::WaitingForPredecessor,
        JobBucket::WaitingForTime,
        JobBucket::Excluded,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Jobs of a snapshot partitioned into buckets, each job in exactly one.
#[derive(Debug)]
pub struct JobSplit {
    buckets: [Vec<JobIdx>; 10],
    bucket_of: IndexVec<JobIdx, JobBucket>,
    /// Tasks considered for dispatch, per pending job.
    pending_tasks: Map<JobIdx, Vec<TaskNumber>>,
    /// Jobs with running or suspended tasks, per owner.
    running_per_owner: Map<String, u32>,
}

impl JobSplit {
    pub fn bucket(&self, bucket: JobBucket) -> &[JobIdx] {
        &self.buckets[bucket.index()]
    }

    pub fn bucket_of(&self, job: JobIdx) -> JobBucket {
        self.bucket_of[job]
    }

    pub fn pending_tasks(&self, job: JobIdx) -> &[TaskNumber] {
        self.pending_tasks
            .get(&job)
            .map(|t| t.as_slice())
            .unwrap_or_default()
    }

    pub fn running_per_owner(&self) -> &Map<String, u32> {
        &self.running_per_owner
    }

    /// Jobs holding resources (running or suspended).
    pub fn active(&self) -> Vec<JobIdx> {
        let mut result: Vec<JobIdx> = self
            .bucket_of
            .iter_enumerated()
            .filter(|(_, bucket)| matches!(bucket, JobBucket::Running | JobBucket::Suspended))
            .map(|(idx, _)| idx)
            .collect();
        result.sort_unstable();
        result
    }
}

/// Partitions jobs into buckets.
///
/// `max_pending_tasks_per_job` limits how many tasks of an array job are offered
/// to the dispatcher, `max_user_jobs` (0 = unlimited) how many running jobs an owner
/// may have before its other jobs are excluded.
pub fn split_jobs(
    snapshot: &ClusterSnapshot,
    index: &SnapshotIndex,
    max_pending_tasks_per_job: u32,
    max_user_jobs: u32,
) -> JobSplit {
    let jobs = &snapshot.jobs;
    let mut running_per_owner: Map<String, u32> = Map::new();
    for job in jobs.iter() {
        if job.active_tasks().next().is_some() {
            *running_per_owner.entry(job.owner.clone()).or_insert(0) += 1;
        }
    }

    let mut buckets: [Vec<JobIdx>; 10] = Default::default();
    let mut bucket_of = IndexVec::default();
    let mut pending_tasks = Map::new();

    for (idx, job) in jobs.iter_enumerated() {
        let bucket = classify(snapshot, index, job, &running_per_owner, max_user_jobs);
        if bucket == JobBucket::Pending {
            let active = job.active_tasks().count() as u32;
            let mut limit = if max_pending_tasks_per_job == 0 {
                u32::MAX
            } else {
                max_pending_tasks_per_job
            };
            if let Some(max_running) = job.max_running_tasks {
                limit = limit.min(max_running.saturating_sub(active));
            }
            let tasks: Vec<TaskNumber> = job
                .pending_tasks()
                .take(limit as usize)
                .map(|t| t.number)
                .collect();
            pending_tasks.insert(idx, tasks);
        }
        buckets[bucket.index()].push(idx);
        bucket_of.push(bucket);
    }

    log::debug!(
        "Job split: {}",
        JobBucket::ALL
            .iter()
            .map(|b| format!("{:?}={}", b, buckets[b.index()].len()))
            .collect::<Vec<_>>()
            .join(" ")
    );

    JobSplit {
        buckets,
        bucket_of,
        pending_tasks,
        running_per_owner,
    }
}

fn classify(
    snapshot: &ClusterSnapshot,
    index: &SnapshotIndex,
    job: &Job,
    running_per_owner: &Map<String, u32>,
    max_user_jobs: u32,
) -> JobBucket {
    if job.is_finished() {
        return JobBucket::Finished;
    }
    if job.has_state(TaskState::Error) {
        return JobBucket::Error;
    }
    if job.has_state(TaskState::Pending) {
        if job.hold {
            return JobBucket::Hold;
        }
        let waiting_for_predecessor = job.predecessors.iter().any(|id| {
            index
                .job(*id)
                .is_some_and(|idx| !snapshot.jobs[idx].is_finished())
        });
        if waiting_for_predecessor {
            return JobBucket::WaitingForPredecessor;
        }
        if job.start_after.is_some_and(|t| t > snapshot.now) {
            return JobBucket::WaitingForTime;
        }
        let active = job.active_tasks().count() as u32;
        if max_user_jobs > 0
            && active == 0
            && running_per_owner.get(&job.owner).copied().unwrap_or(0) >= max_user_jobs
        {
            return JobBucket::Excluded;
        }
        if job.max_running_tasks.is_some_and(|max| active >= max) {
            return JobBucket::NotStarted;
        }
        return JobBucket::Pending;
    }
    if job.has_state(TaskState::Running) {
        JobBucket::Running
    } else {
        JobBucket::Suspended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    SuspendAlarm,
    LoadAlarm,
    Disabled,
    Suspended,
    CalendarDisabled,
    CalendarSuspended,
    Unknown,
    Error,
    NoFreeSlots,
}

impl DisableReason {
    /// The queue may become usable later; reservations may still be booked on it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DisableReason::SuspendAlarm
                | DisableReason::LoadAlarm
                | DisableReason::CalendarDisabled
                | DisableReason::CalendarSuspended
                | DisableReason::NoFreeSlots
        )
    }

    pub fn description(&self) -> &'static str {
        match self {
            DisableReason::SuspendAlarm => "dropped because it is overloaded (suspend threshold)",
            DisableReason::LoadAlarm => "dropped because it is overloaded (load threshold)",
            DisableReason::Disabled => "dropped because it is disabled",
            DisableReason::Suspended => "dropped because it is suspended",
            DisableReason::CalendarDisabled => "dropped because it is disabled by calendar",
            DisableReason::CalendarSuspended => "dropped because it is suspended by calendar",
            DisableReason::Unknown => "dropped because its state is unknown",
            DisableReason::Error => "dropped because it is in error state",
            DisableReason::NoFreeSlots => "dropped because it is full",
        }
    }
}

/// Weighted sum of load values used to sort hosts, e.g. `np_load_avg+mem_used*0.01`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadFormula {
    terms: Vec<(String, f64)>,
}

impl LoadFormula {
    pub fn parse(text: &str) -> Result<Self, String> {
        let mut terms = Vec::new();
        let mut sign = 1.0;
        let mut rest = text.trim();
        if rest.is_empty() {
            return Err("empty load formula".to_string());
        }
        loop {
            let end = rest.find(['+', '-']).unwrap_or(rest.len());
            let term = rest[..end].trim();
            let (name, weight) = match term.split_once('*') {
                Some((name, weight)) => {
                    let weight: f64 = weight
                        .trim()
                        .parse()
                        .map_err(|_| format!("invalid weight in load formula term '{term}'"))?;
                    (name.trim(), weight)
                }
                None => (term, 1.0),
            };
            if name.is_empty() || name.contains(|c: char| c.is_whitespace()) {
                return Err(format!("invalid load formula '{text}'"));
            }
            terms.push((name.to_string(), sign * weight));
            if end == rest.len() {
                break;
            }
            sign = if rest[end..].starts_with('-') { -1.0 } else { 1.0 };
            rest = &rest[end + 1..];
        }
        Ok(LoadFormula { terms })
    }

    /// `None` if the host does not report one of the values.
    pub fn evaluate(&self, ledger: &ResourceLedger, host_idx: HostIdx, host: &Host) -> Option<f64> {
        self.terms.iter().try_fold(0.0, |sum, (name, weight)| {
            ledger
                .adjusted_load(host_idx, host, name)
                .map(|value| sum + value * weight)
        })
    }
}

impl Default for LoadFormula {
    fn default() -> Self {
        LoadFormula {
            terms: vec![("np_load_avg".to_string(), 1.0)],
        }
    }
}

fn threshold_reached(value: Option<f64>, threshold: &Threshold) -> bool {
    value.is_some_and(|v| v >= threshold.value)
}

fn in_suspend_alarm(host: &Host, queue: &QueueInstance) -> bool {
    queue
        .suspend_thresholds
        .iter()
        .any(|t| threshold_reached(host.load_value(&t.name), t))
}

fn in_load_alarm(ledger: &ResourceLedger, host_idx: HostIdx, host: &Host, queue: &QueueInstance) -> bool {
    queue
        .load_thresholds
        .iter()
        .any(|t| threshold_reached(ledger.adjusted_load(host_idx, host, &t.name), t))
}

fn state_reason(state: QueueState) -> Option<DisableReason> {
    [
        (QueueState::ERROR, DisableReason::Error),
        (QueueState::UNKNOWN, DisableReason::Unknown),
        (QueueState::DISABLED, DisableReason::Disabled),
        (QueueState::SUSPENDED, DisableReason::Suspended),
        (QueueState::CAL_DISABLED, DisableReason::CalendarDisabled),
        (QueueState::CAL_SUSPENDED, DisableReason::CalendarSuspended),
    ]
    .into_iter()
    .find(|(flag, _)| state.contains(*flag))
    .map(|(_, reason)| reason)
}

/// Queue instances split into available (in dispatch order) and disabled ones.
///
/// The split is a pure function of the snapshot and the ledger; [`QueueSplit::refresh`]
/// recomputes it after the ledger changed.
#[derive(Debug)]
pub struct QueueSplit {
    sort_method: QueueSortMethod,
    formula: LoadFormula,
    /// All queues in dispatch order.
    order: Vec<QueueIdx>,
    reasons: IndexVec<QueueIdx, Option<DisableReason>>,
    /// Administrative state keeps the instance out of reservations, whatever the reason shown.
    blocked: IndexVec<QueueIdx, bool>,
}

impl QueueSplit {
    pub fn new(snapshot: &ClusterSnapshot, index: &SnapshotIndex, ledger: &ResourceLedger) -> Self {
        let formula = match LoadFormula::parse(&snapshot.config.load_formula) {
            Ok(formula) => formula,
            Err(error) => {
                log::warn!("{error}, sorting hosts by np_load_avg");
                LoadFormula::default()
            }
        };
        let mut split = QueueSplit {
            sort_method: snapshot.config.queue_sort_method,
            formula,
            order: snapshot.queues.indices().collect(),
            reasons: IndexVec::filled(None, snapshot.queues.len()),
            blocked: IndexVec::filled(false, snapshot.queues.len()),
        };
        split.refresh(snapshot, index, ledger);
        split
    }

    /// Reclassifies all queue instances; returns those that became disabled.
    pub fn refresh(
        &mut self,
        snapshot: &ClusterSnapshot,
        index: &SnapshotIndex,
        ledger: &ResourceLedger,
    ) -> Vec<(QueueIdx, DisableReason)> {
        let mut newly_disabled = Vec::new();
        for (queue_idx, queue) in snapshot.queues.iter_enumerated() {
            let host_idx = index.host_of(queue_idx);
            let host = &snapshot.hosts[host_idx];
            let state = state_reason(queue.state);
            self.blocked[queue_idx] = state.is_some_and(|r| !r.is_transient());
            let reason = if in_suspend_alarm(host, queue) {
                Some(DisableReason::SuspendAlarm)
            } else if in_load_alarm(ledger, host_idx, host, queue) {
                Some(DisableReason::LoadAlarm)
            } else if state.is_some() {
                state
            } else if ledger.free_slots_now(queue_idx) == 0 {
                Some(DisableReason::NoFreeSlots)
            } else {
                None
            };
            if let Some(reason) = reason {
                if self.reasons[queue_idx].is_none() {
                    newly_disabled.push((queue_idx, reason));
                }
            }
            self.reasons[queue_idx] = reason;
        }
        self.sort(snapshot, index, ledger);
        newly_disabled
    }

    fn sort(&mut self, snapshot: &ClusterSnapshot, index: &SnapshotIndex, ledger: &ResourceLedger) {
        let loads: IndexVec<QueueIdx, Option<f64>> = snapshot
            .queues
            .indices()
            .map(|q| {
                let host_idx = index.host_of(q);
                self.formula
                    .evaluate(ledger, host_idx, &snapshot.hosts[host_idx])
            })
            .collect();
        let load_cmp = |a: QueueIdx, b: QueueIdx| match (loads[a], loads[b]) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let seq_cmp = |a: QueueIdx, b: QueueIdx| snapshot.queues[a].seq_no.cmp(&snapshot.queues[b].seq_no);
        match self.sort_method {
            QueueSortMethod::Load => self
                .order
                .sort_by(|a, b| load_cmp(*a, *b).then(seq_cmp(*a, *b)).then(a.cmp(b))),
            QueueSortMethod::SeqNo => self
                .order
                .sort_by(|a, b| seq_cmp(*a, *b).then(load_cmp(*a, *b)).then(a.cmp(b))),
        }
    }

    pub fn reason(&self, queue: QueueIdx) -> Option<DisableReason> {
        self.reasons[queue]
    }

    /// Queues usable right now, in dispatch order.
    pub fn available(&self) -> Vec<QueueIdx> {
        self.order
            .iter()
            .copied()
            .filter(|q| self.reasons[*q].is_none())
            .collect()
    }

    pub fn disabled(&self) -> Vec<(QueueIdx, DisableReason)> {
        self.order
            .iter()
            .filter_map(|q| self.reasons[*q].map(|r| (*q, r)))
            .collect()
    }

    /// Queues searched for reservations: available ones and those disabled only temporarily.
    pub fn reservation_candidates(&self) -> Vec<QueueIdx> {
        self.order
            .iter()
            .copied()
            .filter(|q| !self.blocked[*q] && self.reasons[*q].is_none_or(|r| r.is_transient()))
            .collect()
    }

    /// Queues searched for jobs running in an advance reservation; the reservation's own
    /// booking makes its queues look full.
    pub fn ar_candidates(&self) -> Vec<QueueIdx> {
        self.order
            .iter()
            .copied()
            .filter(|q| matches!(self.reasons[*q], None | Some(DisableReason::NoFreeSlots)))
            .collect()
    }

    pub fn messages(&self, snapshot: &ClusterSnapshot) -> Vec<SchedulerMessage> {
        self.disabled()
            .into_iter()
            .map(|(q, reason)| SchedulerMessage::queue(snapshot.queues[q].full_name(), reason.description()))
            .collect()
    }
}

/// Suspends tasks on queues in suspend alarm and resumes them when the alarm is gone.
///
/// Per queue instance and epoch at most `nsuspend` tasks change state: the most
/// recently started ones are suspended first, the longest suspended are resumed first.
pub fn threshold_orders(
    snapshot: &ClusterSnapshot,
    split: &QueueSplit,
    jobs: &IndexVec<JobIdx, Job>,
) -> Vec<Order> {
    let mut orders = Vec::new();
    for (queue_idx, queue) in snapshot.queues.iter_enumerated() {
        let full_name = queue.full_name();
        let alarm = split.reason(queue_idx) == Some(DisableReason::SuspendAlarm);
        let mut candidates: Vec<(&Job, &JobTask)> = jobs
            .iter()
            .flat_map(|job| job.tasks.iter().map(move |task| (job, task)))
            .filter(|(_, task)| task.master_queue() == Some(full_name.as_str()))
            .filter(|(_, task)| {
                if alarm {
                    task.state == TaskState::Running
                } else {
                    task.state == TaskState::Suspended && task.suspended_on_threshold
                }
            })
            .collect();
        if candidates.is_empty() {
            continue;
        }
        if !alarm
            && queue
                .state
                .intersects(QueueState::SUSPENDED | QueueState::CAL_SUSPENDED)
        {
            continue;
        }
        candidates.sort_by(|(ja, ta), (jb, tb)| {
            ta.start_time
                .cmp(&tb.start_time)
                .then(ja.id.cmp(&jb.id))
                .then(ta.number.cmp(&tb.number))
        });
        if alarm {
            candidates.reverse();
        }
        for (job, task) in candidates.into_iter().take(queue.nsuspend as usize) {
            let job_id = job.id;
            let task = task.number;
            let queue = full_name.clone();
            if alarm {
                log::info!("Suspending task {job_id}.{task} on {queue}, suspend threshold reached");
                orders.push(Order::SuspendJob { job_id, task, queue });
            } else {
                log::info!("Resuming task {job_id}.{task} on {queue}");
                orders.push(Order::UnsuspendJob { job_id, task, queue });
            }
        }
    }
    orders
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_load_formula() {
        let formula = LoadFormula::parse("np_load_avg + mem_used*0.5 - swap*2").unwrap();
        assert_eq!(
            formula.terms,
            vec![
                ("np_load_avg".to_string(), 1.0),
                ("mem_used".to_string(), 0.5),
                ("swap".to_string(), -2.0)
            ]
        );
        assert!(LoadFormula::parse("").is_err());
        assert!(LoadFormula::parse("load_avg*x").is_err());
        assert!(LoadFormula::parse("load_avg+").is_err());
    }

    #[test]
    fn transient_reasons() {
        assert!(DisableReason::LoadAlarm.is_transient());
        assert!(DisableReason::NoFreeSlots.is_transient());
        assert!(DisableReason::CalendarSuspended.is_transient());
        assert!(!DisableReason::Disabled.is_transient());
        assert!(!DisableReason::Error.is_transient());
    }

    #[test]
    fn state_precedence() {
        assert_eq!(
            state_reason(QueueState::DISABLED | QueueState::ERROR),
            Some(DisableReason::Error)
        );
        assert_eq!(state_reason(QueueState::empty()), None);
    }
}
