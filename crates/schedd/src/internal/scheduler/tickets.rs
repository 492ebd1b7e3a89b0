use std::cmp::Ordering;

use crate::internal::cluster::Timestamp;
use crate::internal::cluster::config::TicketConfig;
use crate::internal::cluster::job::{Job, JobIdx};
use crate::internal::common::index::IndexVec;
use crate::internal::common::{Map, Set};
use crate::internal::scheduler::orders::Order;

pub struct TicketContext<'a> {
    pub now: Timestamp,
    pub config: &'a TicketConfig,
}

/// Pluggable priority computation.
pub trait TicketPolicy {
    /// Updates `Job::tickets` and returns orders for materially changed values.
    fn compute_tickets(
        &mut self,
        ctx: &TicketContext,
        jobs: &mut IndexVec<JobIdx, Job>,
        running: &[JobIdx],
        finished: &[JobIdx],
        pending: &[JobIdx],
    ) -> Vec<Order>;

    /// Called after a task of `job` was started; `true` requests a resort of `pending`.
    fn on_dispatched(
        &mut self,
        job: JobIdx,
        jobs: &mut IndexVec<JobIdx, Job>,
        pending: &[JobIdx],
    ) -> bool;
}

/// Highest tickets first, ties by ascending job id.
pub fn priority_cmp(jobs: &IndexVec<JobIdx, Job>, a: JobIdx, b: JobIdx) -> Ordering {
    let (a, b) = (&jobs[a], &jobs[b]);
    b.tickets.total_cmp(&a.tickets).then(a.id.cmp(&b.id))
}

pub fn sort_pending(jobs: &IndexVec<JobIdx, Job>, pending: &mut [JobIdx]) {
    pending.sort_by(|a, b| priority_cmp(jobs, *a, *b));
}

pub fn is_priority_ordered(jobs: &IndexVec<JobIdx, Job>, pending: &[JobIdx]) -> bool {
    pending
        .windows(2)
        .all(|w| priority_cmp(jobs, w[0], w[1]) != Ordering::Greater)
}

fn changed_materially(old: f64, new: f64, threshold: f64) -> bool {
    (new - old).abs() > threshold * old.abs().max(1.0)
}

/// Functional share per owner, plus priority and waiting time.
///
/// Functional tickets are split equally between owners with pending or running
/// jobs. A pending job gets its owner's share divided by `1 + running jobs of the
/// owner` and by the owner's number of pending jobs, so owners that already run
/// a lot fall behind.
#[derive(Default)]
pub struct FairShareTicketPolicy {
    config: TicketConfig,
    now: Timestamp,
    owner_share: f64,
    running_per_owner: Map<String, u32>,
    counted_jobs: Set<JobIdx>,
}

impl FairShareTicketPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn priority_tickets(&self, job: &Job) -> f64 {
        let normalized = (job.priority.clamp(-1023, 1024) + 1023) as f64 / 2047.0;
        self.config.weight_priority * normalized * 1000.0
    }

    fn urgency_tickets(&self, job: &Job) -> f64 {
        self.config.weight_waiting_time * self.now.saturating_sub(job.submission_time) as f64
    }

    fn running_of(&self, owner: &str) -> u32 {
        self.running_per_owner.get(owner).copied().unwrap_or(0)
    }

    fn pending_tickets(&self, job: &Job, owner_pending: u32) -> f64 {
        let functional =
            self.owner_share / (1 + self.running_of(&job.owner)) as f64 / owner_pending.max(1) as f64;
        functional + self.priority_tickets(job) + self.urgency_tickets(job)
    }
}

fn count_by_owner(jobs: &IndexVec<JobIdx, Job>, list: &[JobIdx]) -> Map<String, u32> {
    let mut counts = Map::new();
    for idx in list {
        *counts.entry(jobs[*idx].owner.clone()).or_insert(0) += 1;
    }
    counts
}

impl TicketPolicy for FairShareTicketPolicy {
    fn compute_tickets(
        &mut self,
        ctx: &TicketContext,
        jobs: &mut IndexVec<JobIdx, Job>,
        running: &[JobIdx],
        _finished: &[JobIdx],
        pending: &[JobIdx],
    ) -> Vec<Order> {
        self.config = ctx.config.clone();
        self.now = ctx.now;
        self.running_per_owner = count_by_owner(jobs, running);
        self.counted_jobs = running.iter().copied().collect();
        let pending_per_owner = count_by_owner(jobs, pending);

        let owner_count = running
            .iter()
            .chain(pending.iter())
            .map(|idx| jobs[*idx].owner.as_str())
            .collect::<Set<&str>>()
            .len();
        self.owner_share = if owner_count == 0 {
            0.0
        } else {
            self.config.functional_tickets as f64 / owner_count as f64
        };

        let threshold = self.config.change_threshold;
        let mut orders = Vec::new();
        for idx in running {
            let job = &jobs[*idx];
            let owner_jobs = self.running_of(&job.owner)
                + pending_per_owner.get(&job.owner).copied().unwrap_or(0);
            let tickets = self.owner_share / owner_jobs.max(1) as f64 + self.priority_tickets(job);
            if changed_materially(job.tickets, tickets, threshold) {
                for task in job.active_tasks() {
                    orders.push(Order::ConfigUpdate {
                        job_id: job.id,
                        task: task.number,
                        tickets,
                    });
                }
            }
            jobs[*idx].tickets = tickets;
        }
        for idx in pending {
            let job = &jobs[*idx];
            let owner_pending = pending_per_owner.get(&job.owner).copied().unwrap_or(0);
            let tickets = self.pending_tickets(job, owner_pending);
            if changed_materially(job.tickets, tickets, threshold) {
                orders.push(Order::PendingTicketUpdate {
                    job_id: job.id,
                    tickets,
                });
            }
            jobs[*idx].tickets = tickets;
        }
        orders
    }

    fn on_dispatched(
        &mut self,
        job: JobIdx,
        jobs: &mut IndexVec<JobIdx, Job>,
        pending: &[JobIdx],
    ) -> bool {
        if !self.counted_jobs.insert(job) {
            return false;
        }
        let owner = jobs[job].owner.clone();
        *self.running_per_owner.entry(owner.clone()).or_insert(0) += 1;

        let owner_pending: Vec<JobIdx> = pending
            .iter()
            .copied()
            .filter(|idx| jobs[*idx].owner == owner)
            .collect();
        let mut changed = false;
        for idx in &owner_pending {
            let tickets = self.pending_tickets(&jobs[*idx], owner_pending.len() as u32);
            if tickets != jobs[*idx].tickets {
                jobs[*idx].tickets = tickets;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::tests::utils::job::JobBuilder;

    fn jobs(list: Vec<Job>) -> IndexVec<JobIdx, Job> {
        list.into()
    }

    fn idx(n: u32) -> JobIdx {
        JobIdx::new(n)
    }

    #[test]
    fn owners_with_running_jobs_fall_behind() {
        let mut jobs = jobs(vec![
            JobBuilder::new(1).owner("alice").running_on("all.q@n1", 1).build(),
            JobBuilder::new(2).owner("alice").build(),
            JobBuilder::new(3).owner("bob").build(),
        ]);
        let config = TicketConfig::default();
        let ctx = TicketContext {
            now: 0,
            config: &config,
        };
        let mut policy = FairShareTicketPolicy::new();
        let mut pending = vec![idx(1), idx(2)];
        let orders = policy.compute_tickets(&ctx, &mut jobs, &[idx(0)], &[], &pending);
        assert!(jobs[idx(2)].tickets > jobs[idx(1)].tickets);
        assert!(
            orders
                .iter()
                .any(|o| matches!(o, Order::ConfigUpdate { .. }))
        );
        assert_eq!(
            orders
                .iter()
                .filter(|o| matches!(o, Order::PendingTicketUpdate { .. }))
                .count(),
            2
        );
        sort_pending(&jobs, &mut pending);
        assert_eq!(pending, vec![idx(2), idx(1)]);
        assert!(is_priority_ordered(&jobs, &pending));
    }

    #[test]
    fn functional_tickets_split_between_distinct_owners() {
        let mut jobs = jobs(vec![
            JobBuilder::new(1).owner("alice").build(),
            JobBuilder::new(2).owner("alice").build(),
            JobBuilder::new(3).owner("bob").build(),
            JobBuilder::new(4).owner("carol").running_on("all.q@n1", 1).build(),
        ]);
        let config = TicketConfig {
            weight_priority: 0.0,
            ..Default::default()
        };
        let ctx = TicketContext {
            now: 0,
            config: &config,
        };
        let mut policy = FairShareTicketPolicy::new();
        policy.compute_tickets(&ctx, &mut jobs, &[idx(3)], &[], &[idx(0), idx(1), idx(2)]);
        let share = 10_000.0 / 3.0;
        assert!((jobs[idx(0)].tickets - share / 2.0).abs() < 1e-6);
        assert!((jobs[idx(1)].tickets - share / 2.0).abs() < 1e-6);
        assert!((jobs[idx(2)].tickets - share).abs() < 1e-6);
        assert!((jobs[idx(3)].tickets - share).abs() < 1e-6);
    }

    #[test]
    fn priority_breaks_equal_shares() {
        let mut jobs = jobs(vec![
            JobBuilder::new(5).owner("alice").priority(-100).build(),
            JobBuilder::new(6).owner("alice").priority(100).build(),
            JobBuilder::new(7).owner("alice").priority(100).build(),
        ]);
        let config = TicketConfig::default();
        let ctx = TicketContext {
            now: 0,
            config: &config,
        };
        let mut pending = vec![idx(0), idx(1), idx(2)];
        let mut policy = FairShareTicketPolicy::new();
        policy.compute_tickets(&ctx, &mut jobs, &[], &[], &pending);
        sort_pending(&jobs, &mut pending);
        assert_eq!(pending, vec![idx(1), idx(2), idx(0)]);
        assert!(is_priority_ordered(&jobs, &pending));
    }

    #[test]
    fn dispatch_requests_resort_once_per_job() {
        let mut jobs = jobs(vec![
            JobBuilder::new(1).owner("alice").build(),
            JobBuilder::new(2).owner("alice").build(),
            JobBuilder::new(3).owner("bob").build(),
            JobBuilder::new(4).owner("alice").build(),
        ]);
        let config = TicketConfig::default();
        let ctx = TicketContext {
            now: 0,
            config: &config,
        };
        let pending = vec![idx(0), idx(1), idx(2), idx(3)];
        let mut policy = FairShareTicketPolicy::new();
        policy.compute_tickets(&ctx, &mut jobs, &[], &[], &pending);
        let before = jobs[idx(1)].tickets;
        assert!(policy.on_dispatched(idx(0), &mut jobs, &pending[1..]));
        assert!(jobs[idx(1)].tickets < before);
        assert!(jobs[idx(1)].tickets < jobs[idx(2)].tickets);
        assert!(!policy.on_dispatched(idx(0), &mut jobs, &pending[1..]));
    }
}
