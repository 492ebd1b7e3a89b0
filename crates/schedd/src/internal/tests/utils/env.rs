use tokio_util::sync::CancellationToken;

use crate::internal::cluster::ar::{AdvanceReservation, ArId};
use crate::internal::cluster::complex::{ComplexEntry, ConsumableKind};
use crate::internal::cluster::config::{QueueSortMethod, SchedulerConfig};
use crate::internal::cluster::job::{GrantedSlots, Job};
use crate::internal::cluster::pe::{AllocationRule, CheckpointInterface, ParallelEnvironment};
use crate::internal::cluster::rqs::ResourceQuotaSet;
use crate::internal::cluster::snapshot::ClusterSnapshot;
use crate::internal::scheduler::dispatch::{EpochSummary, dispatch_epoch};
use crate::internal::scheduler::orders::{Order, OrderCollector};
use crate::internal::scheduler::tickets::FairShareTicketPolicy;
use crate::internal::tests::utils::cluster::{HostBuilder, QueueBuilder};
use crate::internal::tests::utils::job::JobBuilder;
use crate::resources::ResourceAmount;

pub const TEST_NOW: u64 = 1_000;

/// Snapshot under construction plus helpers to run epochs over it.
pub struct TestEnv {
    pub snapshot: ClusterSnapshot,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> TestEnv {
        TestEnv {
            snapshot: ClusterSnapshot {
                now: TEST_NOW,
                ..Default::default()
            },
        }
    }

    /// Hosts `n1..=nN`, each with an `all.q` instance of `slots` slots, ordered by sequence number.
    pub fn with_hosts(count: u32, slots: u32) -> TestEnv {
        let mut env = TestEnv::new();
        env.config().queue_sort_method = QueueSortMethod::SeqNo;
        for i in 1..=count {
            let host = format!("n{i}");
            env.host(HostBuilder::new(&host));
            env.queue(QueueBuilder::new("all.q", &host, slots).seq_no(i));
        }
        env
    }

    pub fn config(&mut self) -> &mut SchedulerConfig {
        &mut self.snapshot.config
    }

    pub fn host(&mut self, builder: HostBuilder) -> &mut Self {
        self.snapshot.hosts.push(builder.build());
        self
    }

    pub fn queue(&mut self, builder: QueueBuilder) -> &mut Self {
        self.snapshot.queues.push(builder.build());
        self
    }

    pub fn job(&mut self, builder: JobBuilder) -> &mut Self {
        self.snapshot.jobs.push(builder.build());
        self
    }

    pub fn jobs(&mut self, builders: impl IntoIterator<Item = JobBuilder>) -> &mut Self {
        for builder in builders {
            self.job(builder);
        }
        self
    }

    pub fn complex(&mut self, name: &str, kind: ConsumableKind) -> &mut Self {
        self.snapshot.complexes.push(ComplexEntry::new(name, kind));
        self
    }

    pub fn global_consumable(&mut self, name: &str, units: u64) -> &mut Self {
        self.snapshot
            .global
            .consumables
            .insert(name.to_string(), ResourceAmount::new_units(units));
        self
    }

    pub fn pe(&mut self, name: &str, slots: u32, rule: AllocationRule) -> &mut Self {
        self.snapshot.pes.push(ParallelEnvironment {
            name: name.to_string(),
            slots,
            allocation_rule: rule,
            control_slaves: true,
            job_is_first_task: true,
            accounting_summary: false,
        });
        self
    }

    pub fn checkpoint(&mut self, name: &str) -> &mut Self {
        self.snapshot.checkpoints.push(CheckpointInterface {
            name: name.to_string(),
            interval: 0,
        });
        self
    }

    pub fn rqs(&mut self, rqs: ResourceQuotaSet) -> &mut Self {
        self.snapshot.rqs.push(rqs);
        self
    }

    pub fn ar(
        &mut self,
        id: u32,
        owner: &str,
        start: u64,
        end: u64,
        granted: &[(&str, u32)],
    ) -> &mut Self {
        self.snapshot.ars.push(AdvanceReservation {
            id: ArId::new(id),
            name: format!("ar{id}"),
            owner: owner.to_string(),
            start,
            end,
            granted: granted
                .iter()
                .map(|(queue, slots)| GrantedSlots::new(*queue, *slots))
                .collect(),
            users: Vec::new(),
        });
        self
    }

    pub fn find_job(&self, id: u32) -> &Job {
        self.snapshot
            .jobs
            .iter()
            .find(|j| j.id.as_num() == id)
            .unwrap()
    }

    pub fn try_schedule(&self) -> crate::Result<(OrderCollector, EpochSummary)> {
        let mut collector = OrderCollector::new();
        let mut policy = FairShareTicketPolicy::new();
        let summary = dispatch_epoch(
            self.snapshot.clone(),
            &mut policy,
            &mut collector,
            &CancellationToken::new(),
        )?;
        Ok((collector, summary))
    }

    pub fn schedule(&self) -> (OrderCollector, EpochSummary) {
        self.try_schedule().unwrap()
    }
}

/// `(job id, task, granted queues)` of all start orders, in emission order.
pub fn started(collector: &OrderCollector) -> Vec<(u32, u32, Vec<(String, u32)>)> {
    collector
        .start_orders()
        .map(|order| match order {
            Order::StartJob {
                job_id,
                task,
                granted,
                ..
            } => (
                job_id.as_num(),
                task.as_num(),
                granted
                    .iter()
                    .map(|g| (g.queue.clone(), g.slots))
                    .collect(),
            ),
            _ => unreachable!(),
        })
        .collect()
}

pub fn started_jobs(collector: &OrderCollector) -> Vec<u32> {
    started(collector).into_iter().map(|(job, _, _)| job).collect()
}

pub fn removed_immediate(collector: &OrderCollector) -> Vec<(u32, u32)> {
    collector
        .orders()
        .filter_map(|order| match order {
            Order::RemoveImmediateJob { job_id, task } => Some((job_id.as_num(), task.as_num())),
            _ => None,
        })
        .collect()
}
