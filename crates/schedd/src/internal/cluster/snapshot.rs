use serde::{Deserialize, Serialize};

use crate::internal::cluster::Timestamp;
use crate::internal::cluster::ar::{AdvanceReservation, ArId, ArIdx};
use crate::internal::cluster::complex::{ComplexEntry, ConsumableKind};
use crate::internal::cluster::config::SchedulerConfig;
use crate::internal::cluster::host::{GlobalHost, Host, HostIdx};
use crate::internal::cluster::job::{Job, JobId, JobIdx};
use crate::internal::cluster::pe::{CheckpointInterface, ParallelEnvironment, PeIdx};
use crate::internal::cluster::queue::{QueueIdx, QueueInstance};
use crate::internal::cluster::rqs::{ResourceQuotaSet, RqsIdx};
use crate::internal::common::index::IndexVec;
use crate::internal::common::{Map, Set};
use crate::internal::common::error::SchedError;
use crate::resources::{ResourceId, ResourceMap, SLOTS_RESOURCE_NAME};

/// Read-only view of the cluster handed to one dispatch epoch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSnapshot {
    pub now: Timestamp,
    pub config: SchedulerConfig,
    pub complexes: Vec<ComplexEntry>,
    pub global: GlobalHost,
    pub hosts: IndexVec<HostIdx, Host>,
    pub queues: IndexVec<QueueIdx, QueueInstance>,
    pub pes: IndexVec<PeIdx, ParallelEnvironment>,
    pub checkpoints: Vec<CheckpointInterface>,
    pub rqs: IndexVec<RqsIdx, ResourceQuotaSet>,
    pub ars: IndexVec<ArIdx, AdvanceReservation>,
    pub jobs: IndexVec<JobIdx, Job>,
}

/// Source of snapshots for the scheduler loop.
pub trait SnapshotReader {
    fn read_snapshot(&mut self) -> crate::Result<ClusterSnapshot>;
}

impl<F> SnapshotReader for F
where
    F: FnMut() -> crate::Result<ClusterSnapshot>,
{
    fn read_snapshot(&mut self) -> crate::Result<ClusterSnapshot> {
        self()
    }
}

/// Name lookups over a snapshot, built once per epoch.
#[derive(Debug)]
pub struct SnapshotIndex {
    pub resource_map: ResourceMap,
    /// Indexed by `ResourceId`.
    pub consumable_kinds: Vec<ConsumableKind>,
    pub resource_defaults: Vec<(ResourceId, ConsumableKind, crate::resources::ResourceAmount)>,
    queue_by_name: Map<String, QueueIdx>,
    host_by_name: Map<String, HostIdx>,
    pe_by_name: Map<String, PeIdx>,
    checkpoints: Set<String>,
    ar_by_id: Map<ArId, ArIdx>,
    job_by_id: Map<JobId, JobIdx>,
    queue_hosts: IndexVec<QueueIdx, HostIdx>,
}

impl SnapshotIndex {
    pub fn new(snapshot: &ClusterSnapshot) -> crate::Result<Self> {
        let mut resource_map = ResourceMap::default();
        let mut consumable_kinds = vec![ConsumableKind::PerSlot];
        let mut resource_defaults = Vec::new();
        for complex in &snapshot.complexes {
            if complex.name == SLOTS_RESOURCE_NAME {
                continue;
            }
            if resource_map.get_index(&complex.name).is_some() {
                return Err(SchedError::SnapshotError(format!(
                    "Complex '{}' is defined twice",
                    complex.name
                )));
            }
            let id = resource_map.get_or_allocate_resource_id(&complex.name);
            consumable_kinds.push(complex.consumable);
            if complex.consumable.is_consumable() && !complex.default.is_zero() {
                resource_defaults.push((id, complex.consumable, complex.default));
            }
        }

        let mut host_by_name = Map::with_capacity(snapshot.hosts.len());
        for (idx, host) in snapshot.hosts.iter_enumerated() {
            if host_by_name.insert(host.name.clone(), idx).is_some() {
                return Err(SchedError::SnapshotError(format!(
                    "Host '{}' is listed twice",
                    host.name
                )));
            }
        }

        let mut queue_by_name = Map::with_capacity(snapshot.queues.len());
        let mut queue_hosts = IndexVec::default();
        for (idx, queue) in snapshot.queues.iter_enumerated() {
            let Some(host) = host_by_name.get(&queue.host) else {
                return Err(SchedError::SnapshotError(format!(
                    "Queue instance {} references unknown host",
                    queue.full_name()
                )));
            };
            queue_hosts.push(*host);
            if queue_by_name.insert(queue.full_name(), idx).is_some() {
                return Err(SchedError::SnapshotError(format!(
                    "Queue instance {} is listed twice",
                    queue.full_name()
                )));
            }
        }

        let pe_by_name = snapshot
            .pes
            .iter_enumerated()
            .map(|(idx, pe)| (pe.name.clone(), idx))
            .collect();
        let checkpoints = snapshot.checkpoints.iter().map(|c| c.name.clone()).collect();
        let ar_by_id = snapshot
            .ars
            .iter_enumerated()
            .map(|(idx, ar)| (ar.id, idx))
            .collect();
        let job_by_id = snapshot
            .jobs
            .iter_enumerated()
            .map(|(idx, job)| (job.id, idx))
            .collect();

        Ok(SnapshotIndex {
            resource_map,
            consumable_kinds,
            resource_defaults,
            queue_by_name,
            host_by_name,
            pe_by_name,
            checkpoints,
            ar_by_id,
            job_by_id,
            queue_hosts,
        })
    }

    #[inline]
    pub fn queue(&self, full_name: &str) -> Option<QueueIdx> {
        self.queue_by_name.get(full_name).copied()
    }

    #[inline]
    pub fn host(&self, name: &str) -> Option<HostIdx> {
        self.host_by_name.get(name).copied()
    }

    #[inline]
    pub fn host_of(&self, queue: QueueIdx) -> HostIdx {
        self.queue_hosts[queue]
    }

    #[inline]
    pub fn pe(&self, name: &str) -> Option<PeIdx> {
        self.pe_by_name.get(name).copied()
    }

    #[inline]
    pub fn has_checkpoint(&self, name: &str) -> bool {
        self.checkpoints.contains(name)
    }

    #[inline]
    pub fn ar(&self, id: ArId) -> Option<ArIdx> {
        self.ar_by_id.get(&id).copied()
    }

    #[inline]
    pub fn job(&self, id: JobId) -> Option<JobIdx> {
        self.job_by_id.get(&id).copied()
    }

    #[inline]
    pub fn resource(&self, name: &str) -> Option<ResourceId> {
        self.resource_map.get_index(name)
    }

    pub fn consumable_kind(&self, resource: ResourceId) -> ConsumableKind {
        self.consumable_kinds
            .get(resource.as_usize())
            .copied()
            .unwrap_or_default()
    }
}
