use thiserror::Error;

use crate::internal::cluster::ar::{ArId, ArIdx};
use crate::internal::cluster::complex::ConsumableKind;
use crate::internal::cluster::job::{Job, SlotRange};
use crate::internal::cluster::pe::{AllocationRule, PeIdx};
use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotIndex};
use crate::resources::{ResourceAmount, ResourceId, SLOTS_RESOURCE_NAME};

/// A job request that cannot be matched at all; the job is skipped for the epoch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("unknown resource '{0}' requested")]
    UnknownResource(String),
    #[error("slots cannot be requested as a resource, use a parallel environment")]
    SlotsAsResource,
    #[error("unknown checkpoint interface '{0}'")]
    UnknownCheckpoint(String),
    #[error("unknown parallel environment '{0}'")]
    UnknownPe(String),
    #[error("invalid slot range {0}")]
    InvalidSlotRange(SlotRange),
    #[error("parallel environment '{0}' has an unsupported allocation rule {1}")]
    InvalidAllocationRule(String, AllocationRule),
    #[error("advance reservation {0} does not exist")]
    UnknownAr(ArId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumableRequest {
    pub resource: ResourceId,
    pub kind: ConsumableKind,
    pub amount: ResourceAmount,
    /// Implicit requests (complex defaults) are booked only where the consumable is defined.
    pub explicit: bool,
}

#[derive(Debug, Clone)]
pub struct PeSelection {
    pub pe: PeIdx,
    pub slots: SlotRange,
    pub allocation_rule: AllocationRule,
    pub job_is_first_task: bool,
}

/// Job request with names resolved against the snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRequest {
    pub consumables: Vec<ConsumableRequest>,
    /// Non-consumable numeric requests checked against host load values.
    pub load_requests: Vec<(String, ResourceAmount)>,
    pub pe: Option<PeSelection>,
    pub ar: Option<ArIdx>,
}

impl ResolvedRequest {
    pub fn explicit_consumables(&self) -> impl Iterator<Item = &ConsumableRequest> {
        self.consumables.iter().filter(|c| c.explicit)
    }
}

pub fn resolve_request(
    job: &Job,
    snapshot: &ClusterSnapshot,
    index: &SnapshotIndex,
) -> Result<ResolvedRequest, RequestError> {
    let request = &job.request;
    let mut resolved = ResolvedRequest::default();

    for entry in &request.resources {
        if entry.name == SLOTS_RESOURCE_NAME {
            return Err(RequestError::SlotsAsResource);
        }
        let resource = index
            .resource(&entry.name)
            .ok_or_else(|| RequestError::UnknownResource(entry.name.clone()))?;
        let kind = index.consumable_kind(resource);
        if kind.is_consumable() {
            resolved
                .consumables
                .retain(|c: &ConsumableRequest| c.resource != resource);
            resolved.consumables.push(ConsumableRequest {
                resource,
                kind,
                amount: entry.amount,
                explicit: true,
            });
        } else {
            resolved
                .load_requests
                .push((entry.name.clone(), entry.amount));
        }
    }
    for (resource, kind, amount) in &index.resource_defaults {
        if !resolved.consumables.iter().any(|c| c.resource == *resource) {
            resolved.consumables.push(ConsumableRequest {
                resource: *resource,
                kind: *kind,
                amount: *amount,
                explicit: false,
            });
        }
    }

    if let Some(ckpt) = &request.checkpoint {
        if !index.has_checkpoint(ckpt) {
            return Err(RequestError::UnknownCheckpoint(ckpt.clone()));
        }
    }

    if let Some(pe_request) = &request.pe {
        let pe_idx = index
            .pe(&pe_request.name)
            .ok_or_else(|| RequestError::UnknownPe(pe_request.name.clone()))?;
        let range = pe_request.slots;
        if range.min == 0 || range.max.is_some_and(|max| max < range.min) {
            return Err(RequestError::InvalidSlotRange(range));
        }
        let pe = &snapshot.pes[pe_idx];
        if pe.allocation_rule == AllocationRule::Fixed(0) {
            return Err(RequestError::InvalidAllocationRule(
                pe.name.clone(),
                pe.allocation_rule,
            ));
        }
        resolved.pe = Some(PeSelection {
            pe: pe_idx,
            slots: range,
            allocation_rule: pe.allocation_rule,
            job_is_first_task: pe.job_is_first_task,
        });
    }

    if let Some(ar_id) = request.advance_reservation {
        resolved.ar = Some(index.ar(ar_id).ok_or(RequestError::UnknownAr(ar_id))?);
    }
    Ok(resolved)
}
