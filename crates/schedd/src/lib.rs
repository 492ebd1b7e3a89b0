#[macro_use]
pub mod internal;

pub use crate::internal::common::index::IndexVec;
pub use crate::internal::common::{Map, Set};

pub type Error = internal::common::error::SchedError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod resources {
    pub use crate::internal::common::resources::{
        FRACTIONS_MAX_DIGITS, FRACTIONS_PER_UNIT, ResourceAmount, ResourceId, ResourceMap,
        ResourceUnits, SLOTS_RESOURCE_ID, SLOTS_RESOURCE_NAME,
    };
}

pub mod cluster {
    pub use crate::internal::cluster::ar::{AdvanceReservation, ArId};
    pub use crate::internal::cluster::complex::{ComplexEntry, ConsumableKind};
    pub use crate::internal::cluster::config::{QueueSortMethod, SchedulerConfig, TicketConfig};
    pub use crate::internal::cluster::host::{GlobalHost, Host};
    pub use crate::internal::cluster::job::{
        GrantedSlots, Job, JobId, JobRequest, JobTask, PeRequest, ResourceRequestEntry,
        SlotRange, TaskNumber, TaskState,
    };
    pub use crate::internal::cluster::pe::{AllocationRule, CheckpointInterface, ParallelEnvironment};
    pub use crate::internal::cluster::queue::{QueueInstance, QueueState, Threshold};
    pub use crate::internal::cluster::rqs::{ResourceQuotaSet, RqsFilter, RqsLimit, RqsRule};
    pub use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotReader};
    pub use crate::internal::cluster::{END_OF_TIME, Timestamp};
}

pub mod scheduler {
    pub use crate::internal::scheduler::dispatch::{
        DispatchStats, EpochSummary, ReservationRecord, dispatch_epoch,
    };
    pub use crate::internal::scheduler::main::{run_epoch, scheduler_loop};
    pub use crate::internal::scheduler::messages::{MessageCategory, SchedulerMessage, Severity};
    pub use crate::internal::scheduler::orders::{
        Coordinator, Order, OrderBatch, OrderCategory, OrderCollector,
    };
    pub use crate::internal::scheduler::tickets::{FairShareTicketPolicy, TicketPolicy};
}
