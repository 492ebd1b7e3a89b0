use serde::{Deserialize, Serialize};

use crate::define_id_type;

define_id_type!(PeIdx, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationRule {
    /// All slots on a single host.
    PeSlots,
    /// Fill hosts one after another.
    FillUp,
    /// One slot per host and round.
    RoundRobin,
    /// Exactly this many slots on every used host.
    Fixed(u32),
}

impl std::fmt::Display for AllocationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocationRule::PeSlots => write!(f, "$pe_slots"),
            AllocationRule::FillUp => write!(f, "$fill_up"),
            AllocationRule::RoundRobin => write!(f, "$round_robin"),
            AllocationRule::Fixed(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelEnvironment {
    pub name: String,
    /// Upper bound of slots used by all jobs of this PE together.
    pub slots: u32,
    pub allocation_rule: AllocationRule,
    /// Tightly integrated: slave tasks are started and accounted by the execution daemons.
    #[serde(default)]
    pub control_slaves: bool,
    #[serde(default = "default_true")]
    pub job_is_first_task: bool,
    #[serde(default)]
    pub accounting_summary: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointInterface {
    pub name: String,
    /// Checkpoint interval in seconds, 0 means checkpoint only on shutdown.
    #[serde(default)]
    pub interval: u64,
}
