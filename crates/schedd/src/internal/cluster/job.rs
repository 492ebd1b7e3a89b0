use serde::{Deserialize, Serialize};

use crate::define_id_type;
use crate::internal::cluster::Timestamp;
use crate::internal::cluster::ar::ArId;
use crate::internal::common::Map;
use crate::resources::ResourceAmount;

define_id_type!(JobId, u32);
// Position of a job in the snapshot's job arena.
define_id_type!(JobIdx, u32);
define_id_type!(TaskNumber, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Suspended,
    Error,
    Finished,
}

/// Slots granted to a running task on one queue instance (`queue@host`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedSlots {
    pub queue: String,
    pub slots: u32,
}

impl GrantedSlots {
    pub fn new(queue: impl Into<String>, slots: u32) -> Self {
        GrantedSlots {
            queue: queue.into(),
            slots,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTask {
    pub number: TaskNumber,
    pub state: TaskState,
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    /// Master queue first.
    #[serde(default)]
    pub granted: Vec<GrantedSlots>,
    #[serde(default)]
    pub suspended_on_threshold: bool,
}

impl JobTask {
    pub fn pending(number: TaskNumber) -> Self {
        JobTask {
            number,
            state: TaskState::Pending,
            start_time: None,
            granted: Vec::new(),
            suspended_on_threshold: false,
        }
    }

    /// Running and suspended tasks still hold their resources.
    #[inline]
    pub fn holds_resources(&self) -> bool {
        matches!(self.state, TaskState::Running | TaskState::Suspended)
    }

    pub fn granted_slots(&self) -> u32 {
        self.granted.iter().map(|g| g.slots).sum()
    }

    pub fn master_queue(&self) -> Option<&str> {
        self.granted.first().map(|g| g.queue.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotRange {
    pub min: u32,
    /// `None` is an open range (`2-`).
    #[serde(default)]
    pub max: Option<u32>,
}

impl SlotRange {
    pub fn exact(slots: u32) -> Self {
        SlotRange {
            min: slots,
            max: Some(slots),
        }
    }

    pub fn new(min: u32, max: u32) -> Self {
        SlotRange {
            min,
            max: Some(max),
        }
    }
}

impl std::fmt::Display for SlotRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{}-{}", self.min, max),
            None => write!(f, "{}-", self.min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeRequest {
    pub name: String,
    pub slots: SlotRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRequestEntry {
    pub name: String,
    pub amount: ResourceAmount,
}

impl ResourceRequestEntry {
    pub fn new(name: impl Into<String>, amount: impl Into<ResourceAmount>) -> Self {
        ResourceRequestEntry {
            name: name.into(),
            amount: amount.into(),
        }
    }
}

/// The parts of a job that determine where it can run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    pub resources: Vec<ResourceRequestEntry>,
    /// Host attributes that have to match exactly (e.g. `arch=lx-amd64`).
    pub attributes: Map<String, String>,
    pub pe: Option<PeRequest>,
    pub checkpoint: Option<String>,
    /// Expected run time in seconds.
    pub duration: Option<u64>,
    /// Hard queue list: cluster queue names or full `queue@host` names.
    pub queues: Vec<String>,
    pub hosts: Vec<String>,
    pub advance_reservation: Option<ArId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default)]
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub submission_time: Timestamp,
    #[serde(default)]
    pub tickets: f64,
    #[serde(default)]
    pub request: JobRequest,
    #[serde(default)]
    pub reserve: bool,
    #[serde(default)]
    pub immediate: bool,
    #[serde(default)]
    pub hold: bool,
    #[serde(default)]
    pub predecessors: Vec<JobId>,
    #[serde(default)]
    pub start_after: Option<Timestamp>,
    #[serde(default)]
    pub max_running_tasks: Option<u32>,
    pub tasks: Vec<JobTask>,
}

impl Job {
    #[inline]
    pub fn is_array(&self) -> bool {
        self.tasks.len() > 1
    }

    #[inline]
    pub fn is_parallel(&self) -> bool {
        self.request.pe.is_some()
    }

    pub fn find_task(&self, number: TaskNumber) -> Option<&JobTask> {
        self.tasks.iter().find(|t| t.number == number)
    }

    pub fn pending_tasks(&self) -> impl Iterator<Item = &JobTask> {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Pending)
    }

    pub fn active_tasks(&self) -> impl Iterator<Item = &JobTask> {
        self.tasks.iter().filter(|t| t.holds_resources())
    }

    pub fn has_state(&self, state: TaskState) -> bool {
        self.tasks.iter().any(|t| t.state == state)
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.state == TaskState::Finished)
    }
}
