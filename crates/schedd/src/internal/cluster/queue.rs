use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::define_id_type;
use crate::internal::common::Map;
use crate::resources::ResourceAmount;

define_id_type!(QueueIdx, u32);

bitflags! {
    /// Administrative and calendar state of a queue instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct QueueState: u32 {
        const DISABLED = 0x0001;
        const SUSPENDED = 0x0002;
        const CAL_DISABLED = 0x0004;
        const CAL_SUSPENDED = 0x0008;
        const UNKNOWN = 0x0010;
        const ERROR = 0x0020;
    }
}

/// Load or suspend threshold, triggered when the host value reaches `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub name: String,
    pub value: f64,
}

impl Threshold {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Threshold {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueInstance {
    /// Cluster queue name (`all.q`).
    pub queue: String,
    pub host: String,
    #[serde(default)]
    pub seq_no: u32,
    pub slots: u32,
    #[serde(default)]
    pub state: QueueState,
    #[serde(default)]
    pub load_thresholds: Vec<Threshold>,
    #[serde(default)]
    pub suspend_thresholds: Vec<Threshold>,
    #[serde(default = "default_nsuspend")]
    pub nsuspend: u32,
    /// Queue level consumable capacities.
    #[serde(default)]
    pub consumables: Map<String, ResourceAmount>,
    #[serde(default)]
    pub pe_list: Vec<String>,
    #[serde(default)]
    pub ckpt_list: Vec<String>,
    /// If non-empty, only these owners may use the queue.
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub xusers: Vec<String>,
}

impl Default for QueueState {
    fn default() -> Self {
        QueueState::empty()
    }
}

fn default_nsuspend() -> u32 {
    1
}

impl QueueInstance {
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.queue, self.host)
    }

    /// True if `name` is either the cluster queue name or the full instance name.
    pub fn matches_name(&self, name: &str) -> bool {
        match name.split_once('@') {
            Some((queue, host)) => queue == self.queue && host == self.host,
            None => name == self.queue,
        }
    }

    pub fn is_accessible_by(&self, owner: &str) -> bool {
        if self.xusers.iter().any(|u| u == owner) {
            return false;
        }
        self.users.is_empty() || self.users.iter().any(|u| u == owner)
    }
}
