use serde::{Deserialize, Serialize};

use crate::define_id_type;
use crate::internal::common::Map;
use crate::resources::ResourceAmount;

define_id_type!(HostIdx, u32);

/// Prefix of load values normalized by the number of processors.
pub const NORMALIZED_LOAD_PREFIX: &str = "np_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default = "default_num_proc")]
    pub num_proc: u32,
    /// Raw load values reported by the load sensors (`load_avg`, `mem_free`, ...).
    #[serde(default)]
    pub load_values: Map<String, f64>,
    /// Host level consumable capacities.
    #[serde(default)]
    pub consumables: Map<String, ResourceAmount>,
    #[serde(default)]
    pub attributes: Map<String, String>,
}

fn default_num_proc() -> u32 {
    1
}

impl Host {
    /// Returns a raw or derived load value.
    ///
    /// `np_<name>` is derived from `<name>` divided by the number of processors
    /// unless the sensor reports it directly.
    pub fn load_value(&self, name: &str) -> Option<f64> {
        if let Some(value) = self.load_values.get(name) {
            return Some(*value);
        }
        let raw = name.strip_prefix(NORMALIZED_LOAD_PREFIX)?;
        self.load_values
            .get(raw)
            .map(|value| value / self.num_proc.max(1) as f64)
    }
}

/// Cluster-wide consumables (the `global` pseudo host).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalHost {
    pub consumables: Map<String, ResourceAmount>,
}
