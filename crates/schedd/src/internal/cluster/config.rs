use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::internal::common::Map;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSortMethod {
    /// Least loaded host first (by `load_formula`), `seq_no` breaks ties.
    #[default]
    Load,
    /// By `seq_no`, load breaks ties.
    SeqNo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Functional tickets distributed among owners with pending work.
    pub functional_tickets: u64,
    pub weight_priority: f64,
    /// Tickets per second of waiting time.
    pub weight_waiting_time: f64,
    /// Relative ticket change that is reported back to the coordinator.
    pub change_threshold: f64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        TicketConfig {
            functional_tickets: 10_000,
            weight_priority: 1.0,
            weight_waiting_time: 0.0,
            change_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Reservations booked per epoch, 0 disables reservation scheduling.
    pub max_reservations: u32,
    /// Run time in seconds assumed for jobs without a duration request.
    pub default_duration: u64,
    /// How many tasks of one array job are considered per epoch.
    pub max_pending_tasks_per_job: u32,
    /// Running jobs per user, 0 means unlimited.
    pub max_user_jobs: u32,
    pub queue_sort_method: QueueSortMethod,
    /// Sum of weighted load values (`np_load_avg`, `np_load_avg+mem_used*0.5`, ...).
    pub load_formula: String,
    /// Load added to a host for every slot started in this epoch or recently.
    pub load_adjustments: Map<String, f64>,
    /// Seconds after which the load adjustment of a started job vanishes.
    pub load_adjustment_decay_time: u64,
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,
    pub category_cache: bool,
    pub tickets: TicketConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let mut load_adjustments = Map::new();
        load_adjustments.insert("np_load_avg".to_string(), 0.5);
        SchedulerConfig {
            max_reservations: 0,
            default_duration: 600,
            max_pending_tasks_per_job: 50,
            max_user_jobs: 0,
            queue_sort_method: QueueSortMethod::Load,
            load_formula: "np_load_avg".to_string(),
            load_adjustments,
            load_adjustment_decay_time: 450,
            flush_interval: Duration::from_millis(100),
            category_cache: true,
            tickets: TicketConfig::default(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
