//! Driver configuration file.
//!
//! ```toml
//! interval = "15s"
//!
//! [scheduler]
//! max_reservations = 20
//! default_duration = "10m"
//! queue_sort_method = "seq_no"
//!
//! [scheduler.tickets]
//! weight_waiting_time = 0.5
//! ```
//!
//! Values under `[scheduler]` replace the corresponding values of the
//! configuration carried by each snapshot.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use schedd::Map;
use schedd::cluster::{QueueSortMethod, SchedulerConfig, TicketConfig};

use crate::common::error::error;
use crate::common::utils::deserialize_human_duration_opt;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_MINIMUM_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DriverConfig {
    /// Time between two epochs of `gridq watch`.
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub interval: Option<Duration>,
    /// Shortest time between two epochs.
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub minimum_delay: Option<Duration>,
    #[serde(default)]
    pub scheduler: SchedulerOverrides,
}

impl DriverConfig {
    pub fn interval(&self) -> Duration {
        self.interval.unwrap_or(DEFAULT_INTERVAL)
    }

    pub fn minimum_delay(&self) -> Duration {
        self.minimum_delay.unwrap_or(DEFAULT_MINIMUM_DELAY)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.interval == Some(Duration::ZERO) {
            return error("interval has to be greater than zero".to_string());
        }
        if let Some(formula) = &self.scheduler.load_formula {
            if formula.trim().is_empty() {
                return error("load_formula cannot be empty".to_string());
            }
        }
        if let Some(threshold) = self.scheduler.tickets.change_threshold {
            if threshold.is_nan() || threshold < 0.0 {
                return error(format!(
                    "change_threshold has to be a non-negative number, not {threshold}"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerOverrides {
    pub max_reservations: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub default_duration: Option<Duration>,
    pub max_pending_tasks_per_job: Option<u32>,
    pub max_user_jobs: Option<u32>,
    pub queue_sort_method: Option<QueueSortMethod>,
    pub load_formula: Option<String>,
    pub load_adjustments: Option<Map<String, f64>>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub load_adjustment_decay_time: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_human_duration_opt")]
    pub flush_interval: Option<Duration>,
    pub category_cache: Option<bool>,
    #[serde(default)]
    pub tickets: TicketOverrides,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TicketOverrides {
    pub functional_tickets: Option<u64>,
    pub weight_priority: Option<f64>,
    pub weight_waiting_time: Option<f64>,
    pub change_threshold: Option<f64>,
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(value) = value {
        *target = value.clone();
    }
}

impl SchedulerOverrides {
    pub fn apply(&self, config: &mut SchedulerConfig) {
        set(&mut config.max_reservations, &self.max_reservations);
        set(
            &mut config.default_duration,
            &self.default_duration.map(|d| d.as_secs()),
        );
        set(
            &mut config.max_pending_tasks_per_job,
            &self.max_pending_tasks_per_job,
        );
        set(&mut config.max_user_jobs, &self.max_user_jobs);
        set(&mut config.queue_sort_method, &self.queue_sort_method);
        set(&mut config.load_formula, &self.load_formula);
        set(&mut config.load_adjustments, &self.load_adjustments);
        set(
            &mut config.load_adjustment_decay_time,
            &self.load_adjustment_decay_time.map(|d| d.as_secs()),
        );
        set(&mut config.flush_interval, &self.flush_interval);
        set(&mut config.category_cache, &self.category_cache);
        self.tickets.apply(&mut config.tickets);
    }
}

impl TicketOverrides {
    fn apply(&self, config: &mut TicketConfig) {
        set(&mut config.functional_tickets, &self.functional_tickets);
        set(&mut config.weight_priority, &self.weight_priority);
        set(&mut config.weight_waiting_time, &self.weight_waiting_time);
        set(&mut config.change_threshold, &self.change_threshold);
    }
}

pub fn parse_config(text: &str) -> crate::Result<DriverConfig> {
    let config: DriverConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration file, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> crate::Result<DriverConfig> {
    let Some(path) = path else {
        return Ok(DriverConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::GenericError(format!(
            "Cannot read configuration file {}: {e}",
            path.display()
        ))
    })?;
    let config = parse_config(&text)?;
    log::debug!("Loaded configuration from {}: {config:?}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::io::Write;

    #[test]
    fn empty_config_keeps_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.interval(), DEFAULT_INTERVAL);

        let mut scheduler = SchedulerConfig::default();
        config.scheduler.apply(&mut scheduler);
        assert_eq!(scheduler, SchedulerConfig::default());
    }

    #[test]
    fn overrides_replace_snapshot_values() {
        let config = parse_config(
            r#"
interval = "2m"

[scheduler]
max_reservations = 20
default_duration = "10m"
queue_sort_method = "seq_no"
load_formula = "np_load_avg+mem_used*0.5"
flush_interval = "250ms"
category_cache = false

[scheduler.load_adjustments]
np_load_avg = 0.25

[scheduler.tickets]
weight_waiting_time = 0.5
"#,
        )
        .unwrap();
        assert_eq!(config.interval(), Duration::from_secs(120));
        assert_eq!(config.minimum_delay(), DEFAULT_MINIMUM_DELAY);

        let mut scheduler = SchedulerConfig {
            max_user_jobs: 3,
            ..Default::default()
        };
        config.scheduler.apply(&mut scheduler);
        assert_eq!(scheduler.max_reservations, 20);
        assert_eq!(scheduler.default_duration, 600);
        assert_eq!(scheduler.queue_sort_method, QueueSortMethod::SeqNo);
        assert_eq!(scheduler.load_formula, "np_load_avg+mem_used*0.5");
        assert_eq!(scheduler.flush_interval, Duration::from_millis(250));
        assert!(!scheduler.category_cache);
        assert_eq!(scheduler.load_adjustments.get("np_load_avg"), Some(&0.25));
        assert_eq!(scheduler.tickets.weight_waiting_time, 0.5);
        // untouched
        assert_eq!(scheduler.max_user_jobs, 3);
        assert_eq!(scheduler.tickets.functional_tickets, 10_000);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        assert!(matches!(
            parse_config("intervall = \"1s\""),
            Err(Error::DeserializationError(_))
        ));
        assert!(matches!(
            parse_config("interval = \"often\""),
            Err(Error::DeserializationError(_))
        ));
        assert!(matches!(
            parse_config("interval = \"0s\""),
            Err(Error::GenericError(_))
        ));
        assert!(matches!(
            parse_config("[scheduler]\nload_formula = \" \""),
            Err(Error::GenericError(_))
        ));
        assert!(matches!(
            parse_config("[scheduler.tickets]\nchange_threshold = -1.0"),
            Err(Error::GenericError(_))
        ));
    }

    #[test]
    fn load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "minimum_delay = \"500ms\"\n[scheduler]\nmax_user_jobs = 4").unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.minimum_delay(), Duration::from_millis(500));
        assert_eq!(config.scheduler.max_user_jobs, Some(4));

        assert_eq!(load_config(None).unwrap(), DriverConfig::default());
        let missing = file.path().with_extension("missing");
        assert!(load_config(Some(&missing)).is_err());
    }
}
