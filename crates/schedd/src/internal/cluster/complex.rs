use serde::{Deserialize, Serialize};

use crate::resources::ResourceAmount;

/// How a consumable is booked when a job is granted slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumableKind {
    /// Not a consumable, only checked against load values and attributes.
    #[default]
    No,
    /// Booked once for every granted slot.
    PerSlot,
    /// Booked once for the whole job on the master queue/host.
    PerJob,
    /// Booked once on every host the job uses.
    PerHost,
}

impl ConsumableKind {
    #[inline]
    pub fn is_consumable(&self) -> bool {
        !matches!(self, ConsumableKind::No)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplexEntry {
    pub name: String,
    #[serde(default)]
    pub consumable: ConsumableKind,
    /// Implicit request of jobs that do not request this consumable.
    #[serde(default)]
    pub default: ResourceAmount,
}

impl ComplexEntry {
    pub fn new(name: impl Into<String>, consumable: ConsumableKind) -> Self {
        ComplexEntry {
            name: name.into(),
            consumable,
            default: ResourceAmount::ZERO,
        }
    }

    pub fn with_default(mut self, default: ResourceAmount) -> Self {
        self.default = default;
        self
    }
}
