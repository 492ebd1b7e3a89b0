use serde::{Deserialize, Serialize};

use crate::define_id_type;
use crate::internal::cluster::Timestamp;
use crate::internal::cluster::job::GrantedSlots;

define_id_type!(ArId, u32);
define_id_type!(ArIdx, u32);

/// Advance reservation: slots on a set of queue instances booked for `[start, end)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceReservation {
    pub id: ArId,
    #[serde(default)]
    pub name: String,
    pub owner: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub granted: Vec<GrantedSlots>,
    /// If non-empty, only these users may submit into the reservation (owner always can).
    #[serde(default)]
    pub users: Vec<String>,
}

impl AdvanceReservation {
    pub fn is_accessible_by(&self, user: &str) -> bool {
        self.owner == user || self.users.is_empty() || self.users.iter().any(|u| u == user)
    }

    pub fn granted_on(&self, queue_full_name: &str) -> u32 {
        self.granted
            .iter()
            .filter(|g| g.queue == queue_full_name)
            .map(|g| g.slots)
            .sum()
    }

    #[inline]
    pub fn is_active_at(&self, time: Timestamp) -> bool {
        self.start <= time && time < self.end
    }
}
