pub mod amount;
pub mod map;

use crate::define_id_type;

pub use amount::{FRACTIONS_MAX_DIGITS, FRACTIONS_PER_UNIT, ResourceAmount, ResourceUnits};
pub use map::{ResourceMap, SLOTS_RESOURCE_ID, SLOTS_RESOURCE_NAME};

// Identifies a resource (complex entry) within one epoch.
define_id_type!(ResourceId, u32);
