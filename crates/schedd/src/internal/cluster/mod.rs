pub mod ar;
pub mod complex;
pub mod config;
pub mod host;
pub mod job;
pub mod pe;
pub mod queue;
pub mod rqs;
pub mod snapshot;

/// Seconds since the epoch, as reported by the coordinator.
pub type Timestamp = u64;

/// Open end of a timeline.
pub const END_OF_TIME: Timestamp = Timestamp::MAX;
