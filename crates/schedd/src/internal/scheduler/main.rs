use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::internal::cluster::snapshot::SnapshotReader;
use crate::internal::scheduler::dispatch::{EpochSummary, dispatch_epoch};
use crate::internal::scheduler::messages::{SchedulerMessage, Severity};
use crate::internal::scheduler::orders::Coordinator;
use crate::internal::scheduler::tickets::TicketPolicy;

/// Runs epochs until `cancel` is triggered.
///
/// An epoch starts after a `wakeup` notification or when `interval` has passed
/// since the previous one, but never sooner than `minimum_delay` after it.
/// A snapshot that cannot be read or an aborted epoch is reported and the loop
/// waits for the next trigger. Returns the number of completed epochs.
pub async fn scheduler_loop(
    reader: &mut impl SnapshotReader,
    policy: &mut impl TicketPolicy,
    coordinator: &mut impl Coordinator,
    wakeup: Arc<Notify>,
    interval: Duration,
    minimum_delay: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut last_schedule = Instant::now();
    let mut epochs = 0;
    let mut first = true;
    loop {
        if !first {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = wakeup.notified() => {}
                _ = sleep(interval) => {}
            }
            let since_last_schedule = last_schedule.elapsed();
            if minimum_delay > since_last_schedule {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(minimum_delay - since_last_schedule) => {}
                }
            }
        }
        first = false;
        if cancel.is_cancelled() {
            break;
        }
        last_schedule = Instant::now();
        match run_epoch(reader, policy, coordinator, &cancel) {
            Some(summary) => {
                epochs += 1;
                log::info!(
                    "Epoch {epochs}: {} started, {} reserved, {} pending jobs looked at in {:.1?}",
                    summary.stats.started,
                    summary.stats.reservations,
                    summary.stats.pending_jobs,
                    last_schedule.elapsed()
                );
            }
            None => continue,
        }
    }
    log::debug!("Scheduler loop finished after {epochs} epochs");
    epochs
}

/// Reads one snapshot and dispatches it; failures are logged and reported to the coordinator.
pub fn run_epoch(
    reader: &mut impl SnapshotReader,
    policy: &mut impl TicketPolicy,
    coordinator: &mut impl Coordinator,
    cancel: &CancellationToken,
) -> Option<EpochSummary> {
    let snapshot = match reader.read_snapshot() {
        Ok(snapshot) => snapshot,
        Err(error) => {
            log::error!("Cannot read cluster snapshot: {error}");
            coordinator.post_message(SchedulerMessage::epoch(
                Severity::Error,
                format!("cannot read cluster snapshot: {error}"),
            ));
            return None;
        }
    };
    match dispatch_epoch(snapshot, policy, coordinator, cancel) {
        Ok(summary) => Some(summary),
        Err(error) => {
            log::error!("Scheduling epoch failed: {error}");
            None
        }
    }
}
