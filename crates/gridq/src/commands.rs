use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use schedd::cluster::SnapshotReader;
use schedd::scheduler::{
    Coordinator, EpochSummary, FairShareTicketPolicy, OrderBatch, SchedulerMessage,
    dispatch_epoch, scheduler_loop,
};

use crate::output::PrintingCoordinator;
use crate::snapshot::FileSnapshotReader;

/// Runs one epoch over the snapshot and prints its orders and messages.
pub fn dispatch_once<W: Write>(
    reader: &mut FileSnapshotReader,
    coordinator: &mut PrintingCoordinator<W>,
    print_summary: bool,
) -> crate::Result<EpochSummary> {
    let snapshot = reader.read_snapshot()?;
    let mut policy = FairShareTicketPolicy::new();
    let summary = dispatch_epoch(
        snapshot,
        &mut policy,
        coordinator,
        &CancellationToken::new(),
    )?;
    if print_summary {
        coordinator.print_summary(&summary);
    }
    Ok(summary)
}

/// Cancels the scheduler loop once the given number of epochs was committed.
struct EpochLimit<'a, C> {
    inner: &'a mut C,
    remaining: Option<u64>,
    cancel: CancellationToken,
}

impl<C: Coordinator> Coordinator for EpochLimit<'_, C> {
    fn send_orders(&mut self, batch: OrderBatch) {
        let committed = !batch.has_more;
        self.inner.send_orders(batch);
        if let (true, Some(remaining)) = (committed, self.remaining.as_mut()) {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                self.cancel.cancel();
            }
        }
    }

    fn post_message(&mut self, message: SchedulerMessage) {
        self.inner.post_message(message);
    }
}

pub struct WatchOptions {
    pub interval: Duration,
    pub minimum_delay: Duration,
    pub max_epochs: Option<u64>,
}

/// Schedules the snapshot file repeatedly until `cancel` is triggered or
/// `max_epochs` epochs were run. Returns the number of completed epochs.
pub async fn watch<W: Write>(
    reader: &mut FileSnapshotReader,
    coordinator: &mut PrintingCoordinator<W>,
    options: WatchOptions,
    cancel: CancellationToken,
) -> u64 {
    if options.max_epochs == Some(0) {
        return 0;
    }
    log::info!(
        "Scheduling {} every {}",
        reader.path().display(),
        humantime::format_duration(options.interval)
    );
    let mut policy = FairShareTicketPolicy::new();
    let mut limited = EpochLimit {
        inner: coordinator,
        remaining: options.max_epochs,
        cancel: cancel.clone(),
    };
    scheduler_loop(
        reader,
        &mut policy,
        &mut limited,
        Arc::new(Notify::new()),
        options.interval,
        options.minimum_delay,
        cancel,
    )
    .await
}
