use std::fmt::Write as _;
use std::io::Write;

use serde_json::json;

use schedd::cluster::GrantedSlots;
use schedd::scheduler::{Coordinator, EpochSummary, Order, OrderBatch, SchedulerMessage};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outputs {
    Cli,
    Json,
    Quiet,
}

fn format_granted(granted: &[GrantedSlots]) -> String {
    let mut out = String::new();
    for (i, g) in granted.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}:{}", g.queue, g.slots);
    }
    out
}

pub fn format_order(order: &Order) -> String {
    match order {
        Order::StartJob {
            job_id,
            task,
            start_time,
            tickets,
            granted,
            pe,
            checkpoint,
        } => {
            let mut out = format!(
                "start     {job_id}.{task} at {start_time} on {} tickets {tickets:.0}",
                format_granted(granted)
            );
            if let Some(pe) = pe {
                let _ = write!(out, " pe {pe}");
            }
            if let Some(checkpoint) = checkpoint {
                let _ = write!(out, " ckpt {checkpoint}");
            }
            out
        }
        Order::SuspendJob { job_id, task, queue } => {
            format!("suspend   {job_id}.{task} on {queue}")
        }
        Order::UnsuspendJob { job_id, task, queue } => {
            format!("unsuspend {job_id}.{task} on {queue}")
        }
        Order::ClearPriorityInfo { job_id } => format!("clear     {job_id}"),
        Order::RemoveImmediateJob { job_id, task } => format!("remove    {job_id}.{task}"),
        Order::ConfigUpdate {
            job_id,
            task,
            tickets,
        } => format!("tickets   {job_id}.{task} {tickets:.0}"),
        Order::PendingTicketUpdate { job_id, tickets } => {
            format!("pending   {job_id} {tickets:.0}")
        }
    }
}

/// Coordinator that prints orders and messages instead of applying them.
///
/// Write failures do not interrupt the epoch; the first one is returned by
/// [`PrintingCoordinator::finish`].
pub struct PrintingCoordinator<W: Write> {
    mode: Outputs,
    writer: W,
    orders: usize,
    batches: usize,
    commits: usize,
    error: Option<std::io::Error>,
}

impl<W: Write> PrintingCoordinator<W> {
    pub fn new(mode: Outputs, writer: W) -> Self {
        PrintingCoordinator {
            mode,
            writer,
            orders: 0,
            batches: 0,
            commits: 0,
            error: None,
        }
    }

    pub fn orders_sent(&self) -> usize {
        self.orders
    }

    pub fn batches_sent(&self) -> usize {
        self.batches
    }

    /// Number of batches that closed an epoch.
    pub fn epochs_committed(&self) -> usize {
        self.commits
    }

    fn emit(&mut self, result: std::io::Result<()>) {
        if let Err(error) = result {
            if self.error.is_none() {
                log::error!("Cannot write output: {error}");
                self.error = Some(error);
            }
        }
    }

    fn write_json(&mut self, value: serde_json::Value) {
        let result = writeln!(self.writer, "{value}");
        self.emit(result);
    }

    pub fn print_summary(&mut self, summary: &EpochSummary) {
        match self.mode {
            Outputs::Cli => {
                let stats = &summary.stats;
                let mut out = format!(
                    "epoch: {} pending jobs, {} started, {} reserved, {} not dispatched\n",
                    stats.pending_jobs, stats.started, stats.reservations, stats.not_dispatched
                );
                let _ = writeln!(
                    out,
                    "matching: {} attempts, {} category skips, {} reservation attempts",
                    stats.match_attempts, stats.category_skips, stats.reservation_attempts
                );
                if stats.immediate_removed > 0 || stats.invalid_requests > 0 {
                    let _ = writeln!(
                        out,
                        "removed: {} immediate jobs, {} invalid requests",
                        stats.immediate_removed, stats.invalid_requests
                    );
                }
                for record in &summary.reservations {
                    let _ = writeln!(
                        out,
                        "reserved  {}.{} from {} to {} on {}",
                        record.job_id,
                        record.task,
                        record.start,
                        record.end,
                        format_granted(&record.granted)
                    );
                }
                if summary.cancelled {
                    out.push_str("epoch was cancelled\n");
                }
                let result = self.writer.write_all(out.as_bytes());
                self.emit(result);
            }
            Outputs::Json => self.write_json(json!({
                "type": "summary",
                "stats": summary.stats,
                "reservations": summary.reservations,
                "cancelled": summary.cancelled,
            })),
            Outputs::Quiet => {}
        }
    }

    pub fn finish(mut self) -> crate::Result<W> {
        if let Some(error) = self.error.take() {
            return Err(error.into());
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Coordinator for PrintingCoordinator<W> {
    fn send_orders(&mut self, batch: OrderBatch) {
        self.orders += batch.orders.len();
        self.batches += 1;
        match self.mode {
            Outputs::Cli => {
                let mut out = String::new();
                for order in &batch.orders {
                    out.push_str(&format_order(order));
                    out.push('\n');
                }
                let result = self.writer.write_all(out.as_bytes());
                self.emit(result);
            }
            Outputs::Json => self.write_json(json!({
                "type": "orders",
                "category": batch.category,
                "has_more": batch.has_more,
                "orders": batch.orders,
            })),
            Outputs::Quiet => {}
        }
        if !batch.has_more {
            self.commits += 1;
            log::debug!("Epoch committed after {} batches", self.batches);
        }
    }

    fn post_message(&mut self, message: SchedulerMessage) {
        match self.mode {
            Outputs::Cli => {
                let result = writeln!(self.writer, "{message}");
                self.emit(result);
            }
            Outputs::Json => self.write_json(json!({
                "type": "message",
                "message": message,
            })),
            Outputs::Quiet => {}
        }
    }
}
