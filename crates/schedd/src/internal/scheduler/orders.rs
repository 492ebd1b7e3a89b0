use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::internal::cluster::Timestamp;
use crate::internal::cluster::job::{GrantedSlots, JobId, TaskNumber};
use crate::internal::scheduler::messages::SchedulerMessage;

/// Decision of the scheduler, applied by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Order {
    StartJob {
        job_id: JobId,
        task: TaskNumber,
        start_time: Timestamp,
        tickets: f64,
        /// Master queue first.
        granted: Vec<GrantedSlots>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pe: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
    },
    SuspendJob {
        job_id: JobId,
        task: TaskNumber,
        queue: String,
    },
    UnsuspendJob {
        job_id: JobId,
        task: TaskNumber,
        queue: String,
    },
    ClearPriorityInfo {
        job_id: JobId,
    },
    RemoveImmediateJob {
        job_id: JobId,
        task: TaskNumber,
    },
    ConfigUpdate {
        job_id: JobId,
        task: TaskNumber,
        tickets: f64,
    },
    PendingTicketUpdate {
        job_id: JobId,
        tickets: f64,
    },
}

impl Order {
    pub fn category(&self) -> OrderCategory {
        match self {
            Order::StartJob { .. } | Order::RemoveImmediateJob { .. } => OrderCategory::JobStart,
            Order::SuspendJob { .. }
            | Order::UnsuspendJob { .. }
            | Order::ClearPriorityInfo { .. }
            | Order::ConfigUpdate { .. } => OrderCategory::Config,
            Order::PendingTicketUpdate { .. } => OrderCategory::PendingTicket,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Order::StartJob { job_id, .. }
            | Order::SuspendJob { job_id, .. }
            | Order::UnsuspendJob { job_id, .. }
            | Order::ClearPriorityInfo { job_id }
            | Order::RemoveImmediateJob { job_id, .. }
            | Order::ConfigUpdate { job_id, .. }
            | Order::PendingTicketUpdate { job_id, .. } => *job_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderCategory {
    Config,
    JobStart,
    PendingTicket,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBatch {
    pub category: OrderCategory,
    pub orders: Vec<Order>,
    /// More batches of this epoch follow; the receiver commits after the last one.
    pub has_more: bool,
}

/// Receiver of the scheduler's decisions.
pub trait Coordinator {
    fn send_orders(&mut self, batch: OrderBatch);
    fn post_message(&mut self, message: SchedulerMessage);
}

/// Coordinator that keeps everything in memory.
#[derive(Debug, Default)]
pub struct OrderCollector {
    pub batches: Vec<OrderBatch>,
    pub messages: Vec<SchedulerMessage>,
}

impl OrderCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// All orders in the order they were sent.
    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.batches.iter().flat_map(|b| b.orders.iter())
    }

    pub fn start_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders()
            .filter(|o| matches!(o, Order::StartJob { .. }))
    }

    pub fn is_committed(&self) -> bool {
        self.batches.last().is_some_and(|b| !b.has_more)
    }
}

impl Coordinator for OrderCollector {
    fn send_orders(&mut self, batch: OrderBatch) {
        self.batches.push(batch);
    }

    fn post_message(&mut self, message: SchedulerMessage) {
        self.messages.push(message);
    }
}

/// Accumulates orders of one epoch in three lists that are flushed independently.
pub struct OrderBuilder {
    config: Vec<Order>,
    job_start: Vec<Order>,
    pending_ticket: Vec<Order>,
    flush_interval: Duration,
    last_flush: Instant,
    sent_batches: u32,
}

impl OrderBuilder {
    pub fn new(flush_interval: Duration) -> Self {
        OrderBuilder {
            config: Vec::new(),
            job_start: Vec::new(),
            pending_ticket: Vec::new(),
            flush_interval,
            last_flush: Instant::now(),
            sent_batches: 0,
        }
    }

    pub fn push(&mut self, order: Order) {
        self.list_mut(order.category()).push(order);
    }

    pub fn extend(&mut self, orders: impl IntoIterator<Item = Order>) {
        for order in orders {
            self.push(order);
        }
    }

    fn list_mut(&mut self, category: OrderCategory) -> &mut Vec<Order> {
        match category {
            OrderCategory::Config => &mut self.config,
            OrderCategory::JobStart => &mut self.job_start,
            OrderCategory::PendingTicket => &mut self.pending_ticket,
        }
    }

    /// Removes not yet flushed start orders of a job; returns how many were removed.
    pub fn retract_job_starts(&mut self, job_id: JobId) -> usize {
        let before = self.job_start.len();
        self.job_start
            .retain(|o| !(matches!(o, Order::StartJob { .. }) && o.job_id() == job_id));
        before - self.job_start.len()
    }

    pub fn pending_count(&self, category: OrderCategory) -> usize {
        match category {
            OrderCategory::Config => self.config.len(),
            OrderCategory::JobStart => self.job_start.len(),
            OrderCategory::PendingTicket => self.pending_ticket.len(),
        }
    }

    #[inline]
    pub fn sent_batches(&self) -> u32 {
        self.sent_batches
    }

    /// Sends one list as a batch with `has_more` set, if it is not empty.
    pub fn flush(&mut self, category: OrderCategory, coordinator: &mut impl Coordinator) {
        let orders = std::mem::take(self.list_mut(category));
        if orders.is_empty() {
            return;
        }
        log::debug!("Flushing {} {:?} orders", orders.len(), category);
        coordinator.send_orders(OrderBatch {
            category,
            orders,
            has_more: true,
        });
        self.sent_batches += 1;
        if category == OrderCategory::JobStart {
            self.last_flush = Instant::now();
        }
    }

    /// Flushes start orders when `flush_interval` has passed since the last flush.
    pub fn flush_job_starts_if_due(&mut self, coordinator: &mut impl Coordinator) -> bool {
        if self.job_start.is_empty() || self.last_flush.elapsed() < self.flush_interval {
            return false;
        }
        self.flush(OrderCategory::JobStart, coordinator);
        true
    }

    /// Sends everything that is left; the last batch has `has_more == false`.
    ///
    /// An empty final batch is sent when nothing is left, so that the receiver
    /// always sees the end of the epoch. Returns the number of batches sent in total.
    pub fn finish(mut self, coordinator: &mut impl Coordinator) -> u32 {
        let lists = [
            (OrderCategory::Config, std::mem::take(&mut self.config)),
            (OrderCategory::JobStart, std::mem::take(&mut self.job_start)),
            (
                OrderCategory::PendingTicket,
                std::mem::take(&mut self.pending_ticket),
            ),
        ];
        let mut batches: Vec<OrderBatch> = lists
            .into_iter()
            .filter(|(_, orders)| !orders.is_empty())
            .map(|(category, orders)| OrderBatch {
                category,
                orders,
                has_more: true,
            })
            .collect();
        match batches.last_mut() {
            Some(last) => last.has_more = false,
            None => batches.push(OrderBatch {
                category: OrderCategory::JobStart,
                orders: Vec::new(),
                has_more: false,
            }),
        }
        self.sent_batches += batches.len() as u32;
        for batch in batches {
            coordinator.send_orders(batch);
        }
        self.sent_batches
    }
}
