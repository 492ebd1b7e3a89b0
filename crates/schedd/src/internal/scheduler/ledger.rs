use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::Excluded;

use crate::internal::cluster::ar::ArIdx;
use crate::internal::cluster::complex::ConsumableKind;
use crate::internal::cluster::host::{Host, HostIdx, NORMALIZED_LOAD_PREFIX};
use crate::internal::cluster::job::{Job, JobIdx, JobTask};
use crate::internal::cluster::pe::PeIdx;
use crate::internal::cluster::queue::QueueIdx;
use crate::internal::cluster::rqs::{RqsIdx, RqsScope};
use crate::internal::cluster::snapshot::{ClusterSnapshot, SnapshotIndex};
use crate::internal::cluster::{END_OF_TIME, Timestamp};
use crate::internal::common::Map;
use crate::internal::common::error::SchedError;
use crate::internal::common::index::IndexVec;
use crate::internal::scheduler::assign::request::{ResolvedRequest, resolve_request};
use crate::internal::scheduler::assign::{Assignment, GrantedQueue};
use crate::resources::{ResourceAmount, ResourceId, SLOTS_RESOURCE_ID};

/// Counter of one resource quota rule for one expanded entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RqsKey {
    pub rqs: RqsIdx,
    pub rule: u32,
    pub entity: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LedgerKey {
    Global(ResourceId),
    Host(HostIdx, ResourceId),
    Queue(QueueIdx, ResourceId),
    Pe(PeIdx),
    ArSlots(ArIdx, QueueIdx),
    Rqs(RqsKey, ResourceId),
}

impl LedgerKey {
    #[inline]
    pub fn queue_slots(queue: QueueIdx) -> Self {
        LedgerKey::Queue(queue, SLOTS_RESOURCE_ID)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub key: LedgerKey,
    pub amount: ResourceAmount,
}

impl Booking {
    #[inline]
    pub fn new(key: LedgerKey, amount: ResourceAmount) -> Self {
        Booking { key, amount }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Step {
    add: ResourceAmount,
    remove: ResourceAmount,
}

/// Capacity of one ledger key and its usage over time as a step function.
#[derive(Debug, Clone)]
pub struct Utilization {
    capacity: ResourceAmount,
    steps: BTreeMap<Timestamp, Step>,
}

impl Utilization {
    pub fn new(capacity: ResourceAmount) -> Self {
        Utilization {
            capacity,
            steps: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> ResourceAmount {
        self.capacity
    }

    pub fn usage_at(&self, time: Timestamp) -> ResourceAmount {
        let mut usage = ResourceAmount::ZERO;
        for (_, step) in self.steps.range(..=time) {
            usage = (usage + step.add).saturating_sub(step.remove);
        }
        usage
    }

    /// Highest usage within `[start, end)`.
    pub fn max_usage(&self, start: Timestamp, end: Timestamp) -> ResourceAmount {
        let mut usage = self.usage_at(start);
        let mut max = usage;
        if end > start {
            for (_, step) in self.steps.range((Excluded(start), Excluded(end))) {
                usage = (usage + step.add).saturating_sub(step.remove);
                max = max.max(usage);
            }
        }
        max
    }

    fn book(&mut self, start: Timestamp, end: Timestamp, amount: ResourceAmount) {
        if amount.is_zero() || start >= end {
            return;
        }
        self.steps.entry(start).or_default().add += amount;
        if end != END_OF_TIME {
            self.steps.entry(end).or_default().remove += amount;
        }
    }

    fn unbook(&mut self, start: Timestamp, end: Timestamp, amount: ResourceAmount) {
        if amount.is_zero() || start >= end {
            return;
        }
        if let Some(step) = self.steps.get_mut(&start) {
            step.add = step.add.saturating_sub(amount);
            if *step == Step::default() {
                self.steps.remove(&start);
            }
        }
        if end != END_OF_TIME {
            if let Some(step) = self.steps.get_mut(&end) {
                step.remove = step.remove.saturating_sub(amount);
                if *step == Step::default() {
                    self.steps.remove(&end);
                }
            }
        }
    }

    fn change_times(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.steps.keys().copied()
    }
}

/// Book-keeping of consumable capacities and their use, now and in the future.
///
/// Every key has a capacity; bookings are `[start, end)` windows. Running jobs,
/// advance reservations and everything dispatched in the current epoch are
/// booked here, so each match sees the effect of all previous decisions.
#[derive(Debug)]
pub struct ResourceLedger {
    now: Timestamp,
    entries: Map<LedgerKey, Utilization>,
    rqs_limits: Map<(RqsIdx, u32, ResourceId), ResourceAmount>,
    load_adjustments: IndexVec<HostIdx, Map<String, f64>>,
    per_slot_adjustments: Vec<(String, f64)>,
}

impl ResourceLedger {
    /// Capacities and advance reservations only.
    pub fn new(snapshot: &ClusterSnapshot, index: &SnapshotIndex) -> Self {
        let now = snapshot.now;
        let mut entries = Map::new();
        let mut set_capacity = |key: LedgerKey, capacity: ResourceAmount| {
            entries.insert(key, Utilization::new(capacity));
        };

        for (name, amount) in snapshot.global.consumables.iter() {
            match index.resource(name) {
                Some(r) => set_capacity(LedgerKey::Global(r), *amount),
                None => log::warn!("Ignoring global capacity of unknown resource '{name}'"),
            }
        }
        for (host_idx, host) in snapshot.hosts.iter_enumerated() {
            for (name, amount) in host.consumables.iter() {
                match index.resource(name) {
                    Some(r) => set_capacity(LedgerKey::Host(host_idx, r), *amount),
                    None => log::warn!(
                        "Ignoring capacity of unknown resource '{name}' on host {}",
                        host.name
                    ),
                }
            }
        }
        for (queue_idx, queue) in snapshot.queues.iter_enumerated() {
            set_capacity(
                LedgerKey::queue_slots(queue_idx),
                ResourceAmount::new_units(queue.slots as u64),
            );
            for (name, amount) in queue.consumables.iter() {
                match index.resource(name) {
                    Some(r) if r == SLOTS_RESOURCE_ID => {}
                    Some(r) => set_capacity(LedgerKey::Queue(queue_idx, r), *amount),
                    None => log::warn!(
                        "Ignoring capacity of unknown resource '{name}' on queue {}",
                        queue.full_name()
                    ),
                }
            }
        }
        for (pe_idx, pe) in snapshot.pes.iter_enumerated() {
            set_capacity(
                LedgerKey::Pe(pe_idx),
                ResourceAmount::new_units(pe.slots as u64),
            );
        }
        for (ar_idx, ar) in snapshot.ars.iter_enumerated() {
            for granted in &ar.granted {
                if let Some(queue_idx) = index.queue(&granted.queue) {
                    set_capacity(
                        LedgerKey::ArSlots(ar_idx, queue_idx),
                        ResourceAmount::new_units(granted.slots as u64),
                    );
                } else {
                    log::warn!(
                        "Advance reservation {} references unknown queue {}",
                        ar.id,
                        granted.queue
                    );
                }
            }
        }

        let mut rqs_limits = Map::new();
        for (rqs_idx, rqs) in snapshot.rqs.iter_enumerated() {
            for (rule_idx, rule) in rqs.rules.iter().enumerate() {
                for limit in &rule.limits {
                    match index.resource(&limit.resource) {
                        Some(r) => {
                            rqs_limits.insert((rqs_idx, rule_idx as u32, r), limit.amount);
                        }
                        None => log::warn!(
                            "Ignoring limit of unknown resource '{}' in quota set {}",
                            limit.resource,
                            rqs.name
                        ),
                    }
                }
            }
        }

        let mut ledger = ResourceLedger {
            now,
            entries,
            rqs_limits,
            load_adjustments: IndexVec::filled(Map::new(), snapshot.hosts.len()),
            per_slot_adjustments: snapshot
                .config
                .load_adjustments
                .iter()
                .map(|(name, value)| (name.clone(), *value))
                .collect(),
        };
        ledger.per_slot_adjustments.sort_by(|a, b| a.0.cmp(&b.0));

        for ar in snapshot.ars.iter() {
            if ar.end <= now {
                continue;
            }
            let start = ar.start.max(now);
            for granted in &ar.granted {
                if let Some(queue_idx) = index.queue(&granted.queue) {
                    ledger.book_unchecked(
                        &LedgerKey::queue_slots(queue_idx),
                        start,
                        ar.end,
                        ResourceAmount::new_units(granted.slots as u64),
                    );
                }
            }
        }
        ledger
    }

    /// Ledger with running and suspended tasks of the snapshot booked.
    pub fn init(
        snapshot: &ClusterSnapshot,
        index: &SnapshotIndex,
        jobs: &IndexVec<JobIdx, Job>,
    ) -> Self {
        let mut ledger = Self::new(snapshot, index);
        let now = ledger.now;
        let config = &snapshot.config;
        for job in jobs.iter() {
            if !job.tasks.iter().any(|t| t.holds_resources()) {
                continue;
            }
            let request = match resolve_request(job, snapshot, index) {
                Ok(request) => request,
                Err(error) => {
                    log::warn!(
                        "Running job {} has an invalid request ({error}), booking slots only",
                        job.id
                    );
                    ResolvedRequest::default()
                }
            };
            for task in job.active_tasks() {
                let Some(gdil) = granted_queues(snapshot, index, task) else {
                    log::warn!(
                        "Running task {}.{} references unknown queues, not booked",
                        job.id,
                        task.number
                    );
                    continue;
                };
                let start_time = task.start_time.unwrap_or(now);
                let duration = job.request.duration.unwrap_or(config.default_duration);
                let end = start_time.saturating_add(duration).max(now + 1);
                let bookings = compute_bookings(snapshot, index, &ledger, job, &request, &gdil);
                for booking in &bookings {
                    ledger.book_unchecked(&booking.key, now, end, booking.amount);
                }
                let decay = config.load_adjustment_decay_time;
                let age = now.saturating_sub(start_time);
                if decay > 0 && age < decay {
                    let weight = 1.0 - age as f64 / decay as f64;
                    for granted in &gdil {
                        ledger.add_load_adjustment(granted.host, granted.slots, weight);
                    }
                }
            }
        }
        ledger
    }

    #[inline]
    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn capacity(&self, key: &LedgerKey) -> Option<ResourceAmount> {
        if let Some(u) = self.entries.get(key) {
            return Some(u.capacity());
        }
        match key {
            LedgerKey::Rqs(rqs_key, r) => self
                .rqs_limits
                .get(&(rqs_key.rqs, rqs_key.rule, *r))
                .copied(),
            _ => None,
        }
    }

    #[inline]
    pub fn is_defined(&self, key: &LedgerKey) -> bool {
        self.capacity(key).is_some()
    }

    pub fn max_usage(&self, key: &LedgerKey, start: Timestamp, end: Timestamp) -> ResourceAmount {
        self.entries
            .get(key)
            .map(|u| u.max_usage(start, end))
            .unwrap_or(ResourceAmount::ZERO)
    }

    pub fn usage_now(&self, key: &LedgerKey) -> ResourceAmount {
        self.entries
            .get(key)
            .map(|u| u.usage_at(self.now))
            .unwrap_or(ResourceAmount::ZERO)
    }

    pub fn free_slots_now(&self, queue: QueueIdx) -> u32 {
        let key = LedgerKey::queue_slots(queue);
        let capacity = self.capacity(&key).unwrap_or(ResourceAmount::ZERO);
        capacity.saturating_sub(self.usage_now(&key)).units() as u32
    }

    /// True if all bookings fit into `[start, end)`.
    pub fn fits(&self, bookings: &[Booking], start: Timestamp, end: Timestamp) -> bool {
        aggregate(bookings).into_iter().all(|(key, amount)| {
            self.capacity(key).is_some_and(|capacity| {
                self.max_usage(key, start, end).saturating_add(amount) <= capacity
            })
        })
    }

    /// Earliest start not before `not_before` at which the bookings fit for `duration`.
    pub fn earliest_fit(
        &self,
        bookings: &[Booking],
        not_before: Timestamp,
        duration: u64,
    ) -> Option<Timestamp> {
        let mut candidates = BTreeSet::new();
        candidates.insert(not_before);
        for booking in bookings {
            if let Some(u) = self.entries.get(&booking.key) {
                candidates.extend(u.change_times().filter(|t| *t > not_before));
            }
        }
        candidates
            .into_iter()
            .find(|start| self.fits(bookings, *start, start.saturating_add(duration)))
    }

    /// All times after `after` at which some usage changes.
    pub fn change_times_after(&self, after: Timestamp) -> BTreeSet<Timestamp> {
        self.entries
            .values()
            .flat_map(|u| u.change_times())
            .filter(|t| *t > after)
            .collect()
    }

    /// Books the assignment; fails without side effects if any booking would exceed its capacity.
    pub fn debit(&mut self, assignment: &Assignment) -> crate::Result<()> {
        let start = assignment.start;
        let end = assignment.end();
        for (key, amount) in aggregate(&assignment.bookings) {
            let capacity = self.capacity(key).unwrap_or(ResourceAmount::ZERO);
            let used = self.max_usage(key, start, end);
            if used.saturating_add(amount) > capacity {
                return Err(SchedError::LedgerInvariant {
                    key: key.clone(),
                    amount,
                    used,
                    capacity,
                });
            }
        }
        for booking in &assignment.bookings {
            self.book_unchecked(&booking.key, start, end, booking.amount);
        }
        if !assignment.is_reservation {
            for granted in &assignment.gdil {
                self.add_load_adjustment(granted.host, granted.slots, 1.0);
            }
        }
        Ok(())
    }

    /// Exact inverse of a successful `debit`.
    pub fn credit(&mut self, assignment: &Assignment) {
        let start = assignment.start;
        let end = assignment.end();
        for booking in &assignment.bookings {
            if let Some(u) = self.entries.get_mut(&booking.key) {
                u.unbook(start, end, booking.amount);
            }
        }
        if !assignment.is_reservation {
            for granted in &assignment.gdil {
                self.add_load_adjustment(granted.host, granted.slots, -1.0);
            }
        }
    }

    fn book_unchecked(
        &mut self,
        key: &LedgerKey,
        start: Timestamp,
        end: Timestamp,
        amount: ResourceAmount,
    ) {
        if !self.entries.contains_key(key) {
            let Some(capacity) = self.capacity(key) else {
                return;
            };
            self.entries.insert(key.clone(), Utilization::new(capacity));
        }
        if let Some(u) = self.entries.get_mut(key) {
            u.book(start, end, amount);
        }
    }

    fn add_load_adjustment(&mut self, host: HostIdx, slots: u32, weight: f64) {
        let adjustments = &mut self.load_adjustments[host];
        for (name, per_slot) in &self.per_slot_adjustments {
            let value = adjustments.entry(name.clone()).or_insert(0.0);
            *value += per_slot * slots as f64 * weight;
            if value.abs() < 1e-9 {
                adjustments.remove(name);
            }
        }
    }

    /// Host load value including the adjustments of recently started jobs.
    pub fn adjusted_load(&self, host_idx: HostIdx, host: &Host, name: &str) -> Option<f64> {
        let raw = host.load_value(name)?;
        let adjustments = &self.load_adjustments[host_idx];
        let mut value = raw + adjustments.get(name).copied().unwrap_or(0.0);
        if let Some(base) = name.strip_prefix(NORMALIZED_LOAD_PREFIX) {
            if !host.load_values.contains_key(name) {
                if let Some(adj) = adjustments.get(base) {
                    value += adj / host.num_proc.max(1) as f64;
                }
            }
        }
        Some(value)
    }
}

/// Sums amounts per key, keeping the order of first appearance.
fn aggregate(bookings: &[Booking]) -> Vec<(&LedgerKey, ResourceAmount)> {
    let mut result: Vec<(&LedgerKey, ResourceAmount)> = Vec::with_capacity(bookings.len());
    for booking in bookings {
        match result.iter_mut().find(|(key, _)| *key == &booking.key) {
            Some((_, amount)) => *amount += booking.amount,
            None => result.push((&booking.key, booking.amount)),
        }
    }
    result
}

fn granted_queues(
    snapshot: &ClusterSnapshot,
    index: &SnapshotIndex,
    task: &JobTask,
) -> Option<Vec<GrantedQueue>> {
    task.granted
        .iter()
        .map(|g| {
            let queue = index.queue(&g.queue)?;
            Some(GrantedQueue::new(snapshot, index, queue, g.slots))
        })
        .collect()
}

/// Everything a job with the given destination list books in the ledger.
///
/// Slots go to the queue (or to the advance reservation the job runs in) and to
/// host/global `slots` consumables where defined. Per-slot consumables are
/// multiplied by the granted slots, per-job ones are booked on the master queue
/// only, per-host ones once on every used host. Explicit requests are booked on
/// all scopes that define them, missing scopes are checked during matching.
pub fn compute_bookings(
    snapshot: &ClusterSnapshot,
    index: &SnapshotIndex,
    ledger: &ResourceLedger,
    job: &Job,
    request: &ResolvedRequest,
    gdil: &[GrantedQueue],
) -> Vec<Booking> {
    let mut bookings = Vec::new();
    let total_slots: u32 = gdil.iter().map(|g| g.slots).sum();
    let extra_master_slot = request
        .pe
        .as_ref()
        .is_some_and(|pe| !pe.job_is_first_task) as u32;
    let pe_name = request.pe.as_ref().map(|pe| snapshot.pes[pe.pe].name.as_str());

    let push_scoped = |bookings: &mut Vec<Booking>,
                           queue: QueueIdx,
                           host: HostIdx,
                           resource: ResourceId,
                           amount: ResourceAmount| {
        for key in [
            LedgerKey::Queue(queue, resource),
            LedgerKey::Host(host, resource),
            LedgerKey::Global(resource),
        ] {
            if ledger.is_defined(&key) {
                bookings.push(Booking::new(key, amount));
            }
        }
    };

    for (position, granted) in gdil.iter().enumerate() {
        let is_master = position == 0;
        let first_on_host = gdil[..position].iter().all(|g| g.host != granted.host);
        let slots = ResourceAmount::new_units(granted.slots as u64);

        match request.ar {
            Some(ar) => bookings.push(Booking::new(LedgerKey::ArSlots(ar, granted.queue), slots)),
            None => bookings.push(Booking::new(LedgerKey::queue_slots(granted.queue), slots)),
        }
        for key in [
            LedgerKey::Host(granted.host, SLOTS_RESOURCE_ID),
            LedgerKey::Global(SLOTS_RESOURCE_ID),
        ] {
            if ledger.is_defined(&key) {
                bookings.push(Booking::new(key, slots));
            }
        }

        for consumable in &request.consumables {
            let amount = match consumable.kind {
                ConsumableKind::PerSlot => {
                    let factor = granted.slots + if is_master { extra_master_slot } else { 0 };
                    consumable.amount.saturating_mul(factor)
                }
                ConsumableKind::PerJob if is_master => consumable.amount,
                ConsumableKind::PerHost if first_on_host => consumable.amount,
                _ => continue,
            };
            push_scoped(
                &mut bookings,
                granted.queue,
                granted.host,
                consumable.resource,
                amount,
            );
        }

        for (rqs_idx, rqs) in snapshot.rqs.iter_enumerated() {
            let queue = &snapshot.queues[granted.queue];
            let scope = RqsScope {
                user: &job.owner,
                project: job.project.as_deref(),
                pe: pe_name,
                queue: &queue.queue,
                host: &queue.host,
            };
            let Some((rule_idx, rule)) = rqs.matching_rule(&scope) else {
                continue;
            };
            let entity = rule.entity(&scope);
            for limit in &rule.limits {
                let Some(resource) = index.resource(&limit.resource) else {
                    continue;
                };
                let amount = if resource == SLOTS_RESOURCE_ID {
                    slots
                } else {
                    let Some(consumable) =
                        request.consumables.iter().find(|c| c.resource == resource)
                    else {
                        continue;
                    };
                    match consumable.kind {
                        ConsumableKind::PerSlot => consumable.amount.saturating_mul(granted.slots),
                        ConsumableKind::PerJob if is_master => consumable.amount,
                        ConsumableKind::PerHost if first_on_host => consumable.amount,
                        _ => continue,
                    }
                };
                let key = RqsKey {
                    rqs: rqs_idx,
                    rule: rule_idx,
                    entity: entity.clone(),
                };
                bookings.push(Booking::new(LedgerKey::Rqs(key, resource), amount));
            }
        }
    }

    if let Some(pe) = &request.pe {
        bookings.push(Booking::new(
            LedgerKey::Pe(pe.pe),
            ResourceAmount::new_units(total_slots as u64),
        ));
    }
    bookings
}
