use crate::internal::cluster::Timestamp;
use crate::internal::cluster::host::HostIdx;
use crate::internal::cluster::job::Job;
use crate::internal::cluster::pe::AllocationRule;
use crate::internal::cluster::queue::QueueIdx;
use crate::internal::scheduler::assign::request::{PeSelection, ResolvedRequest};
use crate::internal::scheduler::assign::{
    Binding, Gdil, GrantedQueue, MatchContext, MatchMode, SearchResult, slot_capacity,
};
use crate::internal::scheduler::ledger::{Booking, compute_bookings};

/// Slot counts worth trying, largest first.
///
/// `Err` means that the request can never be served by the parallel environment.
fn candidate_counts(
    ctx: &MatchContext,
    request: &ResolvedRequest,
    pe: &PeSelection,
    queues: &[QueueIdx],
) -> Result<Vec<u32>, String> {
    let pe_slots = ctx.snapshot.pes[pe.pe].slots;
    let name = &ctx.snapshot.pes[pe.pe].name;
    if pe.slots.min > pe_slots {
        return Err(format!(
            "parallel environment {name} offers only {pe_slots} slots, {} requested",
            pe.slots
        ));
    }
    let upper = pe.slots.max.unwrap_or(u32::MAX).min(pe_slots);
    let counts: Vec<u32> = (pe.slots.min..=upper)
        .rev()
        .filter(|count| match pe.allocation_rule {
            AllocationRule::Fixed(per_host) => count % per_host == 0,
            _ => true,
        })
        .collect();
    if counts.is_empty() {
        return Err(format!(
            "allocation rule {} of parallel environment {name} cannot grant {} slots",
            pe.allocation_rule, pe.slots
        ));
    }
    let total: u32 = queues
        .iter()
        .map(|q| slot_capacity(ctx, request, *q))
        .sum();
    Ok(counts.into_iter().filter(|c| *c <= total).collect())
}

pub(crate) fn match_parallel(
    ctx: &MatchContext,
    job: &Job,
    request: &ResolvedRequest,
    pe: &PeSelection,
    queues: &[QueueIdx],
    mode: MatchMode,
    duration: u64,
) -> SearchResult {
    let counts = match candidate_counts(ctx, request, pe, queues) {
        Ok(counts) => counts,
        Err(reason) => return SearchResult::NeverThisJob(reason),
    };
    if counts.is_empty() {
        return SearchResult::NoFit;
    }
    let allocator = Allocator::new(ctx, job, request, pe, queues);

    let try_at = |start: Timestamp| {
        let end = start.saturating_add(duration);
        counts.iter().find_map(|count| {
            allocator
                .allocate(*count, start, end)
                .map(|(gdil, bookings)| Binding {
                    gdil,
                    bookings,
                    start,
                })
        })
    };

    let found = match mode {
        MatchMode::Now => try_at(ctx.now),
        MatchMode::Reservation => {
            let mut times = ctx.ledger.change_times_after(ctx.now);
            times.insert(ctx.now);
            times.into_iter().find_map(try_at)
        }
    };
    match found {
        Some(binding) => SearchResult::Found(binding),
        None => SearchResult::NoFit,
    }
}

/// Distributes a fixed number of slots over hosts according to the allocation rule.
struct Allocator<'a> {
    ctx: &'a MatchContext<'a>,
    job: &'a Job,
    request: &'a ResolvedRequest,
    rule: AllocationRule,
    /// Hosts in order of their first queue, each with its queues in order.
    hosts: Vec<(HostIdx, Vec<QueueIdx>)>,
}

impl<'a> Allocator<'a> {
    fn new(
        ctx: &'a MatchContext<'a>,
        job: &'a Job,
        request: &'a ResolvedRequest,
        pe: &PeSelection,
        queues: &[QueueIdx],
    ) -> Self {
        let mut hosts: Vec<(HostIdx, Vec<QueueIdx>)> = Vec::new();
        for &queue in queues {
            let host = ctx.index.host_of(queue);
            match hosts.iter_mut().find(|(h, _)| *h == host) {
                Some((_, host_queues)) => host_queues.push(queue),
                None => hosts.push((host, vec![queue])),
            }
        }
        Allocator {
            ctx,
            job,
            request,
            rule: pe.allocation_rule,
            hosts,
        }
    }

    fn bookings(&self, gdil: &Gdil) -> Vec<Booking> {
        compute_bookings(
            self.ctx.snapshot,
            self.ctx.index,
            self.ctx.ledger,
            self.job,
            self.request,
            gdil,
        )
    }

    fn with_added(&self, gdil: &Gdil, queue: QueueIdx, slots: u32) -> Gdil {
        let mut result = gdil.clone();
        match result.iter_mut().find(|g| g.queue == queue) {
            Some(granted) => granted.slots += slots,
            None => result.push(GrantedQueue::new(
                self.ctx.snapshot,
                self.ctx.index,
                queue,
                slots,
            )),
        }
        result
    }

    fn fits(&self, gdil: &Gdil, start: Timestamp, end: Timestamp) -> bool {
        self.ctx.ledger.fits(&self.bookings(gdil), start, end)
    }

    /// Adds as many slots (up to `limit`) on `queue` as fit; returns how many were added.
    fn add_max(
        &self,
        gdil: &mut Gdil,
        queue: QueueIdx,
        limit: u32,
        start: Timestamp,
        end: Timestamp,
    ) -> u32 {
        let already = gdil
            .iter()
            .find(|g| g.queue == queue)
            .map(|g| g.slots)
            .unwrap_or(0);
        let mut high = limit.min(slot_capacity(self.ctx, self.request, queue).saturating_sub(already));
        let mut low = 0;
        while low < high {
            let mid = low + (high - low).div_ceil(2);
            if self.fits(&self.with_added(gdil, queue, mid), start, end) {
                low = mid;
            } else {
                high = mid - 1;
            }
        }
        if low > 0 {
            *gdil = self.with_added(gdil, queue, low);
        }
        low
    }

    /// Fills the queues of one host; returns the number of slots placed.
    fn fill_host(
        &self,
        gdil: &mut Gdil,
        queues: &[QueueIdx],
        limit: u32,
        start: Timestamp,
        end: Timestamp,
    ) -> u32 {
        let mut placed = 0;
        for &queue in queues {
            if placed == limit {
                break;
            }
            placed += self.add_max(gdil, queue, limit - placed, start, end);
        }
        placed
    }

    fn allocate(&self, count: u32, start: Timestamp, end: Timestamp) -> Option<(Gdil, Vec<Booking>)> {
        let gdil = match self.rule {
            AllocationRule::PeSlots => self.hosts.iter().find_map(|(_, queues)| {
                let mut gdil = Gdil::new();
                (self.fill_host(&mut gdil, queues, count, start, end) == count).then_some(gdil)
            }),
            AllocationRule::FillUp => {
                let mut gdil = Gdil::new();
                let mut placed = 0;
                for (_, queues) in &self.hosts {
                    placed += self.fill_host(&mut gdil, queues, count - placed, start, end);
                    if placed == count {
                        break;
                    }
                }
                (placed == count).then_some(gdil)
            }
            AllocationRule::RoundRobin => {
                let mut gdil = Gdil::new();
                let mut placed = 0;
                while placed < count {
                    let mut progress = false;
                    for (_, queues) in &self.hosts {
                        if placed == count {
                            break;
                        }
                        if self.fill_host(&mut gdil, queues, 1, start, end) == 1 {
                            placed += 1;
                            progress = true;
                        }
                    }
                    if !progress {
                        break;
                    }
                }
                (placed == count).then_some(gdil)
            }
            AllocationRule::Fixed(per_host) => {
                let mut gdil = Gdil::new();
                let mut placed = 0;
                for (_, queues) in &self.hosts {
                    if placed == count {
                        break;
                    }
                    let mut candidate = gdil.clone();
                    if self.fill_host(&mut candidate, queues, per_host, start, end) == per_host {
                        gdil = candidate;
                        placed += per_host;
                    }
                }
                (placed == count).then_some(gdil)
            }
        }?;
        let bookings = self.bookings(&gdil);
        Some((gdil, bookings))
    }
}
