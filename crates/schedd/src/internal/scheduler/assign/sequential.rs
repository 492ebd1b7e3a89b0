use smallvec::smallvec;

use crate::internal::cluster::job::Job;
use crate::internal::cluster::queue::QueueIdx;
use crate::internal::scheduler::assign::request::ResolvedRequest;
use crate::internal::scheduler::assign::{
    Binding, Gdil, GrantedQueue, MatchContext, MatchMode, SearchResult,
};
use crate::internal::scheduler::ledger::compute_bookings;

/// One slot on a single queue instance.
///
/// Now: the first instance where the job fits for its whole run time.
/// Reservation: the instance with the earliest possible start, ties keep queue order.
pub(crate) fn match_sequential(
    ctx: &MatchContext,
    job: &Job,
    request: &ResolvedRequest,
    queues: &[QueueIdx],
    mode: MatchMode,
    duration: u64,
) -> SearchResult {
    let mut best: Option<Binding> = None;
    for &queue in queues {
        let gdil: Gdil = smallvec![GrantedQueue::new(ctx.snapshot, ctx.index, queue, 1)];
        let bookings = compute_bookings(ctx.snapshot, ctx.index, ctx.ledger, job, request, &gdil);
        match mode {
            MatchMode::Now => {
                if ctx
                    .ledger
                    .fits(&bookings, ctx.now, ctx.now.saturating_add(duration))
                {
                    return SearchResult::Found(Binding {
                        gdil,
                        bookings,
                        start: ctx.now,
                    });
                }
            }
            MatchMode::Reservation => {
                let Some(start) = ctx.ledger.earliest_fit(&bookings, ctx.now, duration) else {
                    continue;
                };
                if best.as_ref().is_none_or(|b| start < b.start) {
                    let at_now = start == ctx.now;
                    best = Some(Binding {
                        gdil,
                        bookings,
                        start,
                    });
                    if at_now {
                        break;
                    }
                }
            }
        }
    }
    match best {
        Some(binding) => SearchResult::Found(binding),
        None => SearchResult::NoFit,
    }
}
