use crate::internal::cluster::job::{GrantedSlots, JobId, TaskNumber};
use crate::internal::cluster::pe::AllocationRule;
use crate::internal::cluster::queue::QueueState;
use crate::internal::scheduler::dispatch::ReservationRecord;
use crate::internal::scheduler::messages::MessageCategory;
use crate::internal::scheduler::orders::OrderCollector;
use crate::internal::tests::utils::cluster::{HostBuilder, QueueBuilder};
use crate::internal::tests::utils::env::{TestEnv, started, started_jobs};
use crate::internal::tests::utils::job::JobBuilder;

fn has_job_message(collector: &OrderCollector, job_id: u32, text: &str) -> bool {
    collector
        .messages
        .iter()
        .any(|m| m.job_id == Some(JobId::new(job_id)) && m.text.contains(text))
}

fn reservation_starts(records: &[ReservationRecord]) -> Vec<(u32, u64, u64)> {
    records
        .iter()
        .map(|r| (r.job_id.as_num(), r.start, r.end))
        .collect()
}

/// One host whose `slots` are all taken by job 100 until 1500.
fn full_host(slots: u32) -> TestEnv {
    let mut env = TestEnv::with_hosts(1, slots);
    env.config().max_reservations = 5;
    env.job(JobBuilder::new(100).running_since("all.q@n1", slots, 900));
    env
}

#[test]
fn test_reserve_after_running_job_ends() {
    let mut env = full_host(8);
    env.job(JobBuilder::new(1).reserve().duration(100));
    let (collector, summary) = env.schedule();

    assert!(started(&collector).is_empty());
    assert_eq!(
        summary.reservations,
        vec![ReservationRecord {
            job_id: JobId::new(1),
            task: TaskNumber::new(1),
            start: 1500,
            end: 1600,
            granted: vec![GrantedSlots::new("all.q@n1", 1)],
        }]
    );
    assert_eq!(summary.stats.reservations, 1);
    let message = collector
        .messages
        .iter()
        .find(|m| m.category == MessageCategory::Reservation)
        .unwrap();
    assert_eq!(message.job_id, Some(JobId::new(1)));
    assert_eq!(message.text, "reserved 1 slots from 1500 to 1600 on all.q@n1");
}

#[test]
fn test_job_without_reserve_flag_gets_no_reservation() {
    let mut env = full_host(2);
    env.job(JobBuilder::new(1).duration(100));
    let (collector, summary) = env.schedule();
    assert!(summary.reservations.is_empty());
    assert_eq!(summary.stats.reservation_attempts, 0);
    assert!(has_job_message(&collector, 1, "cannot run now"));
}

#[test]
fn test_partially_started_array_is_not_reserved() {
    let mut env = TestEnv::with_hosts(1, 1);
    env.config().max_reservations = 5;
    env.job(JobBuilder::new(1).tasks(2).reserve().duration(100));
    let (collector, summary) = env.schedule();

    assert_eq!(
        started(&collector),
        vec![(1, 1, vec![("all.q@n1".to_string(), 1)])]
    );
    assert!(summary.reservations.is_empty());
    assert_eq!(summary.stats.reservation_attempts, 0);
    assert!(has_job_message(&collector, 1, "cannot run now"));
}

fn overloaded_queue(state: QueueState) -> TestEnv {
    let mut env = TestEnv::new();
    env.config().max_reservations = 5;
    env.host(HostBuilder::new("n1").load("load_avg", 5.0));
    env.queue(
        QueueBuilder::new("all.q", "n1", 1)
            .state(state)
            .load_threshold("np_load_avg", 1.0),
    );
    env.job(JobBuilder::new(1).reserve().duration(100));
    env
}

#[test]
fn test_overloaded_queue_can_be_reserved() {
    let (collector, summary) = overloaded_queue(QueueState::empty()).schedule();
    assert!(started(&collector).is_empty());
    assert_eq!(summary.reservations.len(), 1);
}

#[test]
fn test_disabled_queue_is_not_reserved_when_overloaded() {
    let (collector, summary) = overloaded_queue(QueueState::DISABLED).schedule();
    assert!(started(&collector).is_empty());
    assert!(summary.reservations.is_empty());
}

#[test]
fn test_reservation_disabled_by_config() {
    let mut env = full_host(2);
    env.config().max_reservations = 0;
    env.job(JobBuilder::new(1).reserve().duration(100));
    let (_, summary) = env.schedule();
    assert!(summary.reservations.is_empty());
    assert_eq!(summary.stats.reservation_attempts, 0);
}

#[test]
fn test_reservation_limit_per_epoch() {
    let mut env = full_host(1);
    env.config().max_reservations = 2;
    env.jobs((1..=3).map(|id| JobBuilder::new(id).reserve().duration(100)));
    let (collector, summary) = env.schedule();

    assert_eq!(
        reservation_starts(&summary.reservations),
        vec![(1, 1500, 1600), (2, 1600, 1700)]
    );
    assert_eq!(summary.stats.reservation_attempts, 2);
    assert!(has_job_message(&collector, 3, "cannot run now"));
}

#[test]
fn test_backfilling_respects_reservation() {
    let mut env = TestEnv::new();
    env.config().max_reservations = 5;
    env.pe("mpi", 16, AllocationRule::PeSlots);
    env.host(HostBuilder::new("n1"));
    env.queue(QueueBuilder::new("all.q", "n1", 4).pe("mpi"));
    env.jobs([
        JobBuilder::new(100).running_since("all.q@n1", 2, 900),
        JobBuilder::new(1)
            .priority(100)
            .pe("mpi", 4, 4)
            .reserve()
            .duration(1000),
        JobBuilder::new(2).duration(400),
        JobBuilder::new(3).duration(1000),
    ]);

    let (collector, summary) = env.schedule();
    assert_eq!(
        summary.reservations,
        vec![ReservationRecord {
            job_id: JobId::new(1),
            task: TaskNumber::new(1),
            start: 1500,
            end: 2500,
            granted: vec![GrantedSlots::new("all.q@n1", 4)],
        }]
    );
    assert_eq!(started_jobs(&collector), vec![2]);
    assert!(has_job_message(&collector, 3, "cannot run now"));
}

#[test]
fn test_reservations_avoid_advance_reservations() {
    let mut env = full_host(1);
    env.ar(7, "admin", 1600, 1800, &[("all.q@n1", 1)]);
    env.jobs([
        JobBuilder::new(1).reserve().duration(100),
        JobBuilder::new(2).reserve().duration(100),
    ]);
    let (_, summary) = env.schedule();
    assert_eq!(
        reservation_starts(&summary.reservations),
        vec![(1, 1500, 1600), (2, 1800, 1900)]
    );
}

#[test]
fn test_zero_duration_cannot_reserve() {
    let mut env = full_host(1);
    env.job(JobBuilder::new(1).reserve().duration(0));
    let (collector, summary) = env.schedule();
    assert!(summary.reservations.is_empty());
    assert!(has_job_message(
        &collector,
        1,
        "cannot reserve: a reservation needs a non-zero run time"
    ));
}

#[test]
fn test_job_runs_inside_advance_reservation() {
    let mut env = TestEnv::with_hosts(2, 4);
    env.ar(1, "user", 500, 2000, &[("all.q@n1", 4)]);
    env.jobs([
        JobBuilder::new(1).advance_reservation(1).duration(100),
        JobBuilder::new(2),
    ]);
    let (collector, _) = env.schedule();
    assert_eq!(
        started(&collector),
        vec![
            (1, 1, vec![("all.q@n1".to_string(), 1)]),
            (2, 1, vec![("all.q@n2".to_string(), 1)]),
        ]
    );
}

#[test]
fn test_advance_reservation_slots_are_limited() {
    let mut env = TestEnv::with_hosts(1, 8);
    env.ar(1, "user", 500, 2000, &[("all.q@n1", 2)]);
    env.jobs((1..=3).map(|id| JobBuilder::new(id).advance_reservation(1)));
    let (collector, _) = env.schedule();
    assert_eq!(started_jobs(&collector), vec![1, 2]);
    assert!(has_job_message(&collector, 3, "cannot run now"));
}

#[test]
fn test_advance_reservation_access_and_window() {
    let mut env = TestEnv::with_hosts(1, 8);
    env.ar(1, "admin", 500, 2000, &[("all.q@n1", 4)]);
    env.snapshot.ars.last_mut().unwrap().users = vec!["user".to_string()];
    env.ar(2, "admin", 1500, 2000, &[("all.q@n1", 2)]);
    env.jobs([
        JobBuilder::new(1).advance_reservation(1).duration(100),
        JobBuilder::new(2).owner("bob").advance_reservation(1),
        JobBuilder::new(3).advance_reservation(1).duration(5000),
        JobBuilder::new(4).advance_reservation(2),
        JobBuilder::new(5).advance_reservation(9),
    ]);
    let (collector, summary) = env.schedule();

    assert_eq!(started_jobs(&collector), vec![1]);
    assert!(has_job_message(&collector, 2, "no access to advance reservation 1"));
    assert!(has_job_message(
        &collector,
        3,
        "run time exceeds the end of advance reservation 1"
    ));
    assert!(has_job_message(&collector, 4, "advance reservation 2 is not active"));
    assert!(has_job_message(&collector, 5, "invalid request"));
    assert!(summary.reservations.is_empty());
}
