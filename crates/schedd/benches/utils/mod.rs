use schedd::Map;
use schedd::cluster::{
    ClusterSnapshot, Host, Job, JobId, JobRequest, JobTask, QueueInstance, QueueState, TaskNumber,
};
use schedd::scheduler::{Coordinator, OrderBatch, SchedulerMessage};

pub struct NullCoordinator;

impl Coordinator for NullCoordinator {
    fn send_orders(&mut self, _batch: OrderBatch) {}

    fn post_message(&mut self, _message: SchedulerMessage) {}
}

pub fn create_host(id: u32) -> Host {
    let mut load_values = Map::default();
    load_values.insert("load_avg".to_string(), (id % 7) as f64 / 10.0);
    Host {
        name: format!("n{id}"),
        num_proc: 8,
        load_values,
        consumables: Map::default(),
        attributes: Map::default(),
    }
}

pub fn create_queue(host: u32, slots: u32) -> QueueInstance {
    QueueInstance {
        queue: "all.q".to_string(),
        host: format!("n{host}"),
        seq_no: host,
        slots,
        state: QueueState::empty(),
        load_thresholds: Vec::new(),
        suspend_thresholds: Vec::new(),
        nsuspend: 1,
        consumables: Map::default(),
        pe_list: Vec::new(),
        ckpt_list: Vec::new(),
        users: Vec::new(),
        xusers: Vec::new(),
    }
}

/// Pending single task job; `owners` distinct owners are assigned round robin.
pub fn create_job(id: u32, owners: u32) -> Job {
    Job {
        id: JobId::new(id),
        name: format!("job{id}"),
        owner: format!("user{}", id % owners),
        group: "users".to_string(),
        project: None,
        department: None,
        priority: (id % 10) as i32,
        submission_time: 0,
        tickets: 0.0,
        request: JobRequest {
            duration: Some(600 + (id % 4) as u64 * 300),
            ..Default::default()
        },
        reserve: id % 5 == 0,
        immediate: false,
        hold: false,
        predecessors: Vec::new(),
        start_after: None,
        max_running_tasks: None,
        tasks: vec![JobTask::pending(TaskNumber::new(1))],
    }
}

pub fn create_snapshot(job_count: u32, host_count: u32) -> ClusterSnapshot {
    let mut snapshot = ClusterSnapshot {
        now: 1_000,
        ..Default::default()
    };
    snapshot.config.max_reservations = 20;
    snapshot.hosts = (1..=host_count).map(create_host).collect::<Vec<_>>().into();
    snapshot.queues = (1..=host_count)
        .map(|host| create_queue(host, 16))
        .collect::<Vec<_>>()
        .into();
    snapshot.jobs = (1..=job_count)
        .map(|id| create_job(id, 8))
        .collect::<Vec<_>>()
        .into();
    snapshot
}
