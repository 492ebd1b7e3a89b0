use crate::internal::cluster::Timestamp;
use crate::internal::cluster::ar::ArId;
use crate::internal::cluster::job::{
    GrantedSlots, Job, JobId, JobRequest, JobTask, PeRequest, ResourceRequestEntry, SlotRange,
    TaskNumber, TaskState,
};

pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    pub fn new(id: u32) -> JobBuilder {
        JobBuilder {
            job: Job {
                id: JobId::new(id),
                name: format!("job{id}"),
                owner: "user".to_string(),
                group: "users".to_string(),
                project: None,
                department: None,
                priority: 0,
                submission_time: 0,
                tickets: 0.0,
                request: JobRequest::default(),
                reserve: false,
                immediate: false,
                hold: false,
                predecessors: Vec::new(),
                start_after: None,
                max_running_tasks: None,
                tasks: vec![JobTask::pending(TaskNumber::new(1))],
            },
        }
    }

    pub fn owner(mut self, owner: &str) -> JobBuilder {
        self.job.owner = owner.to_string();
        self
    }

    pub fn project(mut self, project: &str) -> JobBuilder {
        self.job.project = Some(project.to_string());
        self
    }

    pub fn priority(mut self, priority: i32) -> JobBuilder {
        self.job.priority = priority;
        self
    }

    pub fn submitted(mut self, time: Timestamp) -> JobBuilder {
        self.job.submission_time = time;
        self
    }

    pub fn tickets(mut self, tickets: f64) -> JobBuilder {
        self.job.tickets = tickets;
        self
    }

    pub fn resource(mut self, name: &str, units: u32) -> JobBuilder {
        self.job
            .request
            .resources
            .push(ResourceRequestEntry::new(name, units));
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> JobBuilder {
        self.job
            .request
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn pe(mut self, name: &str, min: u32, max: u32) -> JobBuilder {
        self.job.request.pe = Some(PeRequest {
            name: name.to_string(),
            slots: SlotRange::new(min, max),
        });
        self
    }

    pub fn pe_open(mut self, name: &str, min: u32) -> JobBuilder {
        self.job.request.pe = Some(PeRequest {
            name: name.to_string(),
            slots: SlotRange { min, max: None },
        });
        self
    }

    pub fn checkpoint(mut self, name: &str) -> JobBuilder {
        self.job.request.checkpoint = Some(name.to_string());
        self
    }

    pub fn duration(mut self, seconds: u64) -> JobBuilder {
        self.job.request.duration = Some(seconds);
        self
    }

    pub fn queue(mut self, name: &str) -> JobBuilder {
        self.job.request.queues.push(name.to_string());
        self
    }

    pub fn host(mut self, name: &str) -> JobBuilder {
        self.job.request.hosts.push(name.to_string());
        self
    }

    pub fn advance_reservation(mut self, id: u32) -> JobBuilder {
        self.job.request.advance_reservation = Some(ArId::new(id));
        self
    }

    pub fn reserve(mut self) -> JobBuilder {
        self.job.reserve = true;
        self
    }

    pub fn immediate(mut self) -> JobBuilder {
        self.job.immediate = true;
        self
    }

    pub fn hold(mut self) -> JobBuilder {
        self.job.hold = true;
        self
    }

    pub fn predecessor(mut self, id: u32) -> JobBuilder {
        self.job.predecessors.push(JobId::new(id));
        self
    }

    pub fn start_after(mut self, time: Timestamp) -> JobBuilder {
        self.job.start_after = Some(time);
        self
    }

    pub fn max_running_tasks(mut self, count: u32) -> JobBuilder {
        self.job.max_running_tasks = Some(count);
        self
    }

    /// Array job with tasks `1..=count`, all pending.
    pub fn tasks(mut self, count: u32) -> JobBuilder {
        self.job.tasks = (1..=count)
            .map(|n| JobTask::pending(TaskNumber::new(n)))
            .collect();
        self
    }

    fn first_pending(&mut self) -> &mut JobTask {
        self.job
            .tasks
            .iter_mut()
            .find(|t| t.state == TaskState::Pending)
            .expect("no pending task left")
    }

    /// The next pending task runs on `queue` (`queue@host`) since time 0.
    pub fn running_on(self, queue: &str, slots: u32) -> JobBuilder {
        self.running_since(queue, slots, 0)
    }

    pub fn running_since(mut self, queue: &str, slots: u32, start: Timestamp) -> JobBuilder {
        let task = self.first_pending();
        task.state = TaskState::Running;
        task.start_time = Some(start);
        task.granted = vec![GrantedSlots::new(queue, slots)];
        self
    }

    pub fn suspended_on(mut self, queue: &str, slots: u32) -> JobBuilder {
        let task = self.first_pending();
        task.state = TaskState::Suspended;
        task.start_time = Some(0);
        task.granted = vec![GrantedSlots::new(queue, slots)];
        task.suspended_on_threshold = true;
        self
    }

    pub fn task_state(mut self, number: u32, state: TaskState) -> JobBuilder {
        if let Some(task) = self
            .job
            .tasks
            .iter_mut()
            .find(|t| t.number == TaskNumber::new(number))
        {
            task.state = state;
        }
        self
    }

    pub fn build(self) -> Job {
        self.job
    }
}
