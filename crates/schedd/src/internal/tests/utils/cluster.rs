use crate::internal::cluster::host::Host;
use crate::internal::cluster::queue::{QueueInstance, QueueState, Threshold};
use crate::resources::ResourceAmount;

pub struct HostBuilder {
    host: Host,
}

impl HostBuilder {
    pub fn new(name: &str) -> HostBuilder {
        let mut host = Host {
            name: name.to_string(),
            num_proc: 1,
            load_values: Default::default(),
            consumables: Default::default(),
            attributes: Default::default(),
        };
        host.load_values.insert("load_avg".to_string(), 0.0);
        HostBuilder { host }
    }

    pub fn num_proc(mut self, count: u32) -> HostBuilder {
        self.host.num_proc = count;
        self
    }

    pub fn load(mut self, name: &str, value: f64) -> HostBuilder {
        self.host.load_values.insert(name.to_string(), value);
        self
    }

    pub fn consumable(mut self, name: &str, units: u64) -> HostBuilder {
        self.host
            .consumables
            .insert(name.to_string(), ResourceAmount::new_units(units));
        self
    }

    pub fn attribute(mut self, name: &str, value: &str) -> HostBuilder {
        self.host
            .attributes
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Host {
        self.host
    }
}

pub struct QueueBuilder {
    queue: QueueInstance,
}

impl QueueBuilder {
    pub fn new(queue: &str, host: &str, slots: u32) -> QueueBuilder {
        QueueBuilder {
            queue: QueueInstance {
                queue: queue.to_string(),
                host: host.to_string(),
                seq_no: 0,
                slots,
                state: QueueState::empty(),
                load_thresholds: Vec::new(),
                suspend_thresholds: Vec::new(),
                nsuspend: 1,
                consumables: Default::default(),
                pe_list: Vec::new(),
                ckpt_list: Vec::new(),
                users: Vec::new(),
                xusers: Vec::new(),
            },
        }
    }

    pub fn seq_no(mut self, seq_no: u32) -> QueueBuilder {
        self.queue.seq_no = seq_no;
        self
    }

    pub fn state(mut self, state: QueueState) -> QueueBuilder {
        self.queue.state = state;
        self
    }

    pub fn load_threshold(mut self, name: &str, value: f64) -> QueueBuilder {
        self.queue.load_thresholds.push(Threshold::new(name, value));
        self
    }

    pub fn suspend_threshold(mut self, name: &str, value: f64) -> QueueBuilder {
        self.queue
            .suspend_thresholds
            .push(Threshold::new(name, value));
        self
    }

    pub fn nsuspend(mut self, count: u32) -> QueueBuilder {
        self.queue.nsuspend = count;
        self
    }

    pub fn consumable(mut self, name: &str, units: u64) -> QueueBuilder {
        self.queue
            .consumables
            .insert(name.to_string(), ResourceAmount::new_units(units));
        self
    }

    pub fn pe(mut self, name: &str) -> QueueBuilder {
        self.queue.pe_list.push(name.to_string());
        self
    }

    pub fn ckpt(mut self, name: &str) -> QueueBuilder {
        self.queue.ckpt_list.push(name.to_string());
        self
    }

    pub fn users(mut self, users: &[&str]) -> QueueBuilder {
        self.queue.users = users.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn xusers(mut self, users: &[&str]) -> QueueBuilder {
        self.queue.xusers = users.iter().map(|u| u.to_string()).collect();
        self
    }

    pub fn build(self) -> QueueInstance {
        self.queue
    }
}
