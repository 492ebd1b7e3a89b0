use serde::{Deserialize, Serialize};

use crate::internal::cluster::job::JobId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageCategory {
    /// Why a job was not dispatched.
    Job,
    /// Why a queue instance was not used.
    Queue,
    Reservation,
    /// Epoch level events (aborts, limits).
    Epoch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Advisory message for operators; never influences dispatching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerMessage {
    pub category: MessageCategory,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    pub text: String,
}

impl SchedulerMessage {
    pub fn job(job_id: JobId, severity: Severity, text: impl Into<String>) -> Self {
        SchedulerMessage {
            category: MessageCategory::Job,
            severity,
            job_id: Some(job_id),
            queue: None,
            text: text.into(),
        }
    }

    pub fn queue(queue: impl Into<String>, text: impl Into<String>) -> Self {
        SchedulerMessage {
            category: MessageCategory::Queue,
            severity: Severity::Info,
            job_id: None,
            queue: Some(queue.into()),
            text: text.into(),
        }
    }

    pub fn reservation(job_id: JobId, text: impl Into<String>) -> Self {
        SchedulerMessage {
            category: MessageCategory::Reservation,
            severity: Severity::Info,
            job_id: Some(job_id),
            queue: None,
            text: text.into(),
        }
    }

    pub fn epoch(severity: Severity, text: impl Into<String>) -> Self {
        SchedulerMessage {
            category: MessageCategory::Epoch,
            severity,
            job_id: None,
            queue: None,
            text: text.into(),
        }
    }
}

impl std::fmt::Display for SchedulerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}]", self.severity)?;
        if let Some(job_id) = self.job_id {
            write!(f, " job {job_id}:")?;
        }
        if let Some(queue) = &self.queue {
            write!(f, " queue {queue}:")?;
        }
        write!(f, " {}", self.text)
    }
}
