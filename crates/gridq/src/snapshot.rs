use std::path::{Path, PathBuf};
use std::time::SystemTime;

use schedd::cluster::{ClusterSnapshot, SnapshotReader, Timestamp};

use crate::config::SchedulerOverrides;

/// Reads a JSON snapshot from a file every time a snapshot is requested.
///
/// Configuration overrides are applied on top of the configuration stored in
/// the file. A snapshot without `now` is scheduled at the current wall clock.
pub struct FileSnapshotReader {
    path: PathBuf,
    overrides: SchedulerOverrides,
    now: Option<Timestamp>,
}

impl FileSnapshotReader {
    pub fn new(path: PathBuf, overrides: SchedulerOverrides) -> Self {
        FileSnapshotReader {
            path,
            overrides,
            now: None,
        }
    }

    pub fn with_now(mut self, now: Option<Timestamp>) -> Self {
        self.now = now;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn wall_clock() -> Timestamp {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl SnapshotReader for FileSnapshotReader {
    fn read_snapshot(&mut self) -> schedd::Result<ClusterSnapshot> {
        let data = std::fs::read(&self.path)?;
        let mut snapshot: ClusterSnapshot = serde_json::from_slice(&data)?;
        self.overrides.apply(&mut snapshot.config);
        if let Some(now) = self.now {
            snapshot.now = now;
        } else if snapshot.now == 0 {
            snapshot.now = wall_clock();
        }
        log::debug!(
            "Read snapshot {}: {} hosts, {} queues, {} jobs",
            self.path.display(),
            snapshot.hosts.len(),
            snapshot.queues.len(),
            snapshot.jobs.len()
        );
        Ok(snapshot)
    }
}
