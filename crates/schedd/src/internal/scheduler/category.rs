use std::fmt::Write;

use crate::define_id_type;
use crate::internal::cluster::job::{Job, JobIdx};
use crate::internal::common::Map;
use crate::internal::common::index::IndexVec;

define_id_type!(CategoryId, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rejection {
    #[default]
    None,
    /// Cannot be started now, may still get a reservation.
    ForNow,
    /// Neither now nor as a reservation.
    Ever,
}

#[derive(Debug)]
struct Category {
    fingerprint: String,
    ref_count: u32,
    rejection: Rejection,
}

/// Fingerprint over everything in a job that decides where and whether it can run.
///
/// Jobs with equal fingerprints get identical matching outcomes within an epoch.
pub fn category_fingerprint(job: &Job) -> String {
    let request = &job.request;
    let mut out = String::new();

    let mut resources: Vec<String> = request
        .resources
        .iter()
        .map(|r| format!("{}={}", r.name, r.amount))
        .collect();
    resources.sort_unstable();
    let _ = write!(out, "-l {}", resources.join(","));

    let mut attributes: Vec<String> = request
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    attributes.sort_unstable();
    let _ = write!(out, " -a {}", attributes.join(","));

    if let Some(pe) = &request.pe {
        let _ = write!(out, " -pe {} {}", pe.name, pe.slots);
    }
    if let Some(ckpt) = &request.checkpoint {
        let _ = write!(out, " -ckpt {ckpt}");
    }
    let mut queues = request.queues.clone();
    queues.sort_unstable();
    let mut hosts = request.hosts.clone();
    hosts.sort_unstable();
    let _ = write!(out, " -q {} -h {}", queues.join(","), hosts.join(","));
    if let Some(duration) = request.duration {
        let _ = write!(out, " -rt {duration}");
    }
    if let Some(ar) = request.advance_reservation {
        let _ = write!(out, " -ar {ar}");
    }
    let _ = write!(
        out,
        " -R {} -now {} -U {} -P {} -D {}",
        job.reserve,
        job.immediate,
        job.owner,
        job.project.as_deref().unwrap_or_default(),
        job.department.as_deref().unwrap_or_default()
    );
    out
}

/// Negative matching results per category, valid for one epoch.
#[derive(Debug)]
pub struct CategoryCache {
    enabled: bool,
    categories: IndexVec<CategoryId, Category>,
    by_fingerprint: Map<String, CategoryId>,
    job_categories: Map<JobIdx, CategoryId>,
}

impl CategoryCache {
    pub fn new(enabled: bool) -> Self {
        CategoryCache {
            enabled,
            categories: Default::default(),
            by_fingerprint: Default::default(),
            job_categories: Default::default(),
        }
    }

    pub fn register(&mut self, job_idx: JobIdx, job: &Job, pending_tasks: u32) -> CategoryId {
        if let Some(id) = self.job_categories.get(&job_idx) {
            return *id;
        }
        let fingerprint = category_fingerprint(job);
        let id = match self.by_fingerprint.get(&fingerprint) {
            Some(id) => *id,
            None => {
                let id = self.categories.push_idx(Category {
                    fingerprint: fingerprint.clone(),
                    ref_count: 0,
                    rejection: Rejection::None,
                });
                self.by_fingerprint.insert(fingerprint, id);
                id
            }
        };
        self.categories[id].ref_count += pending_tasks;
        self.job_categories.insert(job_idx, id);
        id
    }

    /// A pending task of the job was dispatched or dropped.
    pub fn release_task(&mut self, job_idx: JobIdx) {
        if let Some(id) = self.job_categories.get(&job_idx) {
            let category = &mut self.categories[*id];
            category.ref_count = category.ref_count.saturating_sub(1);
        }
    }

    pub fn ref_count(&self, id: CategoryId) -> u32 {
        self.categories[id].ref_count
    }

    #[inline]
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// `for_reservation_only`: the category still may get reservations.
    pub fn reject_category(&mut self, job_idx: JobIdx, for_reservation_only: bool) {
        if !self.enabled {
            return;
        }
        let Some(id) = self.job_categories.get(&job_idx) else {
            return;
        };
        let category = &mut self.categories[*id];
        category.rejection = match (category.rejection, for_reservation_only) {
            (_, false) | (Rejection::Ever, true) => Rejection::Ever,
            (_, true) => Rejection::ForNow,
        };
        log::debug!(
            "Category '{}' rejected {:?}",
            category.fingerprint,
            category.rejection
        );
    }

    fn rejection(&self, job_idx: JobIdx) -> Rejection {
        if !self.enabled {
            return Rejection::None;
        }
        self.job_categories
            .get(&job_idx)
            .map(|id| self.categories[*id].rejection)
            .unwrap_or_default()
    }

    /// True for both "never now" and "never at all".
    pub fn is_category_rejected_for_now(&self, job_idx: JobIdx) -> bool {
        self.rejection(job_idx) != Rejection::None
    }

    pub fn is_category_rejected_ever(&self, job_idx: JobIdx) -> bool {
        self.rejection(job_idx) == Rejection::Ever
    }

    /// Forgets all verdicts; registrations stay.
    pub fn clear(&mut self) {
        for category in self.categories.iter_mut() {
            category.rejection = Rejection::None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::tests::utils::job::JobBuilder;

    #[test]
    fn same_request_same_category() {
        let a = JobBuilder::new(1).owner("alice").resource("mem", 2).build();
        let b = JobBuilder::new(2).owner("alice").resource("mem", 2).build();
        let c = JobBuilder::new(3).owner("bob").resource("mem", 2).build();
        let d = JobBuilder::new(4).owner("alice").resource("mem", 2).reserve().build();
        assert_eq!(category_fingerprint(&a), category_fingerprint(&b));
        assert_ne!(category_fingerprint(&a), category_fingerprint(&c));
        assert_ne!(category_fingerprint(&a), category_fingerprint(&d));

        let mut cache = CategoryCache::new(true);
        let ca = cache.register(JobIdx::new(0), &a, 1);
        let cb = cache.register(JobIdx::new(1), &b, 3);
        let cc = cache.register(JobIdx::new(2), &c, 1);
        assert_eq!(ca, cb);
        assert_ne!(ca, cc);
        assert_eq!(cache.ref_count(ca), 4);
        cache.release_task(JobIdx::new(1));
        assert_eq!(cache.ref_count(ca), 3);
        assert_eq!(cache.category_count(), 2);
    }

    #[test]
    fn rejections_escalate_and_clear() {
        let a = JobBuilder::new(1).build();
        let b = JobBuilder::new(2).build();
        let mut cache = CategoryCache::new(true);
        cache.register(JobIdx::new(0), &a, 1);
        cache.register(JobIdx::new(1), &b, 1);
        assert!(!cache.is_category_rejected_for_now(JobIdx::new(1)));

        cache.reject_category(JobIdx::new(0), true);
        assert!(cache.is_category_rejected_for_now(JobIdx::new(1)));
        assert!(!cache.is_category_rejected_ever(JobIdx::new(1)));

        cache.reject_category(JobIdx::new(0), false);
        assert!(cache.is_category_rejected_ever(JobIdx::new(1)));
        cache.reject_category(JobIdx::new(0), true);
        assert!(cache.is_category_rejected_ever(JobIdx::new(1)));

        cache.clear();
        assert!(!cache.is_category_rejected_for_now(JobIdx::new(1)));
    }

    #[test]
    fn disabled_cache_never_rejects() {
        let a = JobBuilder::new(1).build();
        let mut cache = CategoryCache::new(false);
        cache.register(JobIdx::new(0), &a, 1);
        cache.reject_category(JobIdx::new(0), false);
        assert!(!cache.is_category_rejected_ever(JobIdx::new(0)));
    }
}
