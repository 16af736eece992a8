use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{Job, JobDraft, JobId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
}

type JobSlot = Arc<RwLock<Job>>;

/// In-memory job table.
///
/// The outer lock only guards the id -> slot map and is held just long enough
/// to find or insert a slot. Each record sits behind its own lock, so
/// mutations of different jobs never wait on each other and readers always
/// get a whole record.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, JobSlot>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new QUEUED job under a freshly generated identifier
    pub fn create(&self, draft: JobDraft) -> JobId {
        let mut jobs = write(&self.jobs);
        loop {
            let id = JobId::generate();
            match jobs.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(RwLock::new(Job::queued(id, draft))));
                    debug!("Job created with id={}", id);
                    return id;
                }
                Entry::Occupied(_) => {
                    warn!("Job id collision on {}, generating a new one", id);
                }
            }
        }
    }

    /// Snapshot of a job as of the call.
    pub fn get(&self, id: JobId) -> Result<Job, StoreError> {
        let slot = self.slot(id)?;
        let job = read(&slot).clone();
        Ok(job)
    }

    /// Apply `update` to a job under its write lock and return its result.
    pub fn mutate<R>(&self, id: JobId, update: impl FnOnce(&mut Job) -> R) -> Result<R, StoreError> {
        let slot = self.slot(id)?;
        let mut job = write(&slot);
        Ok(update(&mut job))
    }

    pub fn len(&self) -> usize {
        read(&self.jobs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, id: JobId) -> Result<JobSlot, StoreError> {
        read(&self.jobs)
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }
}

// Records are only changed through non-panicking transition methods, so a
// poisoned lock still holds a consistent value.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{draft, JobStatus};
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn create_then_get_returns_queued_snapshot() {
        let store = JobStore::new();
        let id = store.create(draft("png", "jpg"));

        let job = store.get(id).unwrap();
        assert_eq!(job.id(), id);
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.progress(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let store = JobStore::new();
        store.create(draft("png", "jpg"));
        let missing = JobId::generate();

        assert_eq!(store.get(missing).unwrap_err(), StoreError::NotFound(missing));
        assert_eq!(
            store.mutate(missing, |job| job.start()).unwrap_err(),
            StoreError::NotFound(missing)
        );
    }

    #[test]
    fn snapshots_do_not_follow_later_mutations() {
        let store = JobStore::new();
        let id = store.create(draft("png", "jpg"));
        let before = store.get(id).unwrap();

        store.mutate(id, |job| job.start()).unwrap().unwrap();

        assert_eq!(before.status(), JobStatus::Queued);
        assert_eq!(store.get(id).unwrap().status(), JobStatus::InProgress);
    }

    #[test]
    fn mutate_applies_updates_atomically() {
        let store = JobStore::new();
        let id = store.create(draft("wav", "mp3"));

        store
            .mutate(id, |job| {
                job.start()?;
                job.fail("conversion_failed", "bad header")
            })
            .unwrap()
            .unwrap();

        let job = store.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.error(), Some("bad header"));
    }

    #[test]
    fn identifiers_are_unique() {
        let store = JobStore::new();
        let ids: HashSet<JobId> = (0..500).map(|_| store.create(draft("mp4", "avi"))).collect();
        assert_eq!(ids.len(), 500);
        assert_eq!(store.len(), 500);
    }

    #[test]
    fn concurrent_readers_never_see_torn_records() {
        let store = Arc::new(JobStore::new());
        let ids: Vec<JobId> = (0..8).map(|_| store.create(draft("wav", "mp3"))).collect();

        let writers: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    store.mutate(id, |job| job.start()).unwrap().unwrap();
                    for step in 11..99 {
                        store.mutate(id, |job| job.advance(step)).unwrap().unwrap();
                    }
                    store.mutate(id, |job| job.complete()).unwrap().unwrap();
                })
            })
            .collect();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let ids = ids.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        for id in &ids {
                            let job = store.get(*id).unwrap();
                            assert_eq!(job.progress() == 100, job.status().is_terminal());
                            assert_eq!(job.error().is_some(), job.status() == JobStatus::Failed);
                        }
                    }
                })
            })
            .collect();

        for handle in writers.into_iter().chain(readers) {
            handle.join().unwrap();
        }

        for id in ids {
            assert_eq!(store.get(id).unwrap().status(), JobStatus::Completed);
        }
    }
}
