use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::PersistenceError;
use crate::gateway::{PersistenceGateway, StorageTarget};
use crate::models::Record;

struct SaveJob {
    generation: u64,
    target: StorageTarget,
    records: Vec<Record>,
}

#[derive(Debug)]
pub enum SaveOutcome {
    Saved {
        generation: u64,
        target: StorageTarget,
    },
    /// A newer snapshot for the same target was queued, so this one was skipped.
    Superseded {
        generation: u64,
        target: StorageTarget,
    },
    Failed {
        generation: u64,
        target: StorageTarget,
        error: PersistenceError,
    },
}

/// Background writer. One save is in flight at a time; snapshots that are
/// already stale when the worker gets to them are dropped.
pub struct SaveQueue {
    jobs: Option<Sender<SaveJob>>,
    outcomes: Receiver<SaveOutcome>,
    next_generation: u64,
    unresolved: usize,
    worker: Option<JoinHandle<()>>,
}

impl SaveQueue {
    pub fn start(gateway: Arc<PersistenceGateway>) -> Self {
        let (job_tx, job_rx) = mpsc::channel();
        let (outcome_tx, outcome_rx) = mpsc::channel();
        let worker = std::thread::spawn(move || run_worker(&gateway, job_rx, outcome_tx));

        Self {
            jobs: Some(job_tx),
            outcomes: outcome_rx,
            next_generation: 1,
            unresolved: 0,
            worker: Some(worker),
        }
    }

    /// Queues a full snapshot for `target` and returns its generation.
    pub fn submit(&mut self, target: StorageTarget, records: Vec<Record>) -> Result<u64, PersistenceError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let job = SaveJob {
            generation,
            target,
            records,
        };
        let sender = self.jobs.as_ref().ok_or(PersistenceError::WorkerStopped)?;
        sender.send(job).map_err(|_| PersistenceError::WorkerStopped)?;
        self.unresolved += 1;
        log::debug!("event=save_queued generation={}", generation);
        Ok(generation)
    }

    /// Outcomes that have arrived so far, without blocking.
    pub fn poll(&mut self) -> Vec<SaveOutcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.unresolved = self.unresolved.saturating_sub(1);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Blocks until every submitted snapshot has been written or superseded.
    pub fn flush(&mut self) -> Vec<SaveOutcome> {
        let mut outcomes = self.poll();
        while self.unresolved > 0 {
            match self.outcomes.recv() {
                Ok(outcome) => {
                    self.unresolved -= 1;
                    outcomes.push(outcome);
                }
                Err(_) => {
                    log::error!("event=save_worker_lost unresolved={}", self.unresolved);
                    self.unresolved = 0;
                }
            }
        }
        outcomes
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.unresolved == 0
    }
}

impl Drop for SaveQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish what is queued and exit
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(gateway: &PersistenceGateway, jobs: Receiver<SaveJob>, outcomes: Sender<SaveOutcome>) {
    while let Ok(first) = jobs.recv() {
        let mut batch = vec![first];
        while let Ok(job) = jobs.try_recv() {
            batch.push(job);
        }

        for (i, job) in batch.iter().enumerate() {
            let stale = batch[i + 1..].iter().any(|later| later.target == job.target);
            let outcome = if stale {
                log::debug!(
                    "event=save_superseded generation={} target={}",
                    job.generation,
                    job.target
                );
                SaveOutcome::Superseded {
                    generation: job.generation,
                    target: job.target.clone(),
                }
            } else {
                match gateway.save(&job.target, &job.records) {
                    Ok(()) => SaveOutcome::Saved {
                        generation: job.generation,
                        target: job.target.clone(),
                    },
                    Err(error) => SaveOutcome::Failed {
                        generation: job.generation,
                        target: job.target.clone(),
                        error,
                    },
                }
            };
            let _ = outcomes.send(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LOCAL_KEY;
    use crate::models::RecordId;
    use crate::remote::MemoryRemoteStore;
    use crate::storage::{LocalStore, MemoryStore};

    fn records(n: u64) -> Vec<Record> {
        (1..=n)
            .map(|i| Record {
                id: RecordId(i),
                company: format!("Company {}", i),
                position: "Eng".to_string(),
                ..Default::default()
            })
            .collect()
    }

    fn setup() -> (Arc<MemoryStore>, Arc<MemoryRemoteStore>, SaveQueue) {
        let local = Arc::new(MemoryStore::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let gateway = Arc::new(PersistenceGateway::new(local.clone(), Some(remote.clone())));
        (local, remote, SaveQueue::start(gateway))
    }

    #[test]
    fn test_flush_waits_for_write() {
        let (_local, remote, mut queue) = setup();
        let target = StorageTarget::Remote("u1".to_string());

        let generation = queue.submit(target.clone(), records(2)).unwrap();
        let outcomes = queue.flush();

        assert!(queue.is_idle());
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(
            &outcomes[0],
            SaveOutcome::Saved { generation: g, target: t } if *g == generation && *t == target
        ));
        assert_eq!(remote.document("u1").unwrap().items.len(), 2);
    }

    #[test]
    fn test_rapid_saves_coalesce_to_latest() {
        let (_local, remote, mut queue) = setup();
        let target = StorageTarget::Remote("u1".to_string());

        {
            let _hold = remote.hold_writes();
            for n in 1..=5 {
                queue.submit(target.clone(), records(n)).unwrap();
            }
        }
        let outcomes = queue.flush();

        assert_eq!(outcomes.len(), 5);
        let superseded = outcomes
            .iter()
            .filter(|o| matches!(o, SaveOutcome::Superseded { .. }))
            .count();
        assert!(superseded >= 3, "only {superseded} superseded");
        assert!(!outcomes.iter().any(|o| matches!(o, SaveOutcome::Failed { .. })));

        // The last write reflects the last mutation
        let writes = remote.writes();
        assert!(writes.len() <= 2);
        assert_eq!(writes.last(), Some(&("u1".to_string(), 5)));
        assert_eq!(remote.document("u1").unwrap().items.len(), 5);
    }

    #[test]
    fn test_different_targets_are_not_coalesced() {
        let (local, remote, mut queue) = setup();
        let remote_target = StorageTarget::Remote("u1".to_string());

        {
            let _hold = remote.hold_writes();
            queue.submit(remote_target.clone(), records(1)).unwrap();
            queue.submit(StorageTarget::Local, records(2)).unwrap();
            queue.submit(remote_target, records(3)).unwrap();
        }
        queue.flush();

        assert_eq!(remote.document("u1").unwrap().items.len(), 3);
        let raw = local.get(LOCAL_KEY).unwrap().unwrap();
        let saved: Vec<Record> = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.len(), 2);
    }

    #[test]
    fn test_failed_save_is_reported() {
        let (_local, remote, mut queue) = setup();
        remote.set_failing(true);

        queue
            .submit(StorageTarget::Remote("u1".to_string()), records(1))
            .unwrap();
        let outcomes = queue.flush();

        assert!(matches!(
            &outcomes[..],
            [SaveOutcome::Failed { error: PersistenceError::Remote(_), .. }]
        ));
    }

    #[test]
    fn test_drop_finishes_queued_writes() {
        let (_local, remote, mut queue) = setup();
        queue
            .submit(StorageTarget::Remote("u1".to_string()), records(4))
            .unwrap();
        drop(queue);
        assert_eq!(remote.document("u1").unwrap().items.len(), 4);
    }
}
