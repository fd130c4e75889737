use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, error, info, o, Logger};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::sync::{RecordingsSync, SyncResult};
use crate::errors::BackendError;
use crate::recording::UserId;

/// The number of pending jobs accepted when not configured.
pub const DEFAULT_CAPACITY: usize = 64;

/// Finished jobs remembered at least this long (in jobs, not time).
const MINIMUM_RETAINED_JOBS: usize = 1024;

/// Where a resync job is.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed(SyncResult),
    Partial(SyncResult),
    Failed { message: String },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

struct Jobs {
    statuses: HashMap<Uuid, JobStatus>,
    order: VecDeque<Uuid>,
    retained: usize,
}

impl Jobs {
    fn insert(&mut self, job: Uuid) {
        self.statuses.insert(job, JobStatus::Queued);
        self.order.push_back(job);

        while self.order.len() > self.retained {
            if let Some(oldest) = self.order.pop_front() {
                self.statuses.remove(&oldest);
            }
        }
    }

    fn forget(&mut self, job: &Uuid) {
        self.statuses.remove(job);
        self.order.retain(|j| j != job);
    }

    fn set(&mut self, job: &Uuid, status: JobStatus) {
        if let Some(current) = self.statuses.get_mut(job) {
            *current = status;
        }
    }
}

/// Runs resyncs in the background, one job at a time, in the order
/// they were enqueued.
#[derive(Clone)]
pub struct SyncQueue {
    sender: mpsc::Sender<(Uuid, UserId)>,
    jobs: Arc<RwLock<Jobs>>,
}

impl SyncQueue {
    /// Spawns the worker. It stops once every clone of the returned
    /// queue has been dropped.
    pub fn start(
        logger: Arc<Logger>,
        sync: Arc<RecordingsSync>,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let capacity = capacity.max(1);
        let (sender, mut receiver) = mpsc::channel::<(Uuid, UserId)>(capacity);

        let jobs = Arc::new(RwLock::new(Jobs {
            statuses: HashMap::new(),
            order: VecDeque::new(),
            retained: MINIMUM_RETAINED_JOBS.max(capacity * 2),
        }));

        let worker = {
            let jobs = jobs.clone();

            tokio::spawn(async move {
                while let Some((job, user)) = receiver.recv().await {
                    let logger = logger.new(o!("job" => job.to_string(), "user" => user.to_string()));

                    debug!(logger, "Starting resync...");
                    jobs.write().await.set(&job, JobStatus::Running);

                    // on its own task, so a panicking job fails alone
                    let run = {
                        let sync = sync.clone();
                        tokio::spawn(async move { sync.sync(&user).await })
                    };

                    let outcome = run
                        .await
                        .map_err(|source| BackendError::TaskFailed { source })
                        .and_then(|result| result);

                    let status = match outcome {
                        Ok(result) if result.is_partial() => JobStatus::Partial(result),
                        Ok(result) => JobStatus::Completed(result),
                        Err(e) => {
                            error!(logger, "Resync failed"; "error" => %e);
                            JobStatus::Failed {
                                message: e.to_string(),
                            }
                        }
                    };

                    jobs.write().await.set(&job, status);
                }

                info!(logger, "Resync queue closed");
            })
        };

        (SyncQueue { sender, jobs }, worker)
    }

    /// Adds a resync of `user`, returning the job ID to poll.
    pub async fn enqueue(&self, user: UserId) -> Result<Uuid, BackendError> {
        let job = Uuid::new_v4();

        self.jobs.write().await.insert(job);

        match self.sender.try_send((job, user)) {
            Ok(()) => Ok(job),
            Err(e) => {
                self.jobs.write().await.forget(&job);

                Err(match e {
                    TrySendError::Full(_) => BackendError::SyncQueueFull,
                    TrySendError::Closed(_) => BackendError::SyncQueueClosed,
                })
            }
        }
    }

    pub async fn status(&self, job: &Uuid) -> Result<JobStatus, BackendError> {
        self.jobs
            .read()
            .await
            .statuses
            .get(job)
            .cloned()
            .ok_or(BackendError::UnknownSyncJob(*job))
    }
}
