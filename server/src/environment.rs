use std::sync::Arc;

use log::Logger;
use tokio::task::JoinHandle;

use crate::conference::Conference;
use crate::db::Db;
use crate::locks::Locks;
use crate::service::{queue, sync, RecordingMutations, RecordingsQuery, RecordingsSync, SyncQueue};
use crate::urls::Urls;

/// Everything the routes need, cheap to clone into each filter.
#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn Db + Send + Sync>,
    pub urls: Arc<Urls>,
    pub query: Arc<RecordingsQuery>,
    pub mutations: Arc<RecordingMutations>,
    pub sync: Arc<RecordingsSync>,
    pub queue: SyncQueue,
}

impl Environment {
    /// Wires the services together and starts the resync worker. Must
    /// be called from within a Tokio runtime.
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db + Send + Sync>,
        conference: Arc<dyn Conference + Send + Sync>,
        urls: Arc<Urls>,
        config: Config,
    ) -> (Self, JoinHandle<()>) {
        let locks = Arc::new(Locks::new());

        let query = Arc::new(RecordingsQuery::new(db.clone()));
        let mutations = Arc::new(RecordingMutations::new(
            logger.clone(),
            db.clone(),
            conference.clone(),
            locks.clone(),
        ));
        let sync = Arc::new(RecordingsSync::new(
            logger.clone(),
            db.clone(),
            conference,
            locks,
            config.sync_concurrency,
        ));
        let (queue, worker) = SyncQueue::start(logger.clone(), sync.clone(), config.sync_queue_size);

        let environment = Self {
            logger,
            db,
            urls,
            query,
            mutations,
            sync,
            queue,
        };

        (environment, worker)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub(crate) sync_concurrency: usize,
    pub(crate) sync_queue_size: usize,
}

impl Config {
    pub fn new(sync_concurrency: usize, sync_queue_size: usize) -> Self {
        Self {
            sync_concurrency,
            sync_queue_size,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(sync::DEFAULT_CONCURRENCY, queue::DEFAULT_CAPACITY)
    }
}
