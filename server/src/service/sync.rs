use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use log::{debug, info, o, warn, Logger};
use serde::{Deserialize, Serialize};

use crate::conference::{Conference, ExternalRecording};
use crate::db::Db;
use crate::errors::BackendError;
use crate::locks::Locks;
use crate::recording::{NewRecording, Recording, Room, RoomId, UserId};

/// The number of rooms synchronized at once when not configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// The outcome of synchronizing one user’s rooms.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub failures: Vec<RoomFailure>,
}

impl SyncResult {
    /// Whether any room failed.
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Turns a result with failures into [`BackendError::PartialSync`].
    pub fn into_result(self) -> Result<SyncResult, BackendError> {
        if self.is_partial() {
            Err(BackendError::PartialSync {
                failures: self.failures,
            })
        } else {
            Ok(self)
        }
    }

    fn absorb(&mut self, other: SyncResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.failures.extend(other.failures);
    }
}

/// Why a room (or one recording in it) could not be synchronized.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RoomFailure {
    pub room_id: RoomId,
    pub meeting_id: String,
    pub message: String,
}

impl RoomFailure {
    fn new(room: &Room, message: impl ToString) -> Self {
        RoomFailure {
            room_id: room.id,
            meeting_id: room.meeting_id.clone(),
            message: message.to_string(),
        }
    }
}

/// Pulls the conferencing server’s recordings into the store.
///
/// For each of a user’s rooms, recordings the server knows about are
/// created or brought up to date, and recordings it no longer knows
/// about are deleted (with their formats). Rooms are independent: one
/// failing doesn’t stop the others.
pub struct RecordingsSync {
    logger: Arc<Logger>,
    db: Arc<dyn Db + Send + Sync>,
    conference: Arc<dyn Conference + Send + Sync>,
    locks: Arc<Locks>,
    concurrency: usize,
}

impl RecordingsSync {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db + Send + Sync>,
        conference: Arc<dyn Conference + Send + Sync>,
        locks: Arc<Locks>,
        concurrency: usize,
    ) -> Self {
        RecordingsSync {
            logger,
            db,
            conference,
            locks,
            concurrency: concurrency.max(1),
        }
    }

    /// Synchronizes every room of `user`. Only fails if the rooms can’t
    /// be listed; per-room failures are reported in the result.
    pub async fn sync(&self, user: &UserId) -> Result<SyncResult, BackendError> {
        let logger = self.logger.new(o!("user" => user.to_string()));

        let _guard = self.locks.users.lock(*user).await;

        let rooms = self.db.rooms_for_user(user).await?;
        debug!(logger, "Synchronizing rooms..."; "rooms" => rooms.len());

        let outcomes: Vec<SyncResult> = stream::iter(rooms)
            .map(|room| self.sync_room(&logger, room))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut result = SyncResult::default();

        for outcome in outcomes {
            result.absorb(outcome);
        }

        info!(logger, "Synchronized recordings";
            "created" => result.created,
            "updated" => result.updated,
            "removed" => result.removed,
            "unchanged" => result.unchanged,
            "failed_rooms" => result.failures.len());

        Ok(result)
    }

    async fn sync_room(&self, logger: &Logger, room: Room) -> SyncResult {
        let logger = logger.new(o!("room" => room.id.to_string()));
        let mut result = SyncResult::default();

        // mutations in this room wait until the listing has been applied
        let _guard = self.locks.rooms.lock(room.id).await;

        let remote = match self.conference.list_recordings(&room.meeting_id).await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(logger, "Could not list remote recordings"; "error" => %e);
                result.failures.push(RoomFailure::new(&room, e));
                return result;
            }
        };

        if let Err(e) = self.apply(&logger, &room, remote, &mut result).await {
            warn!(logger, "Could not apply remote recordings"; "error" => %e);
            result.failures.push(RoomFailure::new(&room, e));
        }

        result
    }

    async fn apply(
        &self,
        logger: &Logger,
        room: &Room,
        remote: Vec<ExternalRecording>,
        result: &mut SyncResult,
    ) -> Result<(), BackendError> {
        let mut local: HashMap<String, Recording> = self
            .db
            .list_for_room(&room.id)
            .await?
            .into_iter()
            .map(|r| (r.record_id.clone(), r))
            .collect();

        let mut seen = HashSet::new();

        for external in remote {
            if !seen.insert(external.record_id.clone()) {
                continue;
            }

            match local.remove(&external.record_id) {
                Some(current) => self.refresh(logger, current, &external, result).await?,
                None => self.create(logger, room, &external, result).await?,
            }
        }

        for (record_id, recording) in local {
            debug!(logger, "Removing recording..."; "record_id" => &record_id);
            self.db.delete(&recording.id).await?;
            result.removed += 1;
        }

        Ok(())
    }

    async fn refresh(
        &self,
        logger: &Logger,
        current: Recording,
        external: &ExternalRecording,
        result: &mut SyncResult,
    ) -> Result<(), BackendError> {
        let details = external.details();

        if current.details == details {
            result.unchanged += 1;
        } else {
            debug!(logger, "Updating recording..."; "record_id" => &external.record_id);
            self.db.update(&current.id, details).await?;
            result.updated += 1;
        }

        Ok(())
    }

    async fn create(
        &self,
        logger: &Logger,
        room: &Room,
        external: &ExternalRecording,
        result: &mut SyncResult,
    ) -> Result<(), BackendError> {
        if let Some(existing) = self.db.find_by_record_id(&external.record_id).await? {
            warn!(logger, "Recording belongs to another room";
                "record_id" => &external.record_id,
                "other_room" => existing.room_id.to_string());
            result.failures.push(RoomFailure::new(
                room,
                format!(
                    "recording {} already belongs to room {}",
                    external.record_id, existing.room_id
                ),
            ));

            return Ok(());
        }

        debug!(logger, "Creating recording..."; "record_id" => &external.record_id);
        self.db
            .create(NewRecording::new(
                room.id,
                external.record_id.clone(),
                external.details(),
            ))
            .await?;
        result.created += 1;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};
    use tokio::sync::Notify;

    use super::RecordingsSync;
    use crate::conference::fake::Operation;
    use crate::conference::{Conference, ExternalRecording, FakeConference, Metadata};
    use crate::db::memory::MemoryDb;
    use crate::db::Db;
    use crate::errors::{BackendError, RemoteError};
    use crate::locks::Locks;
    use crate::recording::{Format, Visibility};
    use crate::service::mutation::RecordingMutations;
    use crate::service::testing::{logger, synced_recording, user_with_rooms};

    fn engine(db: &Arc<MemoryDb>, conference: &Arc<FakeConference>) -> RecordingsSync {
        RecordingsSync::new(
            logger(),
            db.clone(),
            conference.clone(),
            Arc::new(Locks::new()),
            2,
        )
    }

    #[tokio::test]
    async fn new_recordings_are_created() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 2).await;

        conference
            .add_recording(
                ExternalRecording::new("a", rooms[0].meeting_id(), "First")
                    .with_format(Format::new("presentation", "https://example.com/a", 4)),
            )
            .await;
        conference
            .add_recording(ExternalRecording::new("b", rooms[1].meeting_id(), "Second").published(false))
            .await;
        conference
            .add_recording(ExternalRecording::new("c", "someone-elses-meeting", "Third"))
            .await;

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.created, 2);
        assert!(!result.is_partial());

        let a = db.find_by_record_id("a").await.unwrap().unwrap();
        assert_eq!(a.name(), "First");
        assert_eq!(a.room_id(), rooms[0].id());
        assert_eq!(a.formats().len(), 1);
        assert_eq!(a.details().length, 4);

        let b = db.find_by_record_id("b").await.unwrap().unwrap();
        assert_eq!(b.visibility(), Visibility::Unpublished);

        assert!(db.find_by_record_id("c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drifted_recordings_are_updated_and_others_left_alone() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &rooms[0], "same", "Same").await;
        let drifted = synced_recording(&db, &conference, &rooms[0], "drifted", "Before").await;

        conference
            .put_recording(
                ExternalRecording {
                    name: "After".to_owned(),
                    ..drifted
                }
                .published(false)
                .with_format(Format::new("video", "https://example.com/v", 1)),
            )
            .await;

        let before = db.find_by_record_id("same").await.unwrap().unwrap();
        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.updated, 1);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.created, 0);

        let after = db.find_by_record_id("drifted").await.unwrap().unwrap();
        assert_eq!(after.name(), "After");
        assert_eq!(after.visibility(), Visibility::Unpublished);
        assert_eq!(after.formats().len(), 1);

        let same = db.find_by_record_id("same").await.unwrap().unwrap();
        assert_eq!(same.id(), before.id());
        assert_eq!(same.times().updated_at, before.times().updated_at);
    }

    #[tokio::test]
    async fn recordings_gone_remotely_are_deleted_with_their_formats() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;

        conference
            .add_recording(
                ExternalRecording::new("gone", rooms[0].meeting_id(), "Gone")
                    .with_format(Format::new("presentation", "https://example.com/g", 1)),
            )
            .await;
        synced_recording(&db, &conference, &rooms[0], "kept", "Kept").await;

        let sync = engine(&db, &conference);
        sync.sync(&user).await.unwrap();

        let gone = db.find_by_record_id("gone").await.unwrap().unwrap();
        assert_eq!(db.format_count(gone.id()).await, 1);

        conference.remove_recording("gone").await;
        let result = sync.sync(&user).await.unwrap();

        assert_eq!(result.removed, 1);
        assert!(db.find_by_record_id("gone").await.unwrap().is_none());
        assert_eq!(db.format_count(gone.id()).await, 0);
        assert!(db.find_by_record_id("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failing_rooms_do_not_stop_the_others() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 3).await;

        let stale = synced_recording(&db, &conference, &rooms[1], "stale", "Stale").await;
        conference.remove_recording(&stale.record_id).await;

        for (i, room) in rooms.iter().enumerate() {
            conference
                .add_recording(ExternalRecording::new(
                    format!("r{}", i),
                    room.meeting_id(),
                    format!("Recording {}", i),
                ))
                .await;
        }

        conference.fail_meeting(rooms[1].meeting_id()).await;

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.created, 2);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(&result.failures[0].room_id, rooms[1].id());
        assert!(db.find_by_record_id("r0").await.unwrap().is_some());
        assert!(db.find_by_record_id("r1").await.unwrap().is_none());
        assert!(db.find_by_record_id("r2").await.unwrap().is_some());

        // nothing is removed from a room whose listing failed
        assert!(db.find_by_record_id("stale").await.unwrap().is_some());

        match result.into_result() {
            Err(BackendError::PartialSync { failures }) => assert_eq!(failures.len(), 1),
            other => panic!("expected partial failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn total_outage_is_reported_per_room() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 5).await;
        synced_recording(&db, &conference, &rooms[0], "kept", "Kept").await;

        conference.fail(Operation::List).await;

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.failures.len(), 5);
        assert_eq!(result.removed, 0);
        assert!(db.find_by_record_id("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recordings_of_other_rooms_are_not_moved() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;
        let (_, other_rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &other_rooms[0], "shared", "Shared").await;
        conference
            .add_recording(ExternalRecording::new("shared", rooms[0].meeting_id(), "Shared"))
            .await;

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.created, 0);
        assert_eq!(result.failures.len(), 1);

        let shared = db.find_by_record_id("shared").await.unwrap().unwrap();
        assert_eq!(shared.room_id(), other_rooms[0].id());
    }

    #[tokio::test]
    async fn users_without_rooms_sync_to_nothing() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let user = db.create_user().await.unwrap();

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result, Default::default());
        assert!(conference.calls().await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_syncs_of_one_user_do_not_duplicate() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 2).await;

        for i in 0..10 {
            conference
                .add_recording(ExternalRecording::new(
                    format!("r{}", i),
                    rooms[i % 2].meeting_id(),
                    format!("Recording {}", i),
                ))
                .await;
        }

        let sync = Arc::new(engine(&db, &conference));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sync = sync.clone();
                tokio::spawn(async move { sync.sync(&user).await })
            })
            .collect();

        let mut created = 0;
        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert!(!result.is_partial(), "{:?}", result.failures);
            created += result.created;
        }

        assert_eq!(created, 10);
        assert_eq!(db.list_for_user(&user).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn every_listed_recording_is_counted_once() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;
        let (_, other_rooms) = user_with_rooms(&db, 1).await;
        let meeting_id = rooms[0].meeting_id();

        synced_recording(&db, &conference, &rooms[0], "same", "Same").await;
        synced_recording(&db, &conference, &rooms[0], "drifted", "Drifted").await;
        synced_recording(&db, &conference, &rooms[0], "gone", "Gone").await;
        synced_recording(&db, &conference, &other_rooms[0], "elsewhere", "Elsewhere").await;

        conference
            .put_recording(ExternalRecording::new("drifted", meeting_id, "Drifted again"))
            .await;
        conference.remove_recording("gone").await;
        conference
            .add_recording(ExternalRecording::new("new", meeting_id, "New"))
            .await;
        conference
            .add_recording(ExternalRecording::new("new", meeting_id, "New"))
            .await;
        conference
            .add_recording(ExternalRecording::new("elsewhere", meeting_id, "Elsewhere"))
            .await;

        let result = engine(&db, &conference).sync(&user).await.unwrap();

        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.unchanged, 1);
        assert_eq!(result.removed, 1);
        assert_eq!(result.failures.len(), 1);

        // "same", "drifted", "new" and "elsewhere", each once
        assert_eq!(
            result.created + result.updated + result.unchanged + result.failures.len(),
            4
        );
    }

    /// Pauses every listing after it has been taken, until resumed.
    struct PausingConference {
        inner: Arc<FakeConference>,
        listed: Notify,
        resume: Notify,
    }

    impl PausingConference {
        fn new(inner: Arc<FakeConference>) -> Self {
            PausingConference {
                inner,
                listed: Notify::new(),
                resume: Notify::new(),
            }
        }
    }

    impl Conference for PausingConference {
        fn list_recordings(
            &self,
            meeting_id: &str,
        ) -> BoxFuture<Result<Vec<ExternalRecording>, RemoteError>> {
            let meeting_id = meeting_id.to_owned();

            async move {
                let listing = self.inner.list_recordings(&meeting_id).await;

                self.listed.notify_one();
                self.resume.notified().await;

                listing
            }
            .boxed()
        }

        fn update_recording_metadata(
            &self,
            record_id: &str,
            metadata: &Metadata,
        ) -> BoxFuture<Result<(), RemoteError>> {
            self.inner.update_recording_metadata(record_id, metadata)
        }

        fn publish_recordings(
            &self,
            record_id: &str,
            publish: bool,
        ) -> BoxFuture<Result<(), RemoteError>> {
            self.inner.publish_recordings(record_id, publish)
        }

        fn delete_recordings(&self, record_id: &str) -> BoxFuture<Result<(), RemoteError>> {
            self.inner.delete_recordings(record_id)
        }
    }

    struct Paused {
        db: Arc<MemoryDb>,
        conference: Arc<FakeConference>,
        pausing: Arc<PausingConference>,
        sync: Arc<RecordingsSync>,
        mutations: Arc<RecordingMutations>,
    }

    fn paused(db: Arc<MemoryDb>, conference: Arc<FakeConference>) -> Paused {
        let locks = Arc::new(Locks::new());
        let pausing = Arc::new(PausingConference::new(conference.clone()));

        let sync = Arc::new(RecordingsSync::new(
            logger(),
            db.clone(),
            pausing.clone(),
            locks.clone(),
            1,
        ));
        let mutations = Arc::new(RecordingMutations::new(
            logger(),
            db.clone(),
            conference.clone(),
            locks,
        ));

        Paused {
            db,
            conference,
            pausing,
            sync,
            mutations,
        }
    }

    #[tokio::test]
    async fn renames_during_a_sync_are_not_overwritten() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &rooms[0], "r1", "Old").await;

        let p = paused(db, conference);

        let sync = {
            let sync = p.sync.clone();
            tokio::spawn(async move { sync.sync(&user).await })
        };
        p.pausing.listed.notified().await;

        let rename = {
            let mutations = p.mutations.clone();
            tokio::spawn(async move { mutations.rename("r1", "Renamed").await })
        };

        // the rename waits for the listing to be applied
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(p.conference.recording("r1").await.unwrap().name, "Old");

        p.pausing.resume.notify_one();

        let result = sync.await.unwrap().unwrap();
        assert_eq!(result.unchanged, 1);
        assert_eq!(rename.await.unwrap().unwrap().name(), "Renamed");

        let local = p.db.find_by_record_id("r1").await.unwrap().unwrap();
        assert_eq!(local.name(), "Renamed");
        assert_eq!(p.conference.recording("r1").await.unwrap().name, "Renamed");
    }

    #[tokio::test]
    async fn deletions_during_a_sync_are_not_undone() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &rooms[0], "r1", "Doomed").await;

        let p = paused(db, conference);

        let sync = {
            let sync = p.sync.clone();
            tokio::spawn(async move { sync.sync(&user).await })
        };
        p.pausing.listed.notified().await;

        let delete = {
            let mutations = p.mutations.clone();
            tokio::spawn(async move { mutations.delete("r1").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(p.conference.recording("r1").await.is_some());

        p.pausing.resume.notify_one();

        let result = sync.await.unwrap().unwrap();
        assert_eq!(result.created, 0);
        delete.await.unwrap().unwrap();

        assert!(p.db.find_by_record_id("r1").await.unwrap().is_none());
        assert!(p.conference.recording("r1").await.is_none());
    }

    #[tokio::test]
    async fn syncs_after_a_deletion_do_not_bring_it_back() {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (user, rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &rooms[0], "r1", "Doomed").await;

        let p = paused(db, conference);

        p.mutations.delete("r1").await.unwrap();

        let sync = {
            let sync = p.sync.clone();
            tokio::spawn(async move { sync.sync(&user).await })
        };
        p.pausing.listed.notified().await;
        p.pausing.resume.notify_one();

        let result = sync.await.unwrap().unwrap();
        assert_eq!(result, Default::default());
        assert!(p.db.find_by_record_id("r1").await.unwrap().is_none());
    }
}
