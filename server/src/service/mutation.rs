use std::sync::Arc;

use log::{debug, o, warn, Logger};
use tokio::sync::OwnedMutexGuard;

use crate::conference::{Conference, Metadata};
use crate::db::Db;
use crate::errors::BackendError;
use crate::locks::Locks;
use crate::normalization::normalize_name;
use crate::recording::{Recording, Visibility};

/// Renames, publishes and deletes recordings. Every change goes to the
/// conferencing server first; the store is only written once the
/// server has accepted it.
pub struct RecordingMutations {
    logger: Arc<Logger>,
    db: Arc<dyn Db + Send + Sync>,
    conference: Arc<dyn Conference + Send + Sync>,
    locks: Arc<Locks>,
}

impl RecordingMutations {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db + Send + Sync>,
        conference: Arc<dyn Conference + Send + Sync>,
        locks: Arc<Locks>,
    ) -> Self {
        RecordingMutations {
            logger,
            db,
            conference,
            locks,
        }
    }

    pub async fn rename(&self, record_id: &str, name: &str) -> Result<Recording, BackendError> {
        let name = normalize_name(name);

        if name.is_empty() {
            return Err(BackendError::BlankName);
        }

        let logger = self.logger.new(o!("record_id" => record_id.to_owned()));
        let (_guard, recording) = self.lock(record_id).await?;

        let mut metadata = Metadata::new();
        metadata.insert("name".to_owned(), name.clone());

        debug!(logger, "Renaming recording remotely..."; "name" => &name);
        self.conference
            .update_recording_metadata(record_id, &metadata)
            .await
            .map_err(|e| {
                warn!(logger, "Remote rename failed"; "error" => %e);
                BackendError::from(e)
            })?;

        debug!(logger, "Renaming recording locally...");
        self.db.rename(recording.id(), &name).await?;

        Ok(recording.with_name(name))
    }

    pub async fn set_visibility(
        &self,
        record_id: &str,
        publish: bool,
    ) -> Result<Recording, BackendError> {
        let logger = self.logger.new(o!("record_id" => record_id.to_owned()));
        let (_guard, recording) = self.lock(record_id).await?;
        let visibility = Visibility::from_published(publish);

        debug!(logger, "Changing visibility remotely..."; "visibility" => visibility.as_str());
        self.conference
            .publish_recordings(record_id, publish)
            .await
            .map_err(|e| {
                warn!(logger, "Remote visibility change failed"; "error" => %e);
                BackendError::from(e)
            })?;

        debug!(logger, "Changing visibility locally...");
        self.db.set_visibility(recording.id(), visibility).await?;

        Ok(recording.with_visibility(visibility))
    }

    pub async fn delete(&self, record_id: &str) -> Result<(), BackendError> {
        let logger = self.logger.new(o!("record_id" => record_id.to_owned()));
        let (_guard, recording) = self.lock(record_id).await?;

        debug!(logger, "Deleting recording remotely...");
        self.conference
            .delete_recordings(record_id)
            .await
            .map_err(|e| {
                warn!(logger, "Remote deletion failed"; "error" => %e);
                BackendError::from(e)
            })?;

        debug!(logger, "Deleting recording locally...");
        self.db.delete(recording.id()).await
    }

    /// Takes the lock of the room the recording belongs to, and reads
    /// the recording again under it.
    async fn lock(&self, record_id: &str) -> Result<(OwnedMutexGuard<()>, Recording), BackendError> {
        loop {
            let room_id = *self.find(record_id).await?.room_id();
            let guard = self.locks.rooms.lock(room_id).await;

            // a sync may have removed it (or re-created it elsewhere)
            // while we waited
            let recording = self.find(record_id).await?;

            if *recording.room_id() == room_id {
                return Ok((guard, recording));
            }
        }
    }

    async fn find(&self, record_id: &str) -> Result<Recording, BackendError> {
        self.db
            .find_by_record_id(record_id)
            .await?
            .ok_or_else(|| BackendError::NonExistentRecording(record_id.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::RecordingMutations;
    use crate::conference::fake::{Call, Operation};
    use crate::conference::FakeConference;
    use crate::db::memory::MemoryDb;
    use crate::db::Db;
    use crate::errors::BackendError;
    use crate::locks::Locks;
    use crate::recording::Visibility;
    use crate::service::testing::{logger, synced_recording, user_with_rooms};

    struct Fixture {
        db: Arc<MemoryDb>,
        conference: Arc<FakeConference>,
        mutations: RecordingMutations,
    }

    async fn fixture() -> Fixture {
        let db = Arc::new(MemoryDb::new());
        let conference = Arc::new(FakeConference::new());
        let (_, rooms) = user_with_rooms(&db, 1).await;

        synced_recording(&db, &conference, &rooms[0], "record-1", "Original").await;

        let mutations = RecordingMutations::new(
            logger(),
            db.clone(),
            conference.clone(),
            Arc::new(Locks::new()),
        );

        Fixture {
            db,
            conference,
            mutations,
        }
    }

    async fn stored_name(db: &MemoryDb) -> String {
        db.find_by_record_id("record-1")
            .await
            .unwrap()
            .unwrap()
            .name()
            .to_owned()
    }

    #[tokio::test]
    async fn rename_updates_both_sides() {
        let f = fixture().await;

        let renamed = f.mutations.rename("record-1", "  New name ").await.unwrap();

        assert_eq!(renamed.name(), "New name");
        assert_eq!(stored_name(&f.db).await, "New name");
        assert_eq!(
            f.conference.recording("record-1").await.unwrap().name,
            "New name"
        );
    }

    #[tokio::test]
    async fn blank_names_are_rejected_without_io() {
        let f = fixture().await;

        for name in &["", "   ", "\t\n"] {
            let result = f.mutations.rename("record-1", name).await;
            assert!(matches!(result, Err(BackendError::BlankName)));
        }

        assert_eq!(stored_name(&f.db).await, "Original");
        assert!(f.conference.calls().await.is_empty());
    }

    #[tokio::test]
    async fn renaming_unknown_recordings_makes_no_remote_call() {
        let f = fixture().await;

        let result = f.mutations.rename("nope", "Name").await;

        assert!(matches!(result, Err(BackendError::NonExistentRecording(id)) if id == "nope"));
        assert!(f.conference.calls().await.is_empty());
    }

    #[tokio::test]
    async fn failed_remote_rename_leaves_store_untouched() {
        let f = fixture().await;
        f.conference.fail(Operation::UpdateMetadata).await;

        let result = f.mutations.rename("record-1", "New name").await;

        assert!(matches!(result, Err(BackendError::Remote { .. })));
        assert_eq!(stored_name(&f.db).await, "Original");
        assert_eq!(
            f.conference.calls().await,
            vec![Call {
                operation: Operation::UpdateMetadata,
                id: "record-1".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn visibility_follows_the_server() {
        let f = fixture().await;

        let unpublished = f.mutations.set_visibility("record-1", false).await.unwrap();
        assert_eq!(unpublished.visibility(), Visibility::Unpublished);

        let published = f.mutations.set_visibility("record-1", true).await.unwrap();
        assert_eq!(published.visibility(), Visibility::Published);

        let stored = f.db.find_by_record_id("record-1").await.unwrap().unwrap();
        assert_eq!(stored.visibility(), Visibility::Published);
        assert!(f.conference.recording("record-1").await.unwrap().published);
    }

    #[tokio::test]
    async fn failed_remote_publish_leaves_visibility() {
        let f = fixture().await;
        f.mutations.set_visibility("record-1", false).await.unwrap();
        f.conference.fail(Operation::Publish).await;

        let result = f.mutations.set_visibility("record-1", true).await;

        assert!(matches!(result, Err(BackendError::Remote { .. })));
        let stored = f.db.find_by_record_id("record-1").await.unwrap().unwrap();
        assert_eq!(stored.visibility(), Visibility::Unpublished);
    }

    #[tokio::test]
    async fn publishing_unknown_recordings_fails() {
        let f = fixture().await;

        let result = f.mutations.set_visibility("nope", true).await;

        assert!(matches!(result, Err(BackendError::NonExistentRecording(_))));
        assert!(f.conference.calls().await.is_empty());
    }

    #[tokio::test]
    async fn deletion_is_fail_closed() {
        let f = fixture().await;
        f.conference.fail(Operation::Delete).await;

        assert!(f.mutations.delete("record-1").await.is_err());
        assert!(f.db.find_by_record_id("record-1").await.unwrap().is_some());

        f.conference.clear_failures().await;

        f.mutations.delete("record-1").await.unwrap();
        assert!(f.db.find_by_record_id("record-1").await.unwrap().is_none());
        assert!(f.conference.recording("record-1").await.is_none());
    }
}
