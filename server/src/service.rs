//! The recordings services: scoped queries, fail-closed mutations and
//! synchronization against the conferencing server.

pub mod mutation;
pub mod query;
pub mod queue;
pub mod sync;

pub use mutation::RecordingMutations;
pub use query::RecordingsQuery;
pub use queue::{JobStatus, SyncQueue};
pub use sync::{RecordingsSync, RoomFailure, SyncResult};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use log::{o, Discard, Logger};

    use crate::conference::{ExternalRecording, FakeConference};
    use crate::db::memory::MemoryDb;
    use crate::db::Db;
    use crate::recording::{NewRecording, Room, UserId};

    pub(crate) fn logger() -> Arc<Logger> {
        Arc::new(Logger::root(Discard, o!()))
    }

    pub(crate) async fn user_with_rooms(db: &MemoryDb, count: usize) -> (UserId, Vec<Room>) {
        let user = db.create_user().await.unwrap();
        let mut rooms = vec![];

        for i in 0..count {
            let meeting_id = format!("{}-{}", user, i);
            rooms.push(
                db.create_room(&user, &format!("Room {}", i), &meeting_id)
                    .await
                    .unwrap(),
            );
        }

        (user, rooms)
    }

    /// Adds a recording both remotely and locally, as a completed sync
    /// would have.
    pub(crate) async fn synced_recording(
        db: &MemoryDb,
        conference: &FakeConference,
        room: &Room,
        record_id: &str,
        name: &str,
    ) -> ExternalRecording {
        let external = ExternalRecording::new(record_id, room.meeting_id(), name);

        conference.add_recording(external.clone()).await;
        db.create(NewRecording::new(*room.id(), record_id, external.details()))
            .await
            .unwrap();

        external
    }
}
