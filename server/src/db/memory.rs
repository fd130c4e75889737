//! An in-process store with the same semantics as the Postgres one.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Db;
use crate::errors::BackendError;
use crate::recording::{
    Format, NewRecording, Recording, RecordingDetails, Room, RoomId, Times, UserId, Visibility,
};

#[derive(Default)]
struct Tables {
    users: HashSet<UserId>,
    rooms: Vec<Room>,

    /// Kept in creation order. Formats live in their own table, keyed
    /// by recording ID.
    recordings: Vec<Recording>,
    formats: HashMap<Uuid, Vec<Format>>,
}

#[derive(Default)]
pub struct MemoryDb {
    tables: RwLock<Tables>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of formats stored for the recording with the given ID.
    pub async fn format_count(&self, id: &Uuid) -> usize {
        self.tables
            .read()
            .await
            .formats
            .get(id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Tables {
    fn with_formats(&self, recording: &Recording) -> Recording {
        let mut recording = recording.clone();
        recording.details.formats = self.formats.get(&recording.id).cloned().unwrap_or_default();
        recording
    }

    fn position(&self, id: &Uuid) -> Result<usize, BackendError> {
        self.recordings
            .iter()
            .position(|r| r.id == *id)
            .ok_or(BackendError::NonExistentId(*id))
    }

    fn touch(&mut self, index: usize) {
        self.recordings[index].times.updated_at = OffsetDateTime::now_utc();
    }
}

impl Db for MemoryDb {
    fn create_user(&self) -> BoxFuture<Result<UserId, BackendError>> {
        async move {
            let id = Uuid::new_v4();
            self.tables.write().await.users.insert(id);

            Ok(id)
        }
        .boxed()
    }

    fn create_room(
        &self,
        user: &UserId,
        name: &str,
        meeting_id: &str,
    ) -> BoxFuture<Result<Room, BackendError>> {
        let room = Room::new(Uuid::new_v4(), *user, name.to_owned(), meeting_id.to_owned());

        async move {
            let mut tables = self.tables.write().await;

            if tables.rooms.iter().any(|r| r.meeting_id == room.meeting_id) {
                return Err(BackendError::MeetingIdAlreadyExists);
            }

            tables.users.insert(room.user_id);
            tables.rooms.push(room.clone());

            Ok(room)
        }
        .boxed()
    }

    fn rooms_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Room>, BackendError>> {
        let user = *user;

        async move {
            let tables = self.tables.read().await;

            Ok(tables
                .rooms
                .iter()
                .filter(|r| r.user_id == user)
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn create(&self, recording: NewRecording) -> BoxFuture<Result<Recording, BackendError>> {
        async move {
            let mut tables = self.tables.write().await;

            if tables
                .recordings
                .iter()
                .any(|r| r.record_id == recording.record_id)
            {
                return Err(BackendError::RecordIdAlreadyExists);
            }

            let NewRecording {
                room_id,
                record_id,
                mut details,
            } = recording;

            let id = Uuid::new_v4();
            let formats = std::mem::take(&mut details.formats);

            let recording = Recording::new(id, room_id, record_id, details, Times::now());

            let mut created = recording.clone();
            created.details.formats = formats.clone();

            tables.recordings.push(recording);
            tables.formats.insert(id, formats);

            Ok(created)
        }
        .boxed()
    }

    fn delete(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
        let id = *id;

        async move {
            let mut tables = self.tables.write().await;
            let index = tables.position(&id)?;

            tables.formats.remove(&id);
            tables.recordings.remove(index);

            Ok(())
        }
        .boxed()
    }

    fn find_by_record_id(
        &self,
        record_id: &str,
    ) -> BoxFuture<Result<Option<Recording>, BackendError>> {
        let record_id = record_id.to_owned();

        async move {
            let tables = self.tables.read().await;

            Ok(tables
                .recordings
                .iter()
                .find(|r| r.record_id == record_id)
                .map(|r| tables.with_formats(r)))
        }
        .boxed()
    }

    fn list_for_room(&self, room: &RoomId) -> BoxFuture<Result<Vec<Recording>, BackendError>> {
        let room = *room;

        async move {
            let tables = self.tables.read().await;

            Ok(tables
                .recordings
                .iter()
                .filter(|r| r.room_id == room)
                .map(|r| tables.with_formats(r))
                .collect())
        }
        .boxed()
    }

    fn list_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Recording>, BackendError>> {
        let user = *user;

        async move {
            let tables = self.tables.read().await;

            let rooms: HashSet<RoomId> = tables
                .rooms
                .iter()
                .filter(|r| r.user_id == user)
                .map(|r| r.id)
                .collect();

            Ok(tables
                .recordings
                .iter()
                .filter(|r| rooms.contains(&r.room_id))
                .map(|r| tables.with_formats(r))
                .collect())
        }
        .boxed()
    }

    fn rename(&self, id: &Uuid, name: &str) -> BoxFuture<Result<(), BackendError>> {
        let id = *id;
        let name = name.to_owned();

        async move {
            let mut tables = self.tables.write().await;
            let index = tables.position(&id)?;

            tables.recordings[index].details.name = name;
            tables.touch(index);

            Ok(())
        }
        .boxed()
    }

    fn set_visibility(
        &self,
        id: &Uuid,
        visibility: Visibility,
    ) -> BoxFuture<Result<(), BackendError>> {
        let id = *id;

        async move {
            let mut tables = self.tables.write().await;
            let index = tables.position(&id)?;

            tables.recordings[index].details.visibility = visibility;
            tables.touch(index);

            Ok(())
        }
        .boxed()
    }

    fn update(&self, id: &Uuid, details: RecordingDetails) -> BoxFuture<Result<(), BackendError>> {
        let id = *id;

        async move {
            let mut tables = self.tables.write().await;
            let index = tables.position(&id)?;

            let RecordingDetails {
                name,
                visibility,
                length,
                participants,
                recorded_at,
                formats,
            } = details;

            tables.recordings[index].details = RecordingDetails {
                name,
                visibility,
                length,
                participants,
                recorded_at,
                formats: vec![],
            };
            tables.formats.insert(id, formats);
            tables.touch(index);

            Ok(())
        }
        .boxed()
    }
}
