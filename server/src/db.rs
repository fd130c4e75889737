use futures::future::BoxFuture;
use uuid::Uuid;

use crate::errors::BackendError;
use crate::recording::{NewRecording, Recording, RecordingDetails, Room, RoomId, UserId, Visibility};

pub mod memory;

/// The recordings store. Listings are always in creation order, and
/// deleting a recording deletes its formats.
pub trait Db {
    fn create_user(&self) -> BoxFuture<Result<UserId, BackendError>>;

    fn create_room(
        &self,
        user: &UserId,
        name: &str,
        meeting_id: &str,
    ) -> BoxFuture<Result<Room, BackendError>>;

    fn rooms_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Room>, BackendError>>;

    fn create(&self, recording: NewRecording) -> BoxFuture<Result<Recording, BackendError>>;

    fn delete(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>>;

    fn find_by_record_id(
        &self,
        record_id: &str,
    ) -> BoxFuture<Result<Option<Recording>, BackendError>>;

    fn list_for_room(&self, room: &RoomId) -> BoxFuture<Result<Vec<Recording>, BackendError>>;

    fn list_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Recording>, BackendError>>;

    fn rename(&self, id: &Uuid, name: &str) -> BoxFuture<Result<(), BackendError>>;

    fn set_visibility(
        &self,
        id: &Uuid,
        visibility: Visibility,
    ) -> BoxFuture<Result<(), BackendError>>;

    /// Replaces every mutable attribute of the recording, formats
    /// included, in one transaction.
    fn update(&self, id: &Uuid, details: RecordingDetails) -> BoxFuture<Result<(), BackendError>>;
}

pub use self::postgres::*;

mod postgres {
    use std::collections::HashMap;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use sqlx::{
        self,
        postgres::{PgPool, PgRow},
        Postgres, Transaction,
    };
    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::errors::BackendError;
    use crate::recording::{
        Format, NewRecording, Recording, RecordingDetails, Room, RoomId, Times, UserId,
        Visibility,
    };

    const RECORDINGS_RECORD_ID_CONSTRAINT: &str = "recordings_record_id";
    const ROOMS_MEETING_ID_CONSTRAINT: &str = "rooms_meeting_id";

    pub struct PgDb {
        pool: PgPool,
    }

    impl PgDb {
        pub fn new(pool: PgPool) -> Self {
            PgDb { pool }
        }
    }

    // these can be simplified once async functions in traits are stabilized
    impl super::Db for PgDb {
        fn create_user(&self) -> BoxFuture<Result<UserId, BackendError>> {
            async move {
                let query = sqlx::query_as(include_str!("queries/create_user.sql"));

                let (id,): (Uuid,) = query.fetch_one(&self.pool).await.map_err(map_sqlx_error)?;

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
            let user = *user;
            let name = name.to_owned();
            let meeting_id = meeting_id.to_owned();

            async move {
                let query = sqlx::query_as(include_str!("queries/create_room.sql"));

                let (id,): (Uuid,) = query
                    .bind(user)
                    .bind(&name)
                    .bind(&meeting_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(Room::new(id, user, name, meeting_id))
            }
            .boxed()
        }

        fn rooms_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Room>, BackendError>> {
            let user = *user;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_rooms.sql"));

                let rooms = query
                    .bind(user)
                    .try_map(|row: PgRow| {
                        let id: Uuid = try_get(&row, "id")?;
                        let user_id: Uuid = try_get(&row, "user_id")?;
                        let name: String = try_get(&row, "name")?;
                        let meeting_id: String = try_get(&row, "meeting_id")?;

                        Ok(Room::new(id, user_id, name, meeting_id))
                    })
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                Ok(rooms)
            }
            .boxed()
        }

        fn create(&self, recording: NewRecording) -> BoxFuture<Result<Recording, BackendError>> {
            async move {
                let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

                let query = sqlx::query_as(include_str!("queries/create_recording.sql"));
                let details = &recording.details;

                let (id, created_at, updated_at): (Uuid, OffsetDateTime, OffsetDateTime) = query
                    .bind(recording.room_id)
                    .bind(&recording.record_id)
                    .bind(&details.name)
                    .bind(details.visibility.as_str())
                    .bind(details.length)
                    .bind(details.participants)
                    .bind(details.recorded_at)
                    .fetch_one(&mut tx)
                    .await
                    .map_err(map_sqlx_error)?;

                insert_formats(&mut tx, id, &details.formats).await?;

                tx.commit().await.map_err(map_sqlx_error)?;

                Ok(Recording::new(
                    id,
                    recording.room_id,
                    recording.record_id,
                    recording.details,
                    Times::new(created_at, updated_at),
                ))
            }
            .boxed()
        }

        fn delete(&self, id: &Uuid) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;

            async move {
                let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

                // formats first, so the cascade doesn’t depend on the
                // foreign key alone
                sqlx::query(include_str!("queries/delete_formats.sql"))
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(map_sqlx_error)?;

                let count = sqlx::query(include_str!("queries/delete_recording.sql"))
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    return Err(BackendError::NonExistentId(id));
                }

                tx.commit().await.map_err(map_sqlx_error)?;

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
                let query = sqlx::query(include_str!("queries/retrieve_by_record_id.sql"));

                let recording = query
                    .bind(&record_id)
                    .try_map(|row: PgRow| recording_from_row(&row))
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                match recording {
                    Some(recording) => {
                        let mut recordings = attach_formats(&self.pool, vec![recording]).await?;
                        Ok(recordings.pop())
                    }
                    None => Ok(None),
                }
            }
            .boxed()
        }

        fn list_for_room(&self, room: &RoomId) -> BoxFuture<Result<Vec<Recording>, BackendError>> {
            let room = *room;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_for_room.sql"));

                let recordings = query
                    .bind(room)
                    .try_map(|row: PgRow| recording_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                attach_formats(&self.pool, recordings).await
            }
            .boxed()
        }

        fn list_for_user(&self, user: &UserId) -> BoxFuture<Result<Vec<Recording>, BackendError>> {
            let user = *user;

            async move {
                let query = sqlx::query(include_str!("queries/retrieve_for_user.sql"));

                let recordings = query
                    .bind(user)
                    .try_map(|row: PgRow| recording_from_row(&row))
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?;

                attach_formats(&self.pool, recordings).await
            }
            .boxed()
        }

        fn rename(&self, id: &Uuid, name: &str) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;
            let name = name.to_owned();

            async move {
                let count = sqlx::query(include_str!("queries/rename.sql"))
                    .bind(id)
                    .bind(&name)
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
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
                let count = sqlx::query(include_str!("queries/set_visibility.sql"))
                    .bind(id)
                    .bind(visibility.as_str())
                    .execute(&self.pool)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    Err(BackendError::NonExistentId(id))
                } else {
                    Ok(())
                }
            }
            .boxed()
        }

        fn update(
            &self,
            id: &Uuid,
            details: RecordingDetails,
        ) -> BoxFuture<Result<(), BackendError>> {
            let id = *id;

            async move {
                let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

                let count = sqlx::query(include_str!("queries/update_recording.sql"))
                    .bind(id)
                    .bind(&details.name)
                    .bind(details.visibility.as_str())
                    .bind(details.length)
                    .bind(details.participants)
                    .bind(details.recorded_at)
                    .execute(&mut tx)
                    .await
                    .map_err(map_sqlx_error)?
                    .rows_affected();

                if count == 0 {
                    return Err(BackendError::NonExistentId(id));
                }

                sqlx::query(include_str!("queries/delete_formats.sql"))
                    .bind(id)
                    .execute(&mut tx)
                    .await
                    .map_err(map_sqlx_error)?;

                insert_formats(&mut tx, id, &details.formats).await?;

                tx.commit().await.map_err(map_sqlx_error)?;

                Ok(())
            }
            .boxed()
        }
    }

    async fn insert_formats(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        formats: &[Format],
    ) -> Result<(), BackendError> {
        for (position, format) in formats.iter().enumerate() {
            sqlx::query(include_str!("queries/create_format.sql"))
                .bind(id)
                .bind(position as i16)
                .bind(&format.recording_type)
                .bind(&format.url)
                .bind(format.length)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }

        Ok(())
    }

    async fn attach_formats(
        pool: &PgPool,
        mut recordings: Vec<Recording>,
    ) -> Result<Vec<Recording>, BackendError> {
        if recordings.is_empty() {
            return Ok(recordings);
        }

        let ids: Vec<Uuid> = recordings.iter().map(|r| r.id).collect();

        let rows = sqlx::query(include_str!("queries/retrieve_formats.sql"))
            .bind(ids)
            .try_map(|row: PgRow| {
                let recording_id: Uuid = try_get(&row, "recording_id")?;
                let recording_type: String = try_get(&row, "recording_type")?;
                let url: String = try_get(&row, "url")?;
                let length: i32 = try_get(&row, "length")?;

                Ok((recording_id, Format::new(recording_type, url, length)))
            })
            .fetch_all(pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut formats: HashMap<Uuid, Vec<Format>> = HashMap::new();

        for (recording_id, format) in rows {
            formats.entry(recording_id).or_default().push(format);
        }

        for recording in recordings.iter_mut() {
            recording.details.formats = formats.remove(&recording.id).unwrap_or_default();
        }

        Ok(recordings)
    }

    fn recording_from_row(row: &PgRow) -> Result<Recording, sqlx::Error> {
        let id: Uuid = try_get(row, "id")?;
        let room_id: Uuid = try_get(row, "room_id")?;
        let record_id: String = try_get(row, "record_id")?;
        let name: String = try_get(row, "name")?;
        let visibility: String = try_get(row, "visibility")?;
        let length: i32 = try_get(row, "length")?;
        let participants: i32 = try_get(row, "participants")?;
        let recorded_at: Option<OffsetDateTime> = try_get(row, "recorded_at")?;
        let created_at: OffsetDateTime = try_get(row, "created_at")?;
        let updated_at: OffsetDateTime = try_get(row, "updated_at")?;

        let visibility = Visibility::parse(&visibility).ok_or_else(|| {
            // the column has a check constraint, but just for completeness...
            sqlx::Error::Decode(Box::new(BackendError::InvalidVisibility(visibility.clone())))
        })?;

        let details = RecordingDetails {
            name,
            visibility,
            length,
            participants,
            recorded_at,
            formats: vec![],
        };

        Ok(Recording::new(
            id,
            room_id,
            record_id,
            details,
            Times::new(created_at, updated_at),
        ))
    }

    fn try_get<'a, T: sqlx::Type<sqlx::Postgres> + sqlx::decode::Decode<'a, sqlx::Postgres>>(
        row: &'a PgRow,
        column: &str,
    ) -> Result<T, sqlx::Error> {
        use sqlx::prelude::*;

        row.try_get(column)
    }

    fn map_sqlx_error(error: sqlx::Error) -> BackendError {
        use sqlx::Error;

        match error {
            Error::Database(ref e) if e.constraint() == Some(RECORDINGS_RECORD_ID_CONSTRAINT) => {
                BackendError::RecordIdAlreadyExists
            }
            Error::Database(ref e) if e.constraint() == Some(ROOMS_MEETING_ID_CONSTRAINT) => {
                BackendError::MeetingIdAlreadyExists
            }
            _ => BackendError::Sqlx { source: error },
        }
    }
}
