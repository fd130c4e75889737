use std::sync::Arc;

use crate::db::Db;
use crate::errors::BackendError;
use crate::normalization::matches_term;
use crate::recording::{RecordingSummary, UserId};

/// The read path: recordings of a user’s rooms, optionally filtered by
/// name.
pub struct RecordingsQuery {
    db: Arc<dyn Db + Send + Sync>,
}

impl RecordingsQuery {
    pub fn new(db: Arc<dyn Db + Send + Sync>) -> Self {
        RecordingsQuery { db }
    }

    /// Lists the recordings in rooms owned by `user`, in creation order.
    /// With a non-blank `term`, only recordings whose name contains it
    /// (ignoring case) are returned.
    pub async fn list(
        &self,
        user: &UserId,
        term: Option<&str>,
    ) -> Result<Vec<RecordingSummary>, BackendError> {
        let recordings = self.db.list_for_user(user).await?;

        Ok(recordings
            .iter()
            .filter(|r| term.map_or(true, |term| matches_term(r.name(), term)))
            .map(|r| r.summary())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;
    use uuid::Uuid;

    use super::RecordingsQuery;
    use crate::conference::ExternalRecording;
    use crate::db::memory::MemoryDb;
    use crate::db::Db;
    use crate::recording::{NewRecording, Room};
    use crate::service::testing::user_with_rooms;

    async fn attach(db: &MemoryDb, room: &Room, record_id: &str, name: &str) -> Uuid {
        let details = ExternalRecording::new(record_id, room.meeting_id(), name).details();

        *db.create(NewRecording::new(*room.id(), record_id, details))
            .await
            .unwrap()
            .id()
    }

    fn ids(summaries: &[crate::recording::RecordingSummary]) -> Vec<Uuid> {
        summaries.iter().map(|s| s.id).collect()
    }

    #[tokio::test]
    async fn listing_is_scoped_to_the_owner_in_creation_order() {
        let db = Arc::new(MemoryDb::new());
        let (owner, owner_rooms) = user_with_rooms(&db, 5).await;
        let (other, _) = user_with_rooms(&db, 5).await;

        let mut expected = vec![];
        for (i, room_index) in [0usize, 3, 1, 4, 4, 2].iter().enumerate() {
            let room = &owner_rooms[*room_index];
            expected.push(attach(&db, room, &format!("r{}", i), &format!("Recording {}", i)).await);
        }

        let query = RecordingsQuery::new(db.clone());

        let listed = query.list(&owner, Some("")).await.unwrap();
        assert_eq!(ids(&listed), expected);

        let listed = query.list(&owner, None).await.unwrap();
        assert_eq!(ids(&listed), expected);

        assert!(query.list(&other, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_users_get_nothing() {
        let db = Arc::new(MemoryDb::new());
        let query = RecordingsQuery::new(db);

        let listed = query.list(&Uuid::new_v4(), Some("anything")).await.unwrap();

        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn search_matches_names_case_insensitively() {
        let db = Arc::new(MemoryDb::new());
        let (owner, rooms) = user_with_rooms(&db, 1).await;
        let (other, other_rooms) = user_with_rooms(&db, 2).await;

        let mut expected = vec![];
        for i in 0..5 {
            expected.push(attach(&db, &rooms[0], &format!("g{}", i), &format!("Greenlight {}", i)).await);
        }
        for i in 0..10usize {
            let room = &other_rooms[i % 2];
            attach(&db, room, &format!("o{}", i), &format!("Other {}", i)).await;
        }
        attach(&db, &other_rooms[0], "og", "Greenlight elsewhere").await;

        let query = RecordingsQuery::new(db.clone());

        let mut listed = ids(&query.list(&owner, Some("greenlight")).await.unwrap());
        listed.sort();
        expected.sort();
        assert_eq!(listed, expected);

        assert_eq!(query.list(&owner, Some("GREEN")).await.unwrap().len(), 5);
        assert!(query.list(&owner, Some("other")).await.unwrap().is_empty());
        assert_eq!(query.list(&other, Some("greenlight")).await.unwrap().len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64, ..ProptestConfig::default()
        })]

        #[test]
        fn search_never_leaks_other_users_recordings(
            names in proptest::collection::vec(("[a-zA-Z ]{1,12}", any::<bool>()), 1..12),
            term in "[a-zA-Z]{0,3}",
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();

            runtime.block_on(async {
                let db = Arc::new(MemoryDb::new());
                let (owner, rooms) = user_with_rooms(&db, 1).await;
                let (_, other_rooms) = user_with_rooms(&db, 1).await;

                let mut owned = vec![];
                for (i, (name, mine)) in names.iter().enumerate() {
                    let room = if *mine { &rooms[0] } else { &other_rooms[0] };
                    let id = attach(&db, room, &format!("r{}", i), name).await;

                    if *mine && name.to_lowercase().contains(&term.to_lowercase()) {
                        owned.push(id);
                    }
                }

                let listed = RecordingsQuery::new(db.clone()).list(&owner, Some(&term)).await.unwrap();

                assert_eq!(ids(&listed), owned);
            });
        }
    }
}
