use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The ID of a user.
pub type UserId = Uuid;

/// The ID of a room.
pub type RoomId = Uuid;

/// Whether a recording is visible to people other than its owner.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Published,
    Unpublished,
}

impl Visibility {
    pub fn from_published(published: bool) -> Self {
        if published {
            Visibility::Published
        } else {
            Visibility::Unpublished
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Published => "published",
            Visibility::Unpublished => "unpublished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "published" => Some(Visibility::Published),
            "unpublished" => Some(Visibility::Unpublished),
            _ => None,
        }
    }
}

/// A room owned by a single user. Recordings are attached to rooms by
/// the meeting ID the conferencing server knows the room by.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Room {
    pub(crate) id: RoomId,
    pub(crate) user_id: UserId,
    pub(crate) name: String,
    pub(crate) meeting_id: String,
}

impl Room {
    pub fn new(id: RoomId, user_id: UserId, name: String, meeting_id: String) -> Self {
        Room {
            id,
            user_id,
            name,
            meeting_id,
        }
    }

    pub fn id(&self) -> &RoomId {
        &self.id
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn meeting_id(&self) -> &str {
        &self.meeting_id
    }
}

/// One playable or downloadable variant of a recording.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Format {
    /// The kind of playback, e.g. `presentation` or `video`.
    pub recording_type: String,

    /// Where the variant can be played.
    pub url: String,

    /// The length in minutes.
    pub length: i32,
}

impl Format {
    pub fn new(recording_type: impl Into<String>, url: impl Into<String>, length: i32) -> Self {
        Format {
            recording_type: recording_type.into(),
            url: url.into(),
            length,
        }
    }
}

/// The attributes of a recording that may change after it’s created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RecordingDetails {
    pub name: String,
    pub visibility: Visibility,

    /// The length in minutes of the longest format.
    pub length: i32,

    pub participants: i32,
    pub recorded_at: Option<OffsetDateTime>,
    pub formats: Vec<Format>,
}

/// A recording as it’s kept in the store.
#[derive(Clone, Debug)]
pub struct Recording {
    pub(crate) id: Uuid,
    pub(crate) room_id: RoomId,

    /// The identifier the conferencing server knows the recording by.
    /// Never changes once the recording is created.
    pub(crate) record_id: String,

    pub(crate) details: RecordingDetails,
    pub(crate) times: Times,
}

impl Recording {
    pub fn new(
        id: Uuid,
        room_id: RoomId,
        record_id: String,
        details: RecordingDetails,
        times: Times,
    ) -> Self {
        Recording {
            id,
            room_id,
            record_id,
            details,
            times,
        }
    }

    pub fn id(&self) -> &Uuid {
        &self.id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn visibility(&self) -> Visibility {
        self.details.visibility
    }

    pub fn formats(&self) -> &[Format] {
        &self.details.formats
    }

    pub fn details(&self) -> &RecordingDetails {
        &self.details
    }

    pub fn times(&self) -> &Times {
        &self.times
    }

    pub(crate) fn with_name(mut self, name: String) -> Self {
        self.details.name = name;
        self
    }

    pub(crate) fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.details.visibility = visibility;
        self
    }

    pub fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            id: self.id,
            record_id: self.record_id.clone(),
            name: self.details.name.clone(),
            visibility: self.details.visibility,
            length: self.details.length,
            participants: self.details.participants,
            recorded_at: self.details.recorded_at.map(|t| t.unix_timestamp()),
            formats: self.details.formats.clone(),
        }
    }
}

/// A recording about to be inserted into the store.
#[derive(Clone, Debug)]
pub struct NewRecording {
    pub(crate) room_id: RoomId,
    pub(crate) record_id: String,
    pub(crate) details: RecordingDetails,
}

impl NewRecording {
    pub fn new(room_id: RoomId, record_id: impl Into<String>, details: RecordingDetails) -> Self {
        NewRecording {
            room_id,
            record_id: record_id.into(),
            details,
        }
    }
}

/// The view of a recording returned to callers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RecordingSummary {
    pub id: Uuid,
    pub record_id: String,
    pub name: String,
    pub visibility: Visibility,
    pub length: i32,
    pub participants: i32,

    /// When the meeting started, as a Unix timestamp.
    pub recorded_at: Option<i64>,

    pub formats: Vec<Format>,
}

/// When a row was created and last modified.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Times {
    #[serde(with = "time::serde::timestamp")]
    pub(crate) created_at: OffsetDateTime,

    #[serde(with = "time::serde::timestamp")]
    pub(crate) updated_at: OffsetDateTime,
}

impl Times {
    pub fn new(created_at: OffsetDateTime, updated_at: OffsetDateTime) -> Self {
        Times {
            created_at,
            updated_at,
        }
    }

    pub fn now() -> Self {
        let now = OffsetDateTime::now_utc();

        Times {
            created_at: now,
            updated_at: now,
        }
    }
}
