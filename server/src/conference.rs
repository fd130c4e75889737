//! The capability set the recordings services need from the
//! conferencing server.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use time::OffsetDateTime;

use crate::errors::RemoteError;
use crate::recording::{Format, RecordingDetails, Visibility};

pub mod bigbluebutton;
pub mod fake;

pub use bigbluebutton::BigBlueButton;
pub use fake::FakeConference;

/// Metadata fields to set on a recording, keyed without the `meta_`
/// prefix.
pub type Metadata = BTreeMap<String, String>;

pub trait Conference {
    /// Lists the recordings of the meeting with the given ID.
    fn list_recordings(
        &self,
        meeting_id: &str,
    ) -> BoxFuture<Result<Vec<ExternalRecording>, RemoteError>>;

    fn update_recording_metadata(
        &self,
        record_id: &str,
        metadata: &Metadata,
    ) -> BoxFuture<Result<(), RemoteError>>;

    fn publish_recordings(&self, record_id: &str, publish: bool)
        -> BoxFuture<Result<(), RemoteError>>;

    fn delete_recordings(&self, record_id: &str) -> BoxFuture<Result<(), RemoteError>>;
}

/// A recording as the conferencing server reports it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExternalRecording {
    pub record_id: String,
    pub meeting_id: String,
    pub name: String,
    pub published: bool,
    pub participants: i32,
    pub started_at: Option<OffsetDateTime>,
    pub formats: Vec<Format>,
}

impl ExternalRecording {
    pub fn new(
        record_id: impl Into<String>,
        meeting_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        ExternalRecording {
            record_id: record_id.into(),
            meeting_id: meeting_id.into(),
            name: name.into(),
            published: true,
            participants: 0,
            started_at: None,
            formats: vec![],
        }
    }

    pub fn published(mut self, published: bool) -> Self {
        self.published = published;
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.formats.push(format);
        self
    }

    /// The local attributes this recording should have.
    pub fn details(&self) -> RecordingDetails {
        RecordingDetails {
            name: self.name.clone(),
            visibility: Visibility::from_published(self.published),
            length: self.formats.iter().map(|f| f.length).max().unwrap_or(0),
            participants: self.participants,
            recorded_at: self.started_at,
            formats: self.formats.clone(),
        }
    }
}
