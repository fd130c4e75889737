//! An in-memory conferencing server for tests and local development.

use std::collections::{HashMap, HashSet};

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Mutex;

use super::{Conference, ExternalRecording, Metadata};
use crate::errors::RemoteError;

/// The operations of [`Conference`], for failure injection and call
/// inspection.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    List,
    UpdateMetadata,
    Publish,
    Delete,
}

/// A call made against the fake, with the ID it was made for (meeting
/// ID for listings, record ID otherwise).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Call {
    pub operation: Operation,
    pub id: String,
}

#[derive(Default)]
struct State {
    recordings: Vec<ExternalRecording>,
    failing_operations: HashSet<Operation>,
    failing_meetings: HashSet<String>,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeConference {
    state: Mutex<State>,
}

impl FakeConference {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_recording(&self, recording: ExternalRecording) {
        self.state.lock().await.recordings.push(recording);
    }

    /// Replaces a recording with the same record ID, or adds it.
    pub async fn put_recording(&self, recording: ExternalRecording) {
        let mut state = self.state.lock().await;

        match state
            .recordings
            .iter_mut()
            .find(|r| r.record_id == recording.record_id)
        {
            Some(existing) => *existing = recording,
            None => state.recordings.push(recording),
        }
    }

    pub async fn remove_recording(&self, record_id: &str) {
        self.state
            .lock()
            .await
            .recordings
            .retain(|r| r.record_id != record_id);
    }

    pub async fn recording(&self, record_id: &str) -> Option<ExternalRecording> {
        self.state
            .lock()
            .await
            .recordings
            .iter()
            .find(|r| r.record_id == record_id)
            .cloned()
    }

    /// Makes every call of `operation` fail until cleared.
    pub async fn fail(&self, operation: Operation) {
        self.state.lock().await.failing_operations.insert(operation);
    }

    /// Makes listings for `meeting_id` fail until cleared.
    pub async fn fail_meeting(&self, meeting_id: &str) {
        self.state
            .lock()
            .await
            .failing_meetings
            .insert(meeting_id.to_owned());
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;

        state.failing_operations.clear();
        state.failing_meetings.clear();
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.state.lock().await.calls.clone()
    }
}

impl State {
    fn record(&mut self, operation: Operation, id: &str) -> Result<(), RemoteError> {
        self.calls.push(Call {
            operation,
            id: id.to_owned(),
        });

        if self.failing_operations.contains(&operation) {
            return Err(RemoteError::Unavailable(format!("{:?} is failing", operation)));
        }

        Ok(())
    }

    fn find_mut(&mut self, record_id: &str) -> Result<&mut ExternalRecording, RemoteError> {
        self.recordings
            .iter_mut()
            .find(|r| r.record_id == record_id)
            .ok_or_else(|| RemoteError::Failed {
                message_key: "notFound".to_owned(),
                message: format!("We could not find recordings: {}", record_id),
            })
    }
}

impl Conference for FakeConference {
    fn list_recordings(
        &self,
        meeting_id: &str,
    ) -> BoxFuture<Result<Vec<ExternalRecording>, RemoteError>> {
        let meeting_id = meeting_id.to_owned();

        async move {
            let mut state = self.state.lock().await;
            state.record(Operation::List, &meeting_id)?;

            if state.failing_meetings.contains(&meeting_id) {
                return Err(RemoteError::Unavailable(format!(
                    "listing {} is failing",
                    meeting_id
                )));
            }

            Ok(state
                .recordings
                .iter()
                .filter(|r| r.meeting_id == meeting_id)
                .cloned()
                .collect())
        }
        .boxed()
    }

    fn update_recording_metadata(
        &self,
        record_id: &str,
        metadata: &Metadata,
    ) -> BoxFuture<Result<(), RemoteError>> {
        let record_id = record_id.to_owned();
        let name = metadata.get("name").cloned();

        async move {
            let mut state = self.state.lock().await;
            state.record(Operation::UpdateMetadata, &record_id)?;

            let recording = state.find_mut(&record_id)?;

            if let Some(name) = name {
                recording.name = name;
            }

            Ok(())
        }
        .boxed()
    }

    fn publish_recordings(
        &self,
        record_id: &str,
        publish: bool,
    ) -> BoxFuture<Result<(), RemoteError>> {
        let record_id = record_id.to_owned();

        async move {
            let mut state = self.state.lock().await;
            state.record(Operation::Publish, &record_id)?;
            state.find_mut(&record_id)?.published = publish;

            Ok(())
        }
        .boxed()
    }

    fn delete_recordings(&self, record_id: &str) -> BoxFuture<Result<(), RemoteError>> {
        let record_id = record_id.to_owned();

        async move {
            let mut state = self.state.lock().await;
            state.record(Operation::Delete, &record_id)?;
            state.find_mut(&record_id)?;
            state.recordings.retain(|r| r.record_id != record_id);

            Ok(())
        }
        .boxed()
    }
}
