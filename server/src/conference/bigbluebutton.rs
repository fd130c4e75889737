//! A client for the BigBlueButton API.
//!
//! Every call is a GET to `{endpoint}api/{call}?{query}&checksum=...`,
//! where the checksum is the SHA-1 of the call name, the query and the
//! shared secret. Responses are XML documents whose `returncode` must
//! be `SUCCESS`.

use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use time::OffsetDateTime;
use url::{form_urlencoded, Url};

use super::{Conference, ExternalRecording, Metadata};
use crate::config::{get_optional_variable, get_variable};
use crate::errors::RemoteError;
use crate::recording::Format;

const SUCCESS: &str = "SUCCESS";
const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// 9999-12-31T23:59:59Z, the last second `OffsetDateTime` can represent.
const MAX_TIMESTAMP: i64 = 253_402_300_799;

pub struct BigBlueButton {
    client: reqwest::Client,
    endpoint: Url,
    secret: String,
}

impl BigBlueButton {
    /// Creates a new instance. `endpoint` is the server’s base URL,
    /// e.g. `https://bbb.example.com/bigbluebutton/`.
    pub fn new(endpoint: Url, secret: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self::with_client(client, endpoint, secret))
    }

    pub fn with_client(client: reqwest::Client, mut endpoint: Url, secret: String) -> Self {
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        BigBlueButton {
            client,
            endpoint,
            secret,
        }
    }

    pub fn from_env() -> Result<Self, reqwest::Error> {
        let endpoint = get_variable("BIGBLUEBUTTON_ENDPOINT");
        let endpoint = Url::parse(&endpoint).expect("parse BIGBLUEBUTTON_ENDPOINT");
        let secret = get_variable("BIGBLUEBUTTON_SECRET");
        let timeout = get_optional_variable("BIGBLUEBUTTON_TIMEOUT_SECONDS", DEFAULT_TIMEOUT_SECONDS);

        Self::new(endpoint, secret, Duration::from_secs(timeout))
    }

    /// Builds the signed URL for `call` with the given parameters.
    pub(crate) fn url_for(&self, call: &str, params: &[(&str, String)]) -> Url {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let mut hasher = Sha1::new();
        hasher.update(call.as_bytes());
        hasher.update(query.as_bytes());
        hasher.update(self.secret.as_bytes());
        let checksum = format!("{:x}", hasher.finalize());

        let mut url = self
            .endpoint
            .join(&format!("api/{}", call))
            .unwrap_or_else(|_| panic!("get URL for {}", call));

        if query.is_empty() {
            url.set_query(Some(&format!("checksum={}", checksum)));
        } else {
            url.set_query(Some(&format!("{}&checksum={}", query, checksum)));
        }

        url
    }

    async fn call(&self, call: &str, params: &[(&str, String)]) -> Result<ApiResponse, RemoteError> {
        let body = self
            .client
            .get(self.url_for(call, params))
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_response(&body)
    }
}

impl Conference for BigBlueButton {
    fn list_recordings(
        &self,
        meeting_id: &str,
    ) -> BoxFuture<Result<Vec<ExternalRecording>, RemoteError>> {
        let meeting_id = meeting_id.to_owned();

        async move {
            let response = self
                .call("getRecordings", &[("meetingID", meeting_id)])
                .await?;

            let recordings = response
                .recordings
                .map(|list| list.recording)
                .unwrap_or_default()
                .into_iter()
                .map(XmlRecording::into_external)
                .collect();

            Ok(recordings)
        }
        .boxed()
    }

    fn update_recording_metadata(
        &self,
        record_id: &str,
        metadata: &Metadata,
    ) -> BoxFuture<Result<(), RemoteError>> {
        let record_id = record_id.to_owned();
        let metadata: Vec<(String, String)> = metadata
            .iter()
            .map(|(k, v)| (format!("meta_{}", k), v.clone()))
            .collect();

        async move {
            let mut params = vec![("recordID", record_id)];
            params.extend(metadata.iter().map(|(k, v)| (k.as_str(), v.clone())));

            self.call("updateRecordings", &params).await?;

            Ok(())
        }
        .boxed()
    }

    fn publish_recordings(
        &self,
        record_id: &str,
        publish: bool,
    ) -> BoxFuture<Result<(), RemoteError>> {
        let params = vec![
            ("recordID", record_id.to_owned()),
            ("publish", publish.to_string()),
        ];

        async move {
            self.call("publishRecordings", &params).await?;

            Ok(())
        }
        .boxed()
    }

    fn delete_recordings(&self, record_id: &str) -> BoxFuture<Result<(), RemoteError>> {
        let params = vec![("recordID", record_id.to_owned())];

        async move {
            self.call("deleteRecordings", &params).await?;

            Ok(())
        }
        .boxed()
    }
}

fn parse_response(body: &str) -> Result<ApiResponse, RemoteError> {
    let response: ApiResponse =
        quick_xml::de::from_str(body).map_err(|source| RemoteError::Malformed { source })?;

    if response.returncode == SUCCESS {
        Ok(response)
    } else {
        Err(RemoteError::Failed {
            message_key: response.message_key.unwrap_or_default(),
            message: response.message.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    returncode: String,

    #[serde(rename = "messageKey")]
    message_key: Option<String>,

    message: Option<String>,

    recordings: Option<XmlRecordings>,
}

#[derive(Debug, Deserialize)]
struct XmlRecordings {
    #[serde(default)]
    recording: Vec<XmlRecording>,
}

#[derive(Debug, Deserialize)]
struct XmlRecording {
    #[serde(rename = "recordID")]
    record_id: String,

    #[serde(rename = "meetingID")]
    meeting_id: String,

    #[serde(default)]
    name: String,

    #[serde(default)]
    published: bool,

    #[serde(default)]
    participants: String,

    #[serde(rename = "startTime", default)]
    start_time: String,

    metadata: Option<XmlMetadata>,

    playback: Option<XmlPlayback>,
}

impl XmlRecording {
    fn into_external(self) -> ExternalRecording {
        // a name set through `updateRecordings` lives in the metadata
        let name = self
            .metadata
            .and_then(|m| m.name)
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(self.name);

        let formats = self
            .playback
            .map(|p| p.format)
            .unwrap_or_default()
            .into_iter()
            .map(|f| Format::new(f.kind, f.url, parse_number(&f.length)))
            .collect();

        let started_at = self
            .start_time
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(timestamp_from_millis);

        ExternalRecording {
            record_id: self.record_id,
            meeting_id: self.meeting_id,
            name,
            published: self.published,
            participants: parse_number(&self.participants),
            started_at,
            formats,
        }
    }
}

#[derive(Debug, Deserialize)]
struct XmlMetadata {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct XmlPlayback {
    #[serde(default)]
    format: Vec<XmlFormat>,
}

#[derive(Debug, Deserialize)]
struct XmlFormat {
    #[serde(rename = "type")]
    kind: String,

    url: String,

    #[serde(default)]
    length: String,
}

/// Converts a `startTime` in milliseconds, ignoring values before the
/// epoch or past the end of year 9999.
fn timestamp_from_millis(millis: i64) -> Option<OffsetDateTime> {
    let seconds = millis / 1000;

    if (0..=MAX_TIMESTAMP).contains(&seconds) {
        Some(OffsetDateTime::from_unix_timestamp(seconds))
    } else {
        None
    }
}

fn parse_number(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}
