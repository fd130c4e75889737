use serde::Serialize;
use uuid::Uuid;

use crate::recording::RecordingSummary;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum SuccessResponse<'a> {
    Healthz {
        revision: Option<&'a str>,
        timestamp: Option<&'a str>,
        version: &'a str,
    },
    Recording(RecordingSummary),
    Recordings {
        recordings: Vec<RecordingSummary>,
    },
    Resync {
        job: Uuid,
    },
}
