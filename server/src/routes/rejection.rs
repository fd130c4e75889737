use serde::Serialize;
use warp::reject;

use crate::errors::BackendError;

#[derive(Debug)]
pub struct Rejection {
    pub(crate) context: Context,
    pub(crate) error: BackendError,
}

impl Rejection {
    pub fn new(context: Context, error: BackendError) -> Self {
        Rejection { context, error }
    }

    pub fn flatten(&self) -> FlattenedRejection {
        FlattenedRejection {
            context: self.context.clone(),
            message: format!("{}", self.error),
        }
    }
}

impl reject::Reject for Rejection {}

#[derive(Debug, Serialize)]
pub struct FlattenedRejection {
    #[serde(flatten)]
    pub(crate) context: Context,
    pub(crate) message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum Context {
    Delete { record_id: String },
    List { user: String },
    Publish { record_id: String, publish: bool },
    Rename { record_id: String },
    Request,
    Resync { user: String },
    ResyncStatus { job: String },
}

impl Context {
    pub fn delete(record_id: String) -> Context {
        Context::Delete { record_id }
    }

    pub fn list(user: String) -> Context {
        Context::List { user }
    }

    pub fn publish(record_id: String, publish: bool) -> Context {
        Context::Publish { record_id, publish }
    }

    pub fn rename(record_id: String) -> Context {
        Context::Rename { record_id }
    }

    pub fn request() -> Context {
        Context::Request
    }

    pub fn resync(user: String) -> Context {
        Context::Resync { user }
    }

    pub fn resync_status(job: String) -> Context {
        Context::ResyncStatus { job }
    }
}
