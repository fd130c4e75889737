use std::future::Future;
use std::time::{Duration, Instant};

use log::debug;
use percent_encoding::percent_decode_str;
use uuid::Uuid;
use warp::{
    http::StatusCode,
    reject,
    reply::{json, with_header, with_status, Reply},
};

use crate::environment::Environment;
use crate::errors::BackendError;
use crate::routes::{
    query::{ListQuery, PublishRequest, RenameRequest},
    rejection::{Context, Rejection},
    response::SuccessResponse,
};

const SERVER_TIMING_HEADER: &str = "server-timing";
type RouteResult = Result<Box<dyn Reply>, reject::Rejection>;

macro_rules! timed {
    ($($expression:stmt);+) => {
        let start = Instant::now();

        // TODO when `try` blocks are stabilized, we can wrap the body
        // and return the headers even on errors
        let result = { $($expression)+ };

        Ok(Box::new(with_header(
            result,
            SERVER_TIMING_HEADER,
            format_server_timing(start.elapsed()),
        )) as Box<dyn Reply>)
    };
}

pub async fn list(environment: Environment, user: String, query: ListQuery) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::list(user.clone()), e);

        let id = parse_id(&user).map_err(error_handler)?;
        debug!(environment.logger, "Listing recordings..."; "user" => &user, "q" => ?query.q);

        let recordings = environment
            .query
            .list(&id, query.q.as_deref())
            .await
            .map_err(error_handler)?;

        json(&SuccessResponse::Recordings { recordings })
    }
}

pub async fn rename(
    environment: Environment,
    record_id: String,
    request: RenameRequest,
) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::rename(record_id.clone()), e);

        let record_id = decode_record_id(&record_id).map_err(error_handler)?;
        let mutations = environment.mutations.clone();
        let id = record_id.clone();
        let RenameRequest { name } = request;

        let recording = detached(async move { mutations.rename(&id, &name).await })
            .await
            .map_err(error_handler)?;

        with_header(
            json(&SuccessResponse::Recording(recording.summary())),
            "location",
            environment.urls.recording(&record_id).as_str(),
        )
    }
}

pub async fn publish(
    environment: Environment,
    record_id: String,
    request: PublishRequest,
) -> RouteResult {
    timed! {
        let PublishRequest { publish } = request;
        let error_handler =
            |e: BackendError| Rejection::new(Context::publish(record_id.clone(), publish), e);

        let record_id = decode_record_id(&record_id).map_err(error_handler)?;
        let mutations = environment.mutations.clone();
        let id = record_id.clone();

        let recording = detached(async move { mutations.set_visibility(&id, publish).await })
            .await
            .map_err(error_handler)?;

        json(&SuccessResponse::Recording(recording.summary()))
    }
}

pub async fn delete(environment: Environment, record_id: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::delete(record_id.clone()), e);

        let record_id = decode_record_id(&record_id).map_err(error_handler)?;
        let mutations = environment.mutations.clone();
        let id = record_id.clone();

        detached(async move { mutations.delete(&id).await })
            .await
            .map_err(error_handler)?;

        StatusCode::NO_CONTENT
    }
}

pub async fn resync(environment: Environment, user: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::resync(user.clone()), e);

        let id = parse_id(&user).map_err(error_handler)?;
        let job = environment.queue.enqueue(id).await.map_err(error_handler)?;
        debug!(environment.logger, "Enqueued resync"; "user" => &user, "job" => %job);

        with_header(
            with_status(json(&SuccessResponse::Resync { job }), StatusCode::ACCEPTED),
            "location",
            environment.urls.resync_job(&job).as_str(),
        )
    }
}

pub async fn resync_status(environment: Environment, job: String) -> RouteResult {
    timed! {
        let error_handler = |e: BackendError| Rejection::new(Context::resync_status(job.clone()), e);

        let id = parse_id(&job).map_err(error_handler)?;
        let status = environment.queue.status(&id).await.map_err(error_handler)?;

        json(&status)
    }
}

fn parse_id(id: &str) -> Result<Uuid, BackendError> {
    Uuid::parse_str(id).map_err(|_| BackendError::InvalidId(id.to_owned()))
}

/// Path segments arrive percent-encoded.
fn decode_record_id(segment: &str) -> Result<String, BackendError> {
    percent_decode_str(segment)
        .decode_utf8()
        .map(|id| id.into_owned())
        .map_err(|_| BackendError::InvalidId(segment.to_owned()))
}

/// Runs a mutation on its own task, so it completes (or fails cleanly)
/// even if the client goes away mid-request.
async fn detached<T, F>(future: F) -> Result<T, BackendError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, BackendError>> + Send + 'static,
{
    tokio::spawn(future)
        .await
        .map_err(|source| BackendError::TaskFailed { source })?
}

fn format_server_timing(seconds: Duration) -> String {
    format!("handler;dur={}", seconds.as_secs_f64() * 1000.0)
}
