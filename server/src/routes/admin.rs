use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use log::{info, trace};
use warp::http::StatusCode;
use warp::reject;
use warp::reply::{json, Reply};
use warp::Filter;

use super::response::SuccessResponse;
use crate::environment::Environment;

pub fn make_healthz_route(
    environment: Environment,
) -> impl warp::Filter<Extract = (impl Reply,), Error = reject::Rejection> + Clone {
    warp::path("healthz")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            trace!(environment.logger, "Health check");

            json(&SuccessResponse::Healthz {
                revision: info::REVISION,
                timestamp: info::BUILD_TIMESTAMP,
                version: info::VERSION,
            })
        })
}

pub type TerminationFuture<'a> = BoxFuture<'a, ()>;

pub type TerminationFunctionWrapper<'a> =
    Arc<dyn Fn() -> TerminationFuture<'a> + Send + Sync + 'a>;

pub fn make_termination_route<'a>(
    environment: Environment,
    terminate: TerminationFunctionWrapper<'a>,
) -> impl warp::Filter<Extract = (impl Reply,), Error = reject::Rejection> + Clone + 'a {
    let handler = move || -> BoxFuture<Result<StatusCode, std::convert::Infallible>> {
        let terminate = terminate.clone();
        let logger = environment.logger.clone();

        async move {
            info!(logger, "Termination requested");
            terminate().await;
            Ok(StatusCode::NO_CONTENT)
        }
        .boxed()
    };

    warp::path("terminate")
        .and(warp::path::end())
        .and(warp::post())
        .and_then(handler)
}
