use std::sync::Arc;

use log::{error, warn, Logger};
use warp::filters::body::BodyDeserializeError;
use warp::http::StatusCode;
use warp::reject;
use warp::reply::{json, with_status, Json, WithStatus};

use crate::errors::BackendError;

pub mod admin;
mod handlers;
mod query;
mod rejection;
mod response;

pub use internal::*;

/// The largest JSON body to accept. Requests only carry a name or a
/// flag.
const MAX_CONTENT_LENGTH: u64 = 16 * 1024;

pub async fn format_rejection(
    logger: Arc<Logger>,
    rej: reject::Rejection,
) -> Result<WithStatus<Json>, reject::Rejection> {
    if let Some(r) = rej.find::<rejection::Rejection>() {
        let e = &r.error;
        let status = status_code_for(e);

        if status.is_server_error() {
            error!(logger, "Backend error"; "context" => ?r.context, "error" => ?r.error, "status" => %status, "message" => %r.error);
        } else {
            warn!(logger, "Request failed"; "context" => ?r.context, "status" => %status, "message" => %r.error);
        }

        return Ok(with_status(json(&r.flatten()), status));
    }

    if let Some(e) = rej.find::<BodyDeserializeError>() {
        let r = rejection::Rejection::new(
            rejection::Context::request(),
            BackendError::MalformedRequest(e.to_string()),
        );

        return Ok(with_status(json(&r.flatten()), status_code_for(&r.error)));
    }

    Err(rej)
}

fn status_code_for(e: &BackendError) -> StatusCode {
    use BackendError::*;

    match e {
        BlankName | InvalidId(..) | MalformedRequest(..) => StatusCode::BAD_REQUEST,
        NonExistentRecording(..) | NonExistentId(..) | UnknownSyncJob(..) => StatusCode::NOT_FOUND,
        Remote { .. } => StatusCode::BAD_GATEWAY,
        SyncQueueFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

mod internal {
    use warp::body::{content_length_limit, json};
    use warp::filters::BoxedFilter;
    use warp::path::end;
    use warp::Filter;
    use warp::Reply;
    use warp::{delete, get as g, path as p, path::param as par, post, query};

    use super::{handlers, query as q, MAX_CONTENT_LENGTH};
    use crate::environment::Environment;

    type Route = BoxedFilter<(Box<dyn Reply>,)>;

    macro_rules! route_filter {
    ($route_variable:ident; $first:expr) => (let $route_variable = $route_variable.and($first););
    ($route_variable:ident; $first:expr, $($rest:expr),+) => (
        let $route_variable = $route_variable.and($first);
        route_filter!($route_variable; $($rest),+);
    )
}

    macro_rules! route {
    ($name:ident => $handler:ident, $route_variable:ident; $($filters:expr),+) => (
        pub fn $name(environment: Environment) -> Route {
            let r = environment.urls.recordings_path.clone();

            let $route_variable = warp::any()
                .map(move || environment.clone())
                .and(p(r));

            route_filter!($route_variable; $($filters),+);

            $route_variable.and_then(handlers::$handler)
                .boxed()
        }
    );
}

    route!(make_list_route => list, rt; p("users"), par::<String>(), end(), g(), query::<q::ListQuery>());
    route!(make_rename_route => rename, rt; p("id"), par::<String>(), end(), post(), content_length_limit(MAX_CONTENT_LENGTH), json::<q::RenameRequest>());
    route!(make_publish_route => publish, rt; p("id"), par::<String>(), p("publish"), end(), post(), content_length_limit(MAX_CONTENT_LENGTH), json::<q::PublishRequest>());
    route!(make_delete_route => delete, rt; p("id"), par::<String>(), end(), delete());
    route!(make_resync_route => resync, rt; p("users"), par::<String>(), p("resync"), end(), post());
    route!(make_resync_status_route => resync_status, rt; p("resync"), par::<String>(), end(), g());

    /// All the recordings routes, in matching order.
    pub fn make_routes(environment: Environment) -> Route {
        make_list_route(environment.clone())
            .or(make_rename_route(environment.clone()))
            .unify()
            .or(make_publish_route(environment.clone()))
            .unify()
            .or(make_delete_route(environment.clone()))
            .unify()
            .or(make_resync_route(environment.clone()))
            .unify()
            .or(make_resync_status_route(environment))
            .unify()
            .boxed()
    }
}
