use std::error::Error;
use std::sync::Arc;

use futures::future::FutureExt;
use log::{info, initialize_logger, warn};
use sqlx::postgres::PgPool;
use tokio::sync::mpsc;
use warp::Filter;

use recordings::conference::{BigBlueButton, Conference};
use recordings::config::{get_flag, get_optional_variable, get_variable};
use recordings::db::memory::MemoryDb;
use recordings::db::{Db, PgDb};
use recordings::environment::{Config, Environment};
use recordings::routes;
use recordings::service::{queue, sync};
use recordings::urls::Urls;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    let logger = initialize_logger();

    let main_port: u16 = get_variable("RECORDINGS_PORT")
        .parse()
        .expect("parse RECORDINGS_PORT as u16");
    let admin_port: u16 = get_variable("RECORDINGS_ADMIN_PORT")
        .parse()
        .expect("parse RECORDINGS_ADMIN_PORT as u16");

    info!(logger, "Starting..."; "main_port" => main_port, "admin_port" => admin_port);
    let logger = Arc::new(logger);

    let db: Arc<dyn Db + Send + Sync> = if get_flag("RECORDINGS_IN_MEMORY") {
        warn!(logger, "Using in-memory store; nothing will be persisted");
        Arc::new(MemoryDb::new())
    } else {
        info!(logger, "Creating database pool...");
        let connection_string = get_variable("RECORDINGS_DB_CONNECTION_STRING");
        let pool = PgPool::connect(&connection_string).await?;
        Arc::new(PgDb::new(pool))
    };

    let conference: Arc<dyn Conference + Send + Sync> = Arc::new(BigBlueButton::from_env()?);

    let urls = Arc::new(Urls::new(
        get_variable("RECORDINGS_BASE_URL"),
        get_variable("RECORDINGS_PATH"),
    ));

    let config = Config::new(
        get_optional_variable("RECORDINGS_SYNC_CONCURRENCY", sync::DEFAULT_CONCURRENCY),
        get_optional_variable("RECORDINGS_SYNC_QUEUE_SIZE", queue::DEFAULT_CAPACITY),
    );
    let (environment, worker) = Environment::new(logger.clone(), db, conference, urls, config);

    let (termination_sender, mut termination_receiver) = mpsc::channel::<()>(1);

    let terminate: routes::admin::TerminationFunctionWrapper<'static> = Arc::new(move || {
        let termination_sender = termination_sender.clone();

        async move {
            // only fails once shutdown is already under way
            termination_sender.send(()).await.ok();
        }
        .boxed()
    });

    let should_terminate = async move {
        termination_receiver.recv().await;
    }
    .shared();

    let ctrlc = {
        let should_terminate = should_terminate.clone();
        let terminate = terminate.clone();

        let signal = tokio::signal::ctrl_c();

        async move {
            tokio::select! {
                _ = should_terminate => {},
                _ = signal => {
                    terminate().await;
                }
            }
        }
    };

    let main_server = {
        let should_terminate = should_terminate.clone();

        let logger2 = logger.clone();

        let routes = routes::make_routes(environment.clone())
            .recover(move |r| routes::format_rejection(logger2.clone(), r));

        let (_, main_server) =
            warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], main_port), async {
                should_terminate.await;
            });

        main_server
    };

    let admin_server = {
        let should_terminate = should_terminate.clone();

        let routes = routes::admin::make_healthz_route(environment.clone()).or(
            routes::admin::make_termination_route(environment.clone(), terminate),
        );

        let (_, admin_server) =
            warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], admin_port), async {
                should_terminate.await;
            });

        admin_server
    };

    tokio::join!(ctrlc, main_server, admin_server);

    // dropping the last queue handle lets the worker finish its current job
    drop(environment);
    if let Err(e) = worker.await {
        warn!(logger, "Resync worker did not shut down cleanly"; "error" => %e);
    }

    info!(logger, "Exiting gracefully...");

    Ok(())
}
