use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;

use dotenv::dotenv;
use log::{info, initialize_logger, o, warn};
use sqlx::postgres::PgPool;
use structopt::StructOpt;
use uuid::Uuid;

use recordings::conference::BigBlueButton;
use recordings::config::{get_optional_variable, get_variable};
use recordings::db::PgDb;
use recordings::locks::Locks;
use recordings::service::sync::{self, RecordingsSync};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "sync-user",
    about = "Synchronize the recordings of the given users and print the results"
)]
struct Opt {
    /// The user IDs to synchronize
    #[structopt(parse(try_from_str = Uuid::parse_str))]
    ids: Vec<Uuid>,

    /// How many rooms to synchronize at once
    #[structopt(long)]
    concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();

    let opt = Opt::from_args();

    let logger = Arc::new(initialize_logger());

    let connection_string = get_variable("RECORDINGS_DB_CONNECTION_STRING");
    let pool = PgPool::connect(&connection_string).await?;

    let concurrency = opt.concurrency.unwrap_or_else(|| {
        get_optional_variable("RECORDINGS_SYNC_CONCURRENCY", sync::DEFAULT_CONCURRENCY)
    });

    let engine = RecordingsSync::new(
        logger.clone(),
        Arc::new(PgDb::new(pool)),
        Arc::new(BigBlueButton::from_env()?),
        Arc::new(Locks::new()),
        concurrency,
    );

    info!(logger, "Synchronizing {} user(s)...", opt.ids.len());

    let mut results = BTreeMap::new();

    for id in &opt.ids {
        let logger = logger.new(o!("user" => id.to_string()));

        match engine.sync(id).await {
            Ok(result) => {
                if result.is_partial() {
                    warn!(logger, "Some rooms failed"; "failed_rooms" => result.failures.len());
                }

                results.insert(id.to_string(), serde_json::to_value(&result)?);
            }
            Err(e) => {
                warn!(logger, "Synchronization failed"; "error" => %e);
                results.insert(id.to_string(), serde_json::json!({ "error": e.to_string() }));
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&results)?);

    Ok(())
}
