//! A helper program to create or upgrade the recordings schema.

use std::env;

use movine::Movine;
use postgres::{Client, NoTls};

use log::{debug, info, initialize_logger};

const DEFAULT_MIGRATION_DIR: &str = "./migrations";

fn main() {
    dotenv::dotenv().ok();

    let logger = initialize_logger();
    let connection_string = env::var("RECORDINGS_DB_CONNECTION_STRING")
        .expect("could not read RECORDINGS_DB_CONNECTION_STRING");
    let migration_dir = env::var("RECORDINGS_MIGRATION_DIR")
        .unwrap_or_else(|_| DEFAULT_MIGRATION_DIR.to_owned());

    debug!(logger, "Connecting to database...");

    let mut client =
        Client::connect(&connection_string, NoTls).expect("could not connect to database");

    let mut movine = Movine::new(&mut client);
    movine.set_migration_dir(&migration_dir);

    if movine.status().is_err() {
        debug!(logger, "Initializing movine...");
        movine.initialize().expect("failed to initialize movine")
    }

    debug!(logger, "Running migrations..."; "directory" => &migration_dir);
    movine.up().expect("failed to run migrations");

    info!(logger, "Completed initialization."; "version" => info::VERSION);
}
