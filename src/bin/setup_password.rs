//! CLI tool to create a user or reset its password
//!
//! Usage: cargo run --bin setup-password -- <user> <password>

use alarmdecoder_webapp::{
    config::AppConfig, datastore::Datastore, services::auth::PasswordService,
};
use std::env;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 3 {
        eprintln!("Usage: {} <user> <password>", args[0]);
        std::process::exit(1);
    }

    let (user, password) = (&args[1], &args[2]);

    let result = Datastore::open(&AppConfig::get().paths.database_file)
        .and_then(|datastore| PasswordService::store_or_update_password(&datastore, user, password));

    match result {
        Ok(()) => {
            println!("Password of {user} stored successfully");
        }
        Err(e) => {
            eprintln!("Failed to store password: {e:#}");
            std::process::exit(1);
        }
    }
}
