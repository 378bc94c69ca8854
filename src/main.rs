use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use repositories::store::{MemoryStore, PgStore, RemoteStore};
use settings::StoreBackend;
use utils::time::SystemTimeProvider;

mod errors;
mod models;
mod repositories;
pub mod services;
pub mod settings;
#[cfg(test)]
mod test_utils;
pub mod utils;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Overrides `http.listen` from the config file.
    #[arg(short, long)]
    listen: Option<String>,
    #[arg(long, default_value = "log4rs.yaml")]
    log4rs: String,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    init_logging(&args.log4rs)?;
    let mut settings = settings::Settings::load(&args.config).context("Could not load settings.")?;
    if let Some(listen) = args.listen {
        settings.http.listen = listen;
    }
    log::info!("Starting coinfarm.");

    let store = connect_store(&settings.store).await?;

    log::info!("Starting services.");
    services::start_services(store, Arc::new(SystemTimeProvider::new()), settings)
        .await
        .context("Could not start services.")
}

async fn connect_store(settings: &settings::Store) -> Result<Arc<dyn RemoteStore>, anyhow::Error> {
    match settings.backend {
        StoreBackend::Memory => {
            log::warn!("Using the in-memory store, nothing will be persisted.");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let url = settings
                .url
                .as_deref()
                .context("store.url is required for the postgres backend.")?;
            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .connect(url)
                .await
                .context("Could not connect to database.")?;

            let store = PgStore::new(pool).await?;
            if settings.listen_for_changes {
                store.start_listener().await?;
            }
            Ok(Arc::new(store))
        }
    }
}

fn init_logging(path: &str) -> Result<(), anyhow::Error> {
    if !Path::new("logs").exists() {
        fs::create_dir("logs")?;
    }

    match log4rs::init_file(path, Default::default()) {
        Ok(_) => {
            println!("[*] Logging initialized successfully.");
            Ok(())
        }
        Err(e) => {
            println!("[ERROR] Failed to initialize logging: {}", e);
            Err(anyhow::anyhow!("Could not initialize logging: {}", e))
        }
    }
}
