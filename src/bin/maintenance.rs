use std::env;
use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use docshelf::{config::AppConfig, db, storage::LocalFileStorage, DocumentStore};

const USAGE: &str = "Usage: maintenance <migrate | prune-uploads [--dry-run]>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let mut args = env::args().skip(1);
    match args.next().as_deref() {
        Some("migrate") => migrate().await?,
        Some("prune-uploads") => {
            let dry_run = args.any(|arg| arg == "--dry-run");
            prune_uploads(dry_run).await?
        }
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            std::process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> Result<db::PgPool> {
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        upload_dir = %config.upload_dir.display(),
        "loaded backend configuration"
    );
    db::connect_with_retry(&config.database_url, 1, config.database_retry).await
}

async fn migrate() -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = connect(&config).await?;

    let applied = db::run_migrations(&pool)?;
    if applied.is_empty() {
        println!("Schema is up to date.");
    } else {
        for version in &applied {
            println!("Applied migration {version}");
        }
    }
    Ok(())
}

/// Removes files under the upload directory that no document row references.
/// Run it while no uploads are in flight: a file written moments before its
/// row is inserted looks orphaned too.
async fn prune_uploads(dry_run: bool) -> Result<()> {
    let config = AppConfig::from_env()?;
    let pool = connect(&config).await?;
    let store = DocumentStore::new(pool, Arc::new(LocalFileStorage::new(config.upload_dir)));

    let orphans = store.orphaned_files().await?;
    if orphans.is_empty() {
        println!("No orphaned uploads found.");
        return Ok(());
    }

    if dry_run {
        println!("{} orphaned uploads:", orphans.len());
        for path in &orphans {
            println!("  {path}");
        }
        return Ok(());
    }

    println!("Deleting {} orphaned uploads…", orphans.len());
    let mut failed = 0usize;
    for path in &orphans {
        if let Err(err) = store.remove_file(path).await {
            eprintln!("Failed to delete {path}: {err}");
            failed += 1;
        }
    }

    println!("Removed {} uploads.", orphans.len() - failed);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
