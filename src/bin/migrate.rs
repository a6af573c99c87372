use anyhow::Result;
use tokens_bought_poller::config::StoragePaths;
use tokens_bought_poller::repository::Database;

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let paths = StoragePaths::from_env();

    println!("Running migrations on database: {}", paths.database_url);

    let _db = Database::new(&paths.database_url)?;

    println!("Migrations completed successfully!");

    Ok(())
}
