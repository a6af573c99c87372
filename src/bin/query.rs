use anyhow::Result;
use clap::{Parser, Subcommand};
use tokens_bought_poller::checkpoint::FileCheckpointStore;
use tokens_bought_poller::config::{PollSettings, StoragePaths};
use tokens_bought_poller::error_sink::JsonFileErrorSink;
use tokens_bought_poller::query::commands::{
    TransactionQuery, cmd_checkpoint, cmd_reconcile, cmd_stats, cmd_transactions,
    cmd_unregistered,
};
use tokens_bought_poller::query::formatters::OutputFormat;
use tokens_bought_poller::registry::SqliteRegistry;
use tokens_bought_poller::repository::{Database, TransactionRepository};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Inspect registered TokensBought purchases", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered purchases, newest block first
    Transactions {
        #[arg(long)]
        buyer: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        from_block: Option<u64>,

        #[arg(long)]
        to_block: Option<u64>,

        #[arg(long, default_value = "100")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Totals across all registered purchases
    Stats,
    /// Show the last polled block
    Checkpoint,
    /// List events waiting in the error file
    Unregistered,
    /// Retry registering the events in the error file
    Reconcile,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let paths = StoragePaths::from_env();

    match cli.command {
        Commands::Transactions {
            buyer,
            project,
            from_block,
            to_block,
            limit,
            offset,
        } => {
            let db = Database::new(&paths.database_url)?;
            let query = TransactionQuery {
                buyer,
                project,
                from_block,
                to_block,
                limit,
                offset,
            };
            cmd_transactions(&TransactionRepository::new(&db.conn), query, &format)?;
        }
        Commands::Stats => {
            let db = Database::new(&paths.database_url)?;
            cmd_stats(&TransactionRepository::new(&db.conn), &format)?;
        }
        Commands::Checkpoint => {
            cmd_checkpoint(&FileCheckpointStore::new(&paths.checkpoint_path), &format)?;
        }
        Commands::Unregistered => {
            cmd_unregistered(&JsonFileErrorSink::new(&paths.errors_path), &format)?;
        }
        Commands::Reconcile => {
            let settings = PollSettings::from_env()?;
            let registry = SqliteRegistry::new(Database::new(&paths.database_url)?);
            let sink = JsonFileErrorSink::new(&paths.errors_path);
            cmd_reconcile(&registry, &sink, &settings, &format)?;
        }
    }

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn every_subcommand_has_help_text() {
        let cli = Cli::command();
        cli.clone().debug_assert();
        for subcommand in cli.get_subcommands() {
            assert!(
                subcommand.get_about().is_some(),
                "`{}` has no about text",
                subcommand.get_name()
            );
        }
    }
}
