use anyhow::Result;
use clap::{Parser, Subcommand};
use olympic::analytics::AnalyticsLogger;
use olympic::auth::AccountManager;
use olympic::config::{Config, DatabaseBackend};
use olympic::links::LinkRegistry;
use olympic::storage::{PostgresStorage, SqliteStorage, Storage};
use std::sync::Arc;

const ENVIRONMENT_HELP: &str = "\
Reads the same environment as the server (.env, DATABASE_BACKEND, DATABASE_URL, \
ANALYTICS_*). JWT_SECRET is not needed: no command here issues or checks tokens.";

#[derive(Parser)]
#[command(name = "olympic-admin")]
#[command(about = "Olympic admin management CLI", long_about = None)]
#[command(after_help = ENVIRONMENT_HELP)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Revoke every refresh token of an account
    RevokeSessions {
        /// Account email
        email: String,
    },
    /// Delete revoked and expired sessions
    PurgeSessions,
    /// Show a link with its hit count and query log size
    Link {
        /// Short code
        code: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env_for_admin()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    let accounts = AccountManager::new(Arc::clone(&storage), &config.auth);
    let analytics = Arc::new(AnalyticsLogger::new(
        Arc::clone(&storage),
        &config.analytics,
    ));
    let links = LinkRegistry::new(Arc::clone(&storage), Arc::clone(&analytics), &config.links);

    match cli.command {
        Commands::RevokeSessions { email } => {
            let account = accounts.account_by_email(&email).await?;
            let revoked = accounts.revoke_all_sessions(account.id).await?;
            println!(
                "✓ Revoked {} session(s) for '{}' (account {})",
                revoked, account.email, account.id
            );
        }
        Commands::PurgeSessions => {
            let purged = accounts.purge_sessions().await?;
            println!("✓ Purged {} revoked or expired session(s)", purged);
        }
        Commands::Link { code } => {
            let link = links.describe_link(&code).await?;
            let log_entries = storage.list_query_log(link.id).await?.len();

            println!("{:<12} {}", "Short code", link.short_code);
            println!("{:<12} {}", "Target", link.target_url);
            println!("{:<12} {}", "Owner", link.owner_account_id);
            println!("{:<12} {}", "Hits", link.hit_count);
            println!("{:<12} {}", "Query log", log_entries);
        }
    }

    analytics.shutdown().await;
    Ok(())
}
