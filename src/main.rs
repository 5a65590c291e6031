//! truss - apply migrations and check schema snapshots against MySQL

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use truss::db::{self, read_migrations};
use truss::{Config, IsolationMode};

/// MySQL migration and schema snapshot tool
#[derive(Parser, Debug)]
#[command(name = "truss", version, about = "MySQL migration and schema snapshot tool")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migration files, in order, to an existing database
    Migrate {
        /// Connection URI (mysql://...)
        #[arg(short, long, env = "TRUSS_URI")]
        uri: String,

        /// Migration files; each file is one migration
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Check a schema snapshot file against migrations in a scratch database
    Schema {
        /// Schema snapshot file
        path: PathBuf,

        /// Overwrite the snapshot instead of verifying it
        #[arg(long)]
        update: bool,

        /// Migration files; each file is one migration
        files: Vec<PathBuf>,
    },

    /// Print the schema snapshot of an existing database
    Dump {
        /// Connection URI (mysql://...)
        #[arg(short, long, env = "TRUSS_URI")]
        uri: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "truss=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    match args.command {
        Command::Migrate { uri, files } => {
            let statements = read_migrations(&files)?;
            let pool = db::connect_with(&uri, IsolationMode::SingleSession).await?;
            db::migrate(&pool, &statements).await?;
            pool.close().await;
        }
        Command::Schema {
            path,
            update,
            files,
        } => {
            let config = Config::load()?;
            let statements = read_migrations(&files)?;
            truss::test_schema(&config, &path, update, &statements).await?;
        }
        Command::Dump { uri } => {
            let pool = db::connect_with(&uri, IsolationMode::SingleSession).await?;
            let schema = truss::create_schema(&pool).await?;
            pool.close().await;
            print!("{}", schema);
        }
    }

    Ok(())
}
