use clap::{Parser, Subcommand};
use quarry::*;
use tracing::Level;

mod commands;

use commands::db::{DumpArgs, RestoreArgs};
use commands::migrate::{MakeMigrationArgs, StatusArgs};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default ./quarry.toml then $HOME/.quarry/quarry.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all pending migrations as a new batch
    Migrate,

    /// Roll back the most recent batch of migrations
    #[clap(name = "migrate:rollback")]
    MigrateRollback,

    /// Roll back every applied migration
    #[clap(name = "migrate:reset")]
    MigrateReset,

    /// Roll back every migration, then run them all again
    #[clap(name = "migrate:refresh")]
    MigrateRefresh,

    /// Show which migrations have been run
    #[clap(name = "migrate:status")]
    MigrateStatus(StatusArgs),

    /// Create a new pair of migration files
    #[clap(name = "make:migration")]
    MakeMigration(MakeMigrationArgs),

    /// Dump the database to a SQL file
    #[clap(name = "db:dump")]
    DbDump(DumpArgs),

    /// Restore the database from a SQL dump
    #[clap(name = "db:restore")]
    DbRestore(RestoreArgs),

    /// Print the resolved configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level INFO or higher.
            .with_max_level(Level::INFO)
            .init();
    }

    let config = match QuarryConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Migrate => commands::migrate::run(&config),
        Commands::MigrateRollback => commands::migrate::rollback(&config),
        Commands::MigrateReset => commands::migrate::reset(&config),
        Commands::MigrateRefresh => commands::migrate::refresh(&config),
        Commands::MigrateStatus(args) => commands::migrate::status(&config, args),
        Commands::MakeMigration(args) => commands::migrate::make(&config, args),
        Commands::DbDump(args) => commands::db::dump(&config, args),
        Commands::DbRestore(args) => commands::db::restore(&config, args),
        Commands::Config => {
            println!("{}", config.summary());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
