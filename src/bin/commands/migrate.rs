use anyhow::Result;
use clap::Args;
use quarry::database::{MigrationState, MigrationStatus};
use quarry::{
    LocalFilesystem, MigrationGenerator, MigrationKind, MigrationRegistry, Migrator, QuarryConfig,
};
use tabled::settings::Style;
use tabled::{Table, Tabled};

use super::connect;

/// Arguments for the migrate:status command
#[derive(Args)]
pub struct StatusArgs {
    /// Output as JSON
    #[clap(long)]
    pub json: bool,
}

/// Arguments for the make:migration command
#[derive(Args)]
pub struct MakeMigrationArgs {
    /// Name of the migration, e.g. create_users_table
    pub name: String,

    /// Stub to start from: default, create, update or delete
    #[clap(short = 't', long = "type", default_value = "default")]
    pub kind: String,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Migration")]
    migration: String,
    #[tabled(rename = "Batch")]
    batch: String,
    #[tabled(rename = "Status")]
    status: &'static str,
}

impl From<&MigrationStatus> for StatusRow {
    fn from(s: &MigrationStatus) -> Self {
        let (batch, status) = match s.state {
            MigrationState::Ran { batch } => (batch.to_string(), "Ran"),
            MigrationState::Pending => ("-".to_string(), "Pending"),
        };
        StatusRow {
            migration: s.migration.clone(),
            batch,
            status,
        }
    }
}

fn registry(config: &QuarryConfig) -> Result<MigrationRegistry> {
    let mut registry = MigrationRegistry::new();
    registry.discover(&LocalFilesystem, &config.migrations_path())?;
    Ok(registry)
}

fn with_migrator<T>(config: &QuarryConfig, f: impl FnOnce(&Migrator) -> Result<T>) -> Result<T> {
    let conn = connect(config)?;
    let migrator = Migrator::new(&conn, registry(config)?).with_table(&config.migrations_table());
    f(&migrator)
}

fn print_names(verb: &str, names: &[String]) {
    for name in names {
        println!("{}: {}", verb, name);
    }
}

pub fn run(config: &QuarryConfig) -> Result<()> {
    with_migrator(config, |migrator| {
        let applied = migrator.run_pending()?;
        if applied.is_empty() {
            println!("Nothing to migrate.");
        }
        print_names("Migrated", &applied);
        Ok(())
    })
}

pub fn rollback(config: &QuarryConfig) -> Result<()> {
    with_migrator(config, |migrator| {
        let reverted = migrator.rollback()?;
        if reverted.is_empty() {
            println!("Nothing to rollback.");
        }
        print_names("Rolled back", &reverted);
        Ok(())
    })
}

pub fn reset(config: &QuarryConfig) -> Result<()> {
    with_migrator(config, |migrator| {
        let reverted = migrator.reset()?;
        if reverted.is_empty() {
            println!("Nothing to reset.");
        }
        print_names("Rolled back", &reverted);
        Ok(())
    })
}

pub fn refresh(config: &QuarryConfig) -> Result<()> {
    with_migrator(config, |migrator| {
        let outcome = migrator.refresh()?;
        print_names("Rolled back", &outcome.rolled_back);
        print_names("Migrated", &outcome.migrated);
        Ok(())
    })
}

pub fn status(config: &QuarryConfig, args: StatusArgs) -> Result<()> {
    with_migrator(config, |migrator| {
        let statuses = migrator.status()?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&statuses)?);
        } else if statuses.is_empty() {
            println!("No migrations found.");
        } else {
            let rows: Vec<StatusRow> = statuses.iter().map(StatusRow::from).collect();
            println!("{}", Table::new(rows).with(Style::rounded()));
        }
        Ok(())
    })
}

pub fn make(config: &QuarryConfig, args: MakeMigrationArgs) -> Result<()> {
    let MakeMigrationArgs { name, kind } = args;
    let kind: MigrationKind = kind.parse()?;

    let generator = MigrationGenerator::new(LocalFilesystem, config.migrations_path());
    let generated = generator.generate(&name, kind)?;
    println!("Created migration: {}", generated.name);
    println!("  {}", generated.up.display());
    println!("  {}", generated.down.display());
    Ok(())
}
