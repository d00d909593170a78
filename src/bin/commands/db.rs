use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use quarry::{DatabaseManager, LocalFilesystem, QuarryConfig};

use super::connect;

/// Arguments for the db:dump command
#[derive(Args)]
pub struct DumpArgs {
    /// Write to this file instead of a timestamped file in the dump directory
    #[clap(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the db:restore command
#[derive(Args)]
pub struct RestoreArgs {
    /// Dump file, absolute or relative to the dump directory
    pub file: PathBuf,
}

pub fn dump(config: &QuarryConfig, args: DumpArgs) -> Result<()> {
    let conn = connect(config)?;
    let manager = DatabaseManager::new(&conn, LocalFilesystem, config.dump_path());
    let path = match args.output {
        Some(path) => manager.dump_to(&path)?,
        None => manager.dump()?,
    };
    println!("Database dumped to {}", path.display());
    Ok(())
}

pub fn restore(config: &QuarryConfig, args: RestoreArgs) -> Result<()> {
    let conn = connect(config)?;
    let manager = DatabaseManager::new(&conn, LocalFilesystem, config.dump_path());
    manager.restore(&args.file)?;
    println!("Database restored from {}", args.file.display());
    Ok(())
}
