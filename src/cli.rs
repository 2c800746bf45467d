//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::StressResult;

#[derive(Debug, Parser)]
#[command(name = "dbstress")]
#[command(version)]
#[command(about = "Seed a records table, hammer it with concurrent readers, and watch the scheduler and driver timer queue", long_about = None)]
#[command(after_help = "EXAMPLES:
    DB_SERVER=mysql dbstress
    dbstress --pollers 500 --page-size 200
    dbstress --database-url memory:// --verbose")]
pub struct Cli {
    /// Database hostname
    #[arg(long, env = "DB_SERVER")]
    pub db_server: Option<String>,

    /// Full connection URL (overrides --db-server)
    #[arg(long, env = "DBSTRESS_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Config file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Number of concurrent polling workers
    #[arg(short, long)]
    pub pollers: Option<usize>,

    /// Records requested per list call
    #[arg(long)]
    pub page_size: Option<usize>,

    /// Number of records to seed
    #[arg(long)]
    pub records: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Resolve the effective configuration: flags over file over defaults.
    pub fn into_config(self) -> StressResult<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(server) = self.db_server {
            config.db_server = server;
        }
        if let Some(url) = self.database_url {
            config.database_url = Some(url);
        }
        if let Some(pollers) = self.pollers {
            config.pollers = pollers;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        if let Some(records) = self.records {
            config.record_count = records;
        }

        config.validate()?;
        Ok(config)
    }
}
