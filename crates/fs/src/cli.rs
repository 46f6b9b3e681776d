use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::MountConfig;

/// Mount the tables of a database as plain-text files
#[derive(Parser, Debug, Clone)]
#[command(name = "sql2textmount", version, about)]
pub struct Cli {
    /// Allow running as root
    #[arg(long = "root")]
    pub allow_root: bool,

    /// Write logs to FILE instead of stderr
    #[arg(long = "log", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long)]
    pub verbose: bool,

    /// Never refresh closed tables from the database
    #[arg(long)]
    pub disable_reload: bool,

    /// Mount options, comma separated (repeatable)
    #[arg(short = 'o', value_name = "OPTS", action = ArgAction::Append)]
    pub options: Vec<String>,

    /// TOML config file
    #[arg(long, value_name = "FILE", env = "SQL2TEXTFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database connection string (`sqlite://<dir>` or `memory:`)
    pub conn_string: String,

    /// Where to mount
    pub mountpoint: PathBuf,
}

impl Cli {
    /// Layer command line flags over a loaded config
    pub fn apply(&self, mut config: MountConfig) -> MountConfig {
        if self.allow_root {
            config.allow_root = true;
        }
        if let Some(log_file) = &self.log_file {
            config.log_file = Some(log_file.clone());
        }
        if self.verbose {
            config.verbose = true;
        }
        if self.disable_reload {
            config.reload = false;
        }
        config.mount_options.extend(
            self.options
                .iter()
                .flat_map(|o| o.split(','))
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string),
        );
        config
    }
}
