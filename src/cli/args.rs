//! Command line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Host Updater - checksum-gated updates with backup and rollback
#[derive(Parser, Debug)]
#[command(name = "host-updater")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip preflight checks
    #[arg(long, global = true)]
    pub skip_preflight: bool,

    /// Config file (default: ~/.config/host_updater/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the modules listed in a manifest
    Run {
        /// Path to the manifest.json file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },

    /// Compute or verify module checksums
    Checksum {
        #[command(subcommand)]
        action: ChecksumAction,
    },

    /// Back up a module's files, services and databases
    Backup {
        /// Module name
        #[arg(value_name = "MODULE")]
        module: String,

        /// File or directory to back up
        #[arg(short, long = "file", value_name = "PATH")]
        files: Vec<PathBuf>,

        /// systemd unit whose state to record
        #[arg(short, long = "service", value_name = "UNIT")]
        services: Vec<String>,

        /// SQLite database file
        #[arg(long = "sqlite", value_name = "PATH")]
        sqlite: Vec<PathBuf>,

        /// Postgres database name
        #[arg(long = "postgres", value_name = "DB")]
        postgres: Vec<String>,

        /// Description for the backup
        #[arg(short, long, default_value = "manual backup")]
        description: String,
    },

    /// Restore a module from its backup
    Restore {
        /// Module name
        #[arg(value_name = "MODULE")]
        module: String,
    },

    /// Manage module backups
    Backups {
        #[command(subcommand)]
        action: BackupsAction,
    },

    /// Run pending migrations
    Migrate {
        /// Path to the migrations manifest
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Directory holding the migration scripts
        #[arg(value_name = "SCRIPTS_DIR")]
        scripts_dir: PathBuf,
    },

    /// Apply a hotfix plan
    Hotfix {
        /// Path to the hotfix plan
        #[arg(value_name = "PLAN_FILE")]
        plan_file: PathBuf,

        /// Output path for the operation log
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Roll back a hotfix from its operation log
    Rollback {
        /// Path to the operation log
        #[arg(value_name = "LOG_FILE")]
        log_file: PathBuf,

        /// Best-effort reverse walk without phase or critical handling
        #[arg(long)]
        emergency: bool,

        /// Dry run - show what would be done
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage typed backups and snapshots
    Snapshots {
        #[command(subcommand)]
        action: SnapshotsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ChecksumAction {
    /// Compute a module directory's checksum
    Compute {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Publish it to the module's checksum file
        #[arg(long)]
        write: bool,
    },

    /// Compare a module's content with its published checksum
    Verify {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupsAction {
    /// List all module backups
    List,

    /// Show details of a module backup
    Show {
        #[arg(value_name = "MODULE")]
        module: String,
    },

    /// Remove a module backup
    Remove {
        #[arg(value_name = "MODULE")]
        module: String,
    },

    /// Remove backup directories that are not in the index
    Cleanup,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotsAction {
    /// List typed backups and snapshots
    List,

    /// Remove expired typed backups
    Cleanup {
        /// Maximum age in days (default from config)
        #[arg(long)]
        max_age_days: Option<u64>,

        /// Number of newest backups always kept (default from config)
        #[arg(long)]
        keep: Option<usize>,
    },
}
