//! Host Updater CLI
//!
//! Runs checksum-gated update modules and manages their backups, hotfixes,
//! migrations and rollbacks.

use clap::Parser;
use host_updater::cli::{
    args::{BackupsAction, ChecksumAction, Cli, Commands, SnapshotsAction},
    commands::{backup, checksum, hotfix, migrate, rollback, run, snapshots},
};
use host_updater::models::config::{load_config, load_config_from, Config};
use host_updater::preflight;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config_from(path),
        None => load_config(),
    };

    // Commands that mutate the host go through preflight
    let mutating = matches!(
        cli.command,
        Commands::Run { .. }
            | Commands::Backup { .. }
            | Commands::Restore { .. }
            | Commands::Migrate { .. }
            | Commands::Hotfix { .. }
            | Commands::Rollback { dry_run: false, .. }
    );
    if mutating && !cli.skip_preflight {
        run_preflight_checks(&config)?;
    }

    match cli.command {
        Commands::Run { manifest } => {
            run::run(&manifest, &config).await?;
        }

        Commands::Checksum { action } => match action {
            ChecksumAction::Compute { dir, write } => checksum::compute(&dir, write)?,
            ChecksumAction::Verify { dir } => checksum::verify(&dir)?,
        },

        Commands::Backup {
            module,
            files,
            services,
            sqlite,
            postgres,
            description,
        } => {
            let args = backup::BackupArgs {
                files,
                services,
                sqlite,
                postgres,
                description,
            };
            backup::backup(&module, args, &config).await?;
        }

        Commands::Restore { module } => {
            backup::restore(&module, &config).await?;
        }

        Commands::Backups { action } => match action {
            BackupsAction::List => backup::list(&config)?,
            BackupsAction::Show { module } => backup::show(&module, &config)?,
            BackupsAction::Remove { module } => backup::remove(&module, &config)?,
            BackupsAction::Cleanup => backup::cleanup(&config)?,
        },

        Commands::Migrate {
            manifest,
            scripts_dir,
        } => {
            migrate::migrate(&manifest, &scripts_dir, &config).await?;
        }

        Commands::Hotfix { plan_file, output } => {
            hotfix::hotfix(&plan_file, output.as_deref(), &config).await?;
        }

        Commands::Rollback {
            log_file,
            emergency,
            dry_run,
        } => {
            rollback::rollback(&log_file, emergency, dry_run, &config).await?;
        }

        Commands::Snapshots { action } => match action {
            SnapshotsAction::List => snapshots::list(&config)?,
            SnapshotsAction::Cleanup { max_age_days, keep } => {
                snapshots::cleanup(max_age_days, keep, &config)?
            }
        },
    }

    Ok(())
}

/// Initialize the logging system.
fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("host_updater=debug")
    } else {
        EnvFilter::new("host_updater=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

/// Run preflight checks and exit if any required check fails.
fn run_preflight_checks(config: &Config) -> anyhow::Result<()> {
    use colored::Colorize;

    println!("{}", "Running preflight checks...".bold());
    println!();

    let results = preflight::run_preflight_checks(config);
    preflight::print_results(&results);

    println!();

    if !preflight::all_passed(&results) {
        anyhow::bail!("Preflight checks failed. Fix the issues above and try again.");
    }

    Ok(())
}
