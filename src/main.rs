use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tenantize::commands::{self, RunFlags};
use tenantize::config::MigrationConfig;
use tenantize::output::Format;

#[derive(Parser)]
#[command(
    name = "tenantize",
    version,
    about = "Tag every document in a single-tenant store with a default tenant, with backup and rollback"
)]
struct Cli {
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    format: Format,
    /// Shorthand for --format pretty
    #[arg(long, global = true, hide = true)]
    pretty: bool,
    /// Report what would happen without writing anything
    #[arg(long, global = true)]
    dry_run: bool,
    /// Skip the confirmation prompt
    #[arg(long, global = true)]
    force: bool,
    /// Records per tag batch (positive integer; anything else is ignored)
    #[arg(long, global = true, value_name = "N")]
    batch: Option<String>,
    /// Use this tenant UUID instead of generating one
    #[arg(long, global = true, value_name = "UUID")]
    tenant: Option<String>,
    /// YAML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up, tag and index every configured collection (default)
    Migrate,
    /// Restore every configured collection from its archive
    Rollback,
    /// Show per-collection migration progress
    Status,
    /// Delete archives and the run manifest
    Cleanup,
}

fn run(cli: Cli, format: Format) -> tenantize::error::Result<()> {
    let cwd = std::env::current_dir()?;
    let mut config = MigrationConfig::load(cli.config.as_deref(), &cwd)?;
    if let Some(warning) = config.apply_overrides(cli.batch.as_deref(), cli.tenant.as_deref())? {
        eprintln!("{} {warning}", "warning:".yellow());
    }
    config.validate()?;

    let flags = RunFlags {
        dry_run: cli.dry_run,
        force: cli.force,
    };

    match cli.command.unwrap_or(Commands::Migrate) {
        Commands::Migrate => commands::migrate::run(&config, flags, format),
        Commands::Rollback => commands::rollback::run(&config, flags, format),
        Commands::Status => commands::status::run(&config, format),
        Commands::Cleanup => commands::cleanup::run(&config, flags, format),
    }
}

fn main() {
    let cli = Cli::parse();
    let format = if cli.pretty {
        Format::Pretty
    } else {
        cli.format
    };
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            _ => eprintln!("error: {e}"),
        }
        std::process::exit(e.exit_code());
    }
}
