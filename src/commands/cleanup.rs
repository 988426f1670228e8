use crate::commands::{RunFlags, confirm, open_log};
use crate::config::MigrationConfig;
use crate::error::Result;
use crate::migration::orchestrator::Orchestrator;
use crate::output::{self, Format};

pub fn run(config: &MigrationConfig, flags: RunFlags, format: Format) -> Result<()> {
    let log = open_log(config)?;
    confirm(
        flags,
        &log,
        &format!(
            "Delete the archives in {}? Rollback will no longer be possible.",
            config.backup_dir.display()
        ),
    )?;

    let report = Orchestrator::new(config, &log)
        .dry_run(flags.dry_run)
        .cleanup()?;
    output::print_cleanup(&report, format)
}
