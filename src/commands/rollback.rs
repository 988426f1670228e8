use crate::commands::{RunFlags, confirm, open_log};
use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::migration::orchestrator::Orchestrator;
use crate::output::{self, Format};

/// Restore every configured collection from its archive. The report is
/// printed even when some collections could not be restored; the command
/// then fails with `RollbackIncomplete`.
pub fn run(config: &MigrationConfig, flags: RunFlags, format: Format) -> Result<()> {
    let log = open_log(config)?;
    confirm(
        flags,
        &log,
        &format!(
            "Replace all live records in {} collections with their archives?",
            config.collections.len()
        ),
    )?;

    let report = Orchestrator::new(config, &log)
        .dry_run(flags.dry_run)
        .rollback()?;
    output::print_rollback(&report, format)?;

    if report.success() {
        Ok(())
    } else {
        Err(MigrationError::RollbackIncomplete {
            restored: report.restored(),
            total: report.collections.len(),
        })
    }
}
