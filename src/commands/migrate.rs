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
            "Back up and tag {} collections in {}?",
            config.collections.len(),
            config.database_uri()
        ),
    )?;

    let report = Orchestrator::new(config, &log)
        .dry_run(flags.dry_run)
        .run()?;
    output::print_run(&report, format)
}
