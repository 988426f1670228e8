use crate::config::MigrationConfig;
use crate::error::Result;
use crate::migration::orchestrator::Orchestrator;
use crate::output::{self, Format};
use crate::progress::ProgressLog;

/// Read-only; nothing is appended to the progress log.
pub fn run(config: &MigrationConfig, format: Format) -> Result<()> {
    let log = ProgressLog::in_memory();
    let report = Orchestrator::new(config, &log).status()?;
    output::print_status(&report, format)
}
