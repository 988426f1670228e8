use clap::ValueEnum;
use colored::Colorize;

use crate::build_info;
use crate::error::Result;
use crate::migration::orchestrator::{
    CleanupReport, RestoreOutcome, RollbackReport, RunReport, StatusReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

fn header(title: &str, dry_run: bool) {
    let build = build_info::short_sha()
        .map(|sha| format!(" (build {sha})"))
        .unwrap_or_default();
    let mode = if dry_run { " [dry run]" } else { "" };
    println!(
        "{}{}{}",
        format!("tenantize {title}").bold(),
        build.dimmed(),
        mode.yellow()
    );
}

fn count(value: Option<u64>) -> String {
    value.map_or_else(|| "-".to_string(), |n| n.to_string())
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub fn print_run(report: &RunReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            header("migrate", report.dry_run);
            println!("  database: {}", report.database);
            println!("  tenant:   {}", report.tenant_id.to_string().cyan());
            println!("  archives: {}", report.backup_dir);
            if report.resumed {
                println!("  {}", "resumed an unfinished run".yellow());
            }
            println!();
            for row in &report.collections {
                let index = match row.index_built {
                    Some(true) => "indexed".green().to_string(),
                    Some(false) => "index failed".red().to_string(),
                    None => "-".dimmed().to_string(),
                };
                println!(
                    "  {:14} {:11} archived {:>8}  tagged {:>8}  {}",
                    row.collection.bold(),
                    row.phase.to_string(),
                    count(row.archived),
                    count(row.tagged),
                    index
                );
            }
            if !report.index_failures.is_empty() {
                println!();
                println!(
                    "  {} {}",
                    "warn".yellow(),
                    format!("index missing on: {}", report.index_failures.join(", "))
                );
            }
        }
        Format::Minimal => {
            println!("tenant={}", report.tenant_id);
            for row in &report.collections {
                println!(
                    "{} phase={} archived={} tagged={}",
                    row.collection,
                    row.phase,
                    count(row.archived),
                    count(row.tagged)
                );
            }
        }
    }
    Ok(())
}

pub fn print_rollback(report: &RollbackReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            header("rollback", report.dry_run);
            println!("  database: {}", report.database);
            println!();
            for row in &report.collections {
                let outcome = match &row.outcome {
                    RestoreOutcome::Restored { entries } => {
                        format!("{} {entries} records", "restored".green())
                    }
                    RestoreOutcome::Ready { entries } => {
                        format!("{} {entries} records", "ready".cyan())
                    }
                    RestoreOutcome::Absent => "absent, nothing to restore".dimmed().to_string(),
                    RestoreOutcome::ArchiveNotFound => "no archive".red().bold().to_string(),
                    RestoreOutcome::Failed { detail } => {
                        format!("{} {}", "failed".red().bold(), detail.dimmed())
                    }
                };
                println!("  {:14} {}", row.collection.bold(), outcome);
            }
            println!();
            let summary = format!(
                "{} of {} collections restored",
                report.restored(),
                report.collections.len()
            );
            if report.success() {
                println!("  {}", summary.green());
            } else {
                println!("  {}", summary.red().bold());
            }
        }
        Format::Minimal => {
            for row in &report.collections {
                let outcome = match &row.outcome {
                    RestoreOutcome::Restored { entries } => format!("restored={entries}"),
                    RestoreOutcome::Ready { entries } => format!("ready={entries}"),
                    RestoreOutcome::Absent => "absent".to_string(),
                    RestoreOutcome::ArchiveNotFound => "archive_not_found".to_string(),
                    RestoreOutcome::Failed { .. } => "failed".to_string(),
                };
                println!("{} {}", row.collection, outcome);
            }
        }
    }
    Ok(())
}

pub fn print_status(report: &StatusReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            header("status", false);
            println!("  database: {}", report.database);
            println!("  field:    {}", report.tenant_field);
            match &report.manifest {
                Some(manifest) => {
                    let state = match manifest.completed_at {
                        Some(done) => format!("completed {}", done.to_rfc3339()).green(),
                        None => "unfinished".yellow(),
                    };
                    println!(
                        "  run:      tenant {} started {} ({})",
                        manifest.tenant_id.to_string().cyan(),
                        manifest.started_at.to_rfc3339(),
                        state
                    );
                }
                None => println!("  run:      {}", "none".dimmed()),
            }
            println!();
            println!(
                "  {:14} {:>8} {:>8} {:>8} {:>8} {:6} PHASE",
                "COLLECTION", "TOTAL", "TAGGED", "UNTAGGED", "ARCHIVE", "INDEX"
            );
            for row in &report.collections {
                if !row.exists {
                    println!("  {:14} {}", row.collection, "missing".dimmed());
                    continue;
                }
                let untagged = if row.untagged == 0 {
                    row.untagged.to_string().green()
                } else {
                    row.untagged.to_string().yellow()
                };
                println!(
                    "  {:14} {:>8} {:>8} {:>8} {:>8} {:6} {}",
                    row.collection,
                    row.total,
                    row.tagged,
                    untagged,
                    count(row.archive_entries),
                    yes_no(row.index_built),
                    row.phase.map_or_else(|| "-".to_string(), |p| p.to_string())
                );
            }
        }
        Format::Minimal => {
            for row in &report.collections {
                println!(
                    "{} total={} tagged={} untagged={} archive={} index={}",
                    row.collection,
                    row.total,
                    row.tagged,
                    row.untagged,
                    count(row.archive_entries),
                    yes_no(row.index_built)
                );
            }
        }
    }
    Ok(())
}

pub fn print_cleanup(report: &CleanupReport, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(report)?),
        Format::Pretty => {
            header("cleanup", report.dry_run);
            let verb = if report.dry_run { "would purge" } else { "purged" };
            for name in &report.purged {
                println!("  {:14} {}", name.bold(), verb.green());
            }
            for name in &report.missing {
                println!("  {:14} {}", name.bold(), "no archive".dimmed());
            }
            if report.manifest_cleared {
                let verb = if report.dry_run { "would be cleared" } else { "cleared" };
                println!("  run manifest {verb}");
            }
        }
        Format::Minimal => {
            println!("purged={}", report.purged.join(","));
            println!("missing={}", report.missing.join(","));
        }
    }
    Ok(())
}
