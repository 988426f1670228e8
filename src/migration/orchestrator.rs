use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MigrationConfig;
use crate::error::{MigrationError, Result};
use crate::migration::index::IndexBuilder;
use crate::migration::tagger::{TagSettings, TenantTagger};
use crate::model::{MigrationState, Phase, Step, TenantId};
use crate::progress::ProgressLog;
use crate::store::archive::BackupStore;
use crate::store::checkpoint::{CheckpointStore, RunManifest};
use crate::store::database::{Collection, Database};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct CollectionRun {
    pub collection: String,
    pub phase: Phase,
    /// Entries archived by this run (or that would be, in a dry run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<u64>,
    /// Records tagged by this run (or that would be, in a dry run).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tagged: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_built: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub resumed: bool,
    pub tenant_id: TenantId,
    pub database: String,
    pub backup_dir: String,
    pub collections: Vec<CollectionRun>,
    pub index_failures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestoreOutcome {
    Restored { entries: u64 },
    /// Dry run: the archive exists and holds this many entries.
    Ready { entries: u64 },
    /// Neither the collection nor an archive of it exists.
    Absent,
    ArchiveNotFound,
    Failed { detail: String },
}

impl RestoreOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Restored { .. } | Self::Ready { .. } | Self::Absent
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionRestore {
    pub collection: String,
    #[serde(flatten)]
    pub outcome: RestoreOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub dry_run: bool,
    pub database: String,
    pub collections: Vec<CollectionRestore>,
    pub manifest_cleared: bool,
}

impl RollbackReport {
    pub fn success(&self) -> bool {
        self.collections.iter().all(|c| c.outcome.is_success())
    }

    pub fn restored(&self) -> usize {
        self.collections
            .iter()
            .filter(|c| c.outcome.is_success())
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestSummary {
    pub tenant_id: TenantId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    pub collection: String,
    pub exists: bool,
    pub total: u64,
    pub tagged: u64,
    pub untagged: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_entries: Option<u64>,
    pub index_built: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub tenant_field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<ManifestSummary>,
    pub collections: Vec<CollectionStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub dry_run: bool,
    pub purged: Vec<String>,
    pub missing: Vec<String>,
    pub manifest_cleared: bool,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives a migration across every configured collection: backup all, then
/// tag all, then index all. Rollback restores every collection from its
/// archive and only runs when asked for.
pub struct Orchestrator<'a> {
    config: &'a MigrationConfig,
    log: &'a ProgressLog,
    dry_run: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a MigrationConfig, log: &'a ProgressLog) -> Self {
        Self {
            config,
            log,
            dry_run: false,
        }
    }

    /// Read and report only; never write to the database or the backup directory.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn archives(&self) -> BackupStore<'a> {
        BackupStore::new(&self.config.backup_dir, self.log)
            .with_progress_every(self.config.archive_progress_every)
    }

    fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::open(&self.config.backup_dir)
    }

    fn connect(&self) -> Result<Database> {
        let uri = self.config.database_uri();
        self.log
            .info(None, Some(Step::Connect), format!("database: {uri}"));
        match Database::connect(uri) {
            Ok(db) => {
                self.log
                    .info(None, Some(Step::Connect), "connection established");
                Ok(db)
            }
            Err(err) => {
                self.log.error(None, Some(Step::Connect), err.to_string());
                Err(err)
            }
        }
    }

    fn release(&self, db: Database) {
        match db.close() {
            Ok(()) => self.log.info(None, Some(Step::Connect), "connection closed"),
            Err(err) => self.log.warn(
                None,
                Some(Step::Connect),
                format!("connection close failed: {err}"),
            ),
        }
    }

    /// Handle to a collection that already exists; an absent one is logged
    /// and skipped rather than created.
    fn existing<'d>(
        &self,
        db: &'d Database,
        name: &str,
        step: Step,
    ) -> Result<Option<Collection<'d>>> {
        let collection = db
            .existing_collection(name)
            .map_err(|err| err.during(name, step))?;
        if collection.is_none() {
            self.log
                .info(Some(name), Some(step), "collection absent, skipping");
        }
        Ok(collection)
    }

    fn mode_suffix(&self) -> &'static str {
        if self.dry_run { " (dry run)" } else { "" }
    }

    // -----------------------------------------------------------------------
    // Migrate
    // -----------------------------------------------------------------------

    /// Run backup, tag and index phases. A fatal error stops the run; phases
    /// already finished stay finished and a later call resumes from the
    /// saved manifest.
    pub fn run(&self) -> Result<RunReport> {
        self.log
            .info(None, None, format!("migration started{}", self.mode_suffix()));
        let db = self.connect()?;
        let outcome = self.run_phases(&db);
        self.release(db);

        match &outcome {
            Ok(report) if report.index_failures.is_empty() => {
                self.log.info(None, None, "migration complete");
            }
            Ok(report) => self.log.warn(
                None,
                None,
                format!(
                    "migration complete; index missing on: {}",
                    report.index_failures.join(", ")
                ),
            ),
            Err(err) => self.log.error(None, None, format!("migration aborted: {err}")),
        }
        outcome
    }

    fn run_phases(&self, db: &Database) -> Result<RunReport> {
        let checkpoints = self.checkpoints();
        let (mut manifest, resumed) = self.prepare_manifest(&checkpoints)?;
        let tenant = manifest.tenant_id;
        self.log.info(None, None, format!("default tenant: {tenant}"));

        let mut rows: Vec<CollectionRun> = self
            .config
            .collections
            .iter()
            .map(|c| CollectionRun {
                collection: c.name().to_string(),
                phase: manifest.state(c.name()).map(|s| s.phase).unwrap_or_default(),
                archived: None,
                tagged: None,
                index_built: None,
            })
            .collect();

        self.backup_phase(db, &checkpoints, &mut manifest, &mut rows)?;
        self.tag_phase(db, &checkpoints, &mut manifest, &mut rows, &tenant)?;
        let index_failures = self.index_phase(db, &checkpoints, &mut manifest, &mut rows)?;

        if !self.dry_run {
            manifest.completed_at = Some(Utc::now());
            checkpoints.save(&manifest)?;
        }

        Ok(RunReport {
            dry_run: self.dry_run,
            resumed,
            tenant_id: tenant,
            database: db.uri().to_string(),
            backup_dir: self.config.backup_dir.display().to_string(),
            collections: rows,
            index_failures,
        })
    }

    fn prepare_manifest(&self, checkpoints: &CheckpointStore) -> Result<(RunManifest, bool)> {
        match checkpoints.load()? {
            Some(manifest) if !manifest.is_complete() => {
                if let Some(requested) = self.config.default_tenant
                    && requested != manifest.tenant_id
                {
                    return Err(MigrationError::InvalidConfig(format!(
                        "unfinished run uses tenant {}; finish or roll it back before switching to {requested}",
                        manifest.tenant_id
                    )));
                }
                self.log.info(
                    None,
                    None,
                    format!(
                        "resuming unfinished run started at {}",
                        manifest.started_at.to_rfc3339()
                    ),
                );
                Ok((manifest, true))
            }
            previous => {
                if let Some(done) = previous.and_then(|m| m.completed_at) {
                    self.log.warn(
                        None,
                        None,
                        format!(
                            "previous run completed at {}; starting a new run that refreshes the archives",
                            done.to_rfc3339()
                        ),
                    );
                }
                let tenant = self
                    .config
                    .default_tenant
                    .unwrap_or_else(TenantId::generate);
                let manifest = RunManifest::new(tenant);
                if !self.dry_run {
                    checkpoints.save(&manifest)?;
                }
                Ok((manifest, false))
            }
        }
    }

    fn backup_phase(
        &self,
        db: &Database,
        checkpoints: &CheckpointStore,
        manifest: &mut RunManifest,
        rows: &mut [CollectionRun],
    ) -> Result<()> {
        self.log
            .info(None, Some(Step::Backup), "=== phase: backup ===");
        let archives = self.archives();

        for row in rows.iter_mut() {
            let name = row.collection.as_str();

            if manifest.state(name).is_some_and(|s| s.reached(Phase::BackedUp)) {
                if archives.exists(name) {
                    self.log.info(
                        Some(name),
                        Some(Step::Backup),
                        "already backed up by this run; keeping the pre-migration archive",
                    );
                } else {
                    self.log.warn(
                        Some(name),
                        Some(Step::Backup),
                        "marked backed up but the archive is missing; rollback will fail for this collection",
                    );
                }
                continue;
            }

            if self.dry_run {
                let total = match db.existing_collection(name)? {
                    Some(collection) => collection.count()?,
                    None => 0,
                };
                self.log.info(
                    Some(name),
                    Some(Step::Backup),
                    format!(
                        "would back up {total} records to {}",
                        archives.archive_path(name).display()
                    ),
                );
                row.archived = Some(total);
                continue;
            }

            let Some(collection) = self.existing(db, name, Step::Backup)? else {
                continue;
            };
            row.archived = Some(archives.dump(&collection)?);

            let state = manifest.state_mut(name);
            state.advance(Phase::BackedUp);
            row.phase = state.phase;
            checkpoints.save(manifest)?;
        }
        Ok(())
    }

    fn tag_phase(
        &self,
        db: &Database,
        checkpoints: &CheckpointStore,
        manifest: &mut RunManifest,
        rows: &mut [CollectionRun],
        tenant: &TenantId,
    ) -> Result<()> {
        self.log.info(None, Some(Step::Tag), "=== phase: tag ===");
        let field = self.config.tenant_field.as_str();
        let tagger = TenantTagger::new(
            self.log,
            TagSettings {
                field: field.to_string(),
                batch_interval: self.config.batch_interval(),
                progress_every: self.config.tag_progress_every,
            },
        );

        for row in rows.iter_mut() {
            let name = row.collection.as_str();

            if manifest.state(name).is_some_and(|s| s.reached(Phase::Tagged)) {
                self.log
                    .info(Some(name), Some(Step::Tag), "already tagged by this run");
                continue;
            }

            if self.dry_run {
                let untagged = match db.existing_collection(name)? {
                    Some(collection) => collection.count_missing(field)?,
                    None => 0,
                };
                self.log.info(
                    Some(name),
                    Some(Step::Tag),
                    format!(
                        "would set {field} = {tenant} on {untagged} records in batches of {}",
                        self.config.batch_size
                    ),
                );
                row.tagged = Some(untagged);
                continue;
            }

            let Some(collection) = self.existing(db, name, Step::Tag)? else {
                continue;
            };
            let mut state = manifest
                .state(name)
                .cloned()
                .unwrap_or_else(|| MigrationState::new(name));

            let result = tagger.tag_from(
                &collection,
                tenant,
                self.config.batch_size,
                &mut state,
                |progress| {
                    *manifest.state_mut(name) = progress.clone();
                    checkpoints.save(manifest)
                },
            );

            match result {
                Ok(updated) => {
                    state.advance(Phase::Tagged);
                    row.phase = state.phase;
                    row.tagged = Some(updated);
                    *manifest.state_mut(name) = state;
                    checkpoints.save(manifest)?;
                }
                Err(err) => {
                    *manifest.state_mut(name) = state;
                    checkpoints.save(manifest)?;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Index failures never abort the run; the names of the collections
    /// left without an index are returned.
    fn index_phase(
        &self,
        db: &Database,
        checkpoints: &CheckpointStore,
        manifest: &mut RunManifest,
        rows: &mut [CollectionRun],
    ) -> Result<Vec<String>> {
        self.log.info(None, Some(Step::Index), "=== phase: index ===");
        let builder = IndexBuilder::new(self.log, self.config.tenant_field.clone());
        let mut failures = Vec::new();

        for row in rows.iter_mut() {
            let name = row.collection.as_str();

            if manifest.state(name).is_some_and(|s| s.reached(Phase::Indexed)) {
                self.log
                    .info(Some(name), Some(Step::Index), "already indexed by this run");
                row.index_built = Some(true);
                continue;
            }

            if self.dry_run {
                self.log.info(
                    Some(name),
                    Some(Step::Index),
                    format!("would create index {}", builder.index_name(name)),
                );
                continue;
            }

            let Some(collection) = self.existing(db, name, Step::Index)? else {
                continue;
            };
            let built = builder.build(&collection);
            row.index_built = Some(built);

            if built {
                let state = manifest.state_mut(name);
                state.advance(Phase::Indexed);
                row.phase = state.phase;
                checkpoints.save(manifest)?;
            } else {
                self.log.warn(
                    Some(name),
                    Some(Step::Index),
                    "continuing without index; records are already tagged",
                );
                failures.push(name.to_string());
            }
        }
        Ok(failures)
    }

    // -----------------------------------------------------------------------
    // Rollback
    // -----------------------------------------------------------------------

    /// Restore every configured collection from its archive. A collection
    /// that cannot be restored is reported and the rest are still attempted.
    pub fn rollback(&self) -> Result<RollbackReport> {
        self.log
            .info(None, None, format!("rollback started{}", self.mode_suffix()));
        let db = self.connect()?;
        let outcome = self.restore_all(&db);
        self.release(db);

        match &outcome {
            Ok(report) if report.success() => self.log.info(None, None, "rollback complete"),
            Ok(report) => self.log.error(
                None,
                None,
                format!(
                    "rollback incomplete: {} of {} collections restored",
                    report.restored(),
                    report.collections.len()
                ),
            ),
            Err(err) => self.log.error(None, None, format!("rollback aborted: {err}")),
        }
        outcome
    }

    fn restore_all(&self, db: &Database) -> Result<RollbackReport> {
        self.log
            .info(None, Some(Step::Restore), "=== phase: restore ===");
        let archives = self.archives();
        let checkpoints = self.checkpoints();
        let mut manifest = if self.dry_run {
            None
        } else {
            checkpoints.load()?
        };
        let mut collections = Vec::with_capacity(self.config.collections.len());

        for descriptor in &self.config.collections {
            let name = descriptor.name();
            let outcome = self.restore_one(db, &archives, name)?;
            if let (RestoreOutcome::Restored { .. }, Some(manifest)) = (&outcome, manifest.as_mut())
                && manifest.rewind_to_backup(name)
            {
                checkpoints.save(manifest)?;
                self.log.info(
                    Some(name),
                    Some(Step::Restore),
                    "run manifest rewound to backed_up; the next run tags this collection again",
                );
            }
            collections.push(CollectionRestore {
                collection: name.to_string(),
                outcome,
            });
        }

        let mut report = RollbackReport {
            dry_run: self.dry_run,
            database: db.uri().to_string(),
            collections,
            manifest_cleared: false,
        };

        if report.success() && !self.dry_run {
            report.manifest_cleared = checkpoints.clear()?;
            if report.manifest_cleared {
                self.log
                    .info(None, Some(Step::Restore), "run manifest cleared");
            }
        }
        Ok(report)
    }

    fn restore_one(
        &self,
        db: &Database,
        archives: &BackupStore<'_>,
        name: &str,
    ) -> Result<RestoreOutcome> {
        if !archives.exists(name) {
            if db.existing_collection(name)?.is_none() {
                self.log.info(
                    Some(name),
                    Some(Step::Restore),
                    "collection absent and never archived; nothing to restore",
                );
                return Ok(RestoreOutcome::Absent);
            }
            let err = MigrationError::ArchiveNotFound(name.to_string());
            self.log
                .error(Some(name), Some(Step::Restore), err.to_string());
            return Ok(RestoreOutcome::ArchiveNotFound);
        }

        if self.dry_run {
            let entries = archives.entry_count(name)?.unwrap_or(0);
            self.log.info(
                Some(name),
                Some(Step::Restore),
                format!("would replace live records with {entries} archived records"),
            );
            return Ok(RestoreOutcome::Ready { entries });
        }

        let restored = db
            .collection(name)
            .map_err(|err| err.during(name, Step::Restore))
            .and_then(|collection| archives.restore(&collection));

        Ok(match restored {
            Ok(entries) => RestoreOutcome::Restored { entries },
            Err(MigrationError::ArchiveNotFound(_)) => {
                self.log.error(
                    Some(name),
                    Some(Step::Restore),
                    format!("no archive found for collection '{name}'"),
                );
                RestoreOutcome::ArchiveNotFound
            }
            Err(err) => {
                self.log
                    .error(Some(name), Some(Step::Restore), err.to_string());
                RestoreOutcome::Failed {
                    detail: err.to_string(),
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Status and cleanup
    // -----------------------------------------------------------------------

    /// Read-only snapshot of migration progress per collection.
    pub fn status(&self) -> Result<StatusReport> {
        let db = Database::connect(self.config.database_uri())?;
        let outcome = self.collect_status(&db);
        db.close()?;
        outcome
    }

    fn collect_status(&self, db: &Database) -> Result<StatusReport> {
        let field = self.config.tenant_field.as_str();
        let archives = self.archives();
        let manifest = self.checkpoints().load()?;
        let builder = IndexBuilder::new(self.log, field);
        let mut collections = Vec::with_capacity(self.config.collections.len());

        for descriptor in &self.config.collections {
            let name = descriptor.name();
            let (exists, total, untagged, index_built) = match db.existing_collection(name)? {
                Some(collection) => (
                    true,
                    collection.count()?,
                    collection.count_missing(field)?,
                    builder.is_built(&collection)?,
                ),
                None => (false, 0, 0, false),
            };
            collections.push(CollectionStatus {
                collection: name.to_string(),
                exists,
                total,
                tagged: total.saturating_sub(untagged),
                untagged,
                archive_entries: archives.entry_count(name)?,
                index_built,
                phase: manifest
                    .as_ref()
                    .and_then(|m| m.state(name))
                    .map(|s| s.phase),
            });
        }

        Ok(StatusReport {
            database: db.uri().to_string(),
            tenant_field: field.to_string(),
            manifest: manifest.map(|m| ManifestSummary {
                tenant_id: m.tenant_id,
                started_at: m.started_at,
                completed_at: m.completed_at,
            }),
            collections,
        })
    }

    /// Delete every configured archive and the run manifest.
    pub fn cleanup(&self) -> Result<CleanupReport> {
        self.log.info(
            None,
            Some(Step::Cleanup),
            format!("cleanup started{}", self.mode_suffix()),
        );
        let archives = self.archives();
        let mut purged = Vec::new();
        let mut missing = Vec::new();

        for descriptor in &self.config.collections {
            let name = descriptor.name();
            let present = if self.dry_run {
                archives.exists(name)
            } else {
                archives.purge(name)?
            };
            if present {
                purged.push(name.to_string());
            } else {
                missing.push(name.to_string());
            }
        }

        let manifest_cleared = if self.dry_run {
            self.checkpoints().path().is_file()
        } else {
            self.checkpoints().clear()?
        };

        self.log.info(
            None,
            Some(Step::Cleanup),
            format!(
                "cleanup complete: {} archives {}",
                purged.len(),
                if self.dry_run { "would be purged" } else { "purged" }
            ),
        );
        Ok(CleanupReport {
            dry_run: self.dry_run,
            purged,
            missing,
            manifest_cleared,
        })
    }
}
