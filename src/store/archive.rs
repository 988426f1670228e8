use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{MigrationError, Result};
use crate::model::{RecordId, Step};
use crate::progress::ProgressLog;
use crate::store::database::Collection;
use crate::store::lock::ArchiveLock;

pub const ARCHIVE_EXTENSION: &str = "jsonl";
pub const DEFAULT_PROGRESS_EVERY: u64 = 10_000;

/// One archive line. The document travels as unparsed JSON text so numbers,
/// key order and any `_id` key inside it come back exactly as stored.
#[derive(Serialize)]
struct ArchiveLine<'r> {
    #[serde(rename = "_id")]
    id: &'r RecordId,
    doc: &'r RawValue,
}

#[derive(Deserialize)]
struct ArchivedEntry {
    #[serde(rename = "_id")]
    id: RecordId,
    doc: Box<RawValue>,
}

/// Line-oriented collection snapshots under a single backup directory.
///
/// Each archive holds one `{"_id": .., "doc": {..}}` object per line in the
/// order the records were read. Dump, restore and purge hold an exclusive
/// lock on the directory for their whole duration.
pub struct BackupStore<'a> {
    dir: PathBuf,
    log: &'a ProgressLog,
    progress_every: u64,
}

impl<'a> BackupStore<'a> {
    pub fn new(dir: impl Into<PathBuf>, log: &'a ProgressLog) -> Self {
        Self {
            dir: dir.into(),
            log,
            progress_every: DEFAULT_PROGRESS_EVERY,
        }
    }

    pub fn with_progress_every(mut self, every: u64) -> Self {
        self.progress_every = every.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn archive_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.{ARCHIVE_EXTENSION}"))
    }

    pub fn exists(&self, collection: &str) -> bool {
        self.archive_path(collection).is_file()
    }

    /// Number of entries in the archive, or `None` when there is no archive.
    pub fn entry_count(&self, collection: &str) -> Result<Option<u64>> {
        let path = self.archive_path(collection);
        if !path.is_file() {
            return Ok(None);
        }
        let reader = BufReader::new(File::open(path)?);
        let mut count = 0;
        for line in reader.lines() {
            if !line?.trim().is_empty() {
                count += 1;
            }
        }
        Ok(Some(count))
    }

    /// Stream every record of `collection` into its archive, replacing any
    /// previous archive only once the new one is completely written.
    pub fn dump(&self, collection: &Collection<'_>) -> Result<u64> {
        let name = collection.name();
        let lock = ArchiveLock::acquire(&self.dir)?;

        self.log
            .info(Some(name), Some(Step::Backup), "starting backup");

        let target = self.archive_path(name);
        let staging = self.dir.join(format!(
            ".{name}.{}.partial",
            Uuid::new_v4().simple()
        ));

        let written = match self.write_archive(collection, &staging) {
            Ok(written) => written,
            Err(err) => {
                let _ = fs::remove_file(&staging);
                return Err(err.during(name, Step::Backup));
            }
        };

        if let Err(err) = fs::rename(&staging, &target) {
            let _ = fs::remove_file(&staging);
            return Err(MigrationError::from(err).during(name, Step::Backup));
        }
        lock.release()?;

        self.log.info(
            Some(name),
            Some(Step::Backup),
            format!(
                "backup complete: {written} records saved to {}",
                target.display()
            ),
        );
        Ok(written)
    }

    fn write_archive(&self, collection: &Collection<'_>, path: &Path) -> Result<u64> {
        let name = collection.name();
        let mut writer = BufWriter::new(File::create(path)?);
        let mut written = 0_u64;

        collection.scan_raw(|id, doc| {
            let doc = RawValue::from_string(doc)?;
            serde_json::to_writer(
                &mut writer,
                &ArchiveLine {
                    id: &id,
                    doc: &doc,
                },
            )?;
            writer.write_all(b"\n")?;
            written += 1;
            if written % self.progress_every == 0 {
                self.log.info(
                    Some(name),
                    Some(Step::Backup),
                    format!("backup in progress: {written} records written"),
                );
            }
            Ok(())
        })?;

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok(written)
    }

    /// Replace the live contents of `collection` with its archive.
    ///
    /// Runs in a single transaction: every live record is deleted, then the
    /// archive is replayed in order with the original identifiers. A corrupt
    /// line or failed insert rolls the whole restore back.
    pub fn restore(&self, collection: &Collection<'_>) -> Result<u64> {
        let name = collection.name();
        let path = self.archive_path(name);
        if !path.is_file() {
            return Err(MigrationError::ArchiveNotFound(name.to_string()));
        }

        let lock = ArchiveLock::acquire(&self.dir)?;
        self.log.info(
            Some(name),
            Some(Step::Restore),
            format!("starting restore from {}", path.display()),
        );

        let reader = BufReader::new(File::open(&path)?);
        let tx = collection.begin()?;
        let removed = collection
            .delete_all()
            .map_err(|err| err.during(name, Step::Restore))?;
        self.log.info(
            Some(name),
            Some(Step::Restore),
            format!("removed {removed} live records"),
        );

        let mut restored = 0_u64;
        for (index, line) in reader.lines().enumerate() {
            let line_number = index as u64 + 1;
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let corrupt = |detail: String| MigrationError::CorruptArchive {
                collection: name.to_string(),
                line: line_number,
                detail,
            };
            let entry: ArchivedEntry =
                serde_json::from_str(&line).map_err(|err| corrupt(err.to_string()))?;
            if !entry.doc.get().starts_with('{') {
                return Err(corrupt("document is not a JSON object".to_string()));
            }
            collection
                .insert_raw(&entry.id, entry.doc.get())
                .map_err(|err| err.during(name, Step::Restore))?;

            restored += 1;
            if restored % self.progress_every == 0 {
                self.log.info(
                    Some(name),
                    Some(Step::Restore),
                    format!("restore in progress: {restored} records replayed"),
                );
            }
        }

        tx.commit()
            .map_err(|err| MigrationError::from(err).during(name, Step::Restore))?;
        lock.release()?;

        self.log.info(
            Some(name),
            Some(Step::Restore),
            format!("restore complete: {restored} records restored"),
        );
        Ok(restored)
    }

    /// Delete the archive for `collection`. Returns whether one existed.
    pub fn purge(&self, collection: &str) -> Result<bool> {
        let path = self.archive_path(collection);
        if !path.is_file() {
            return Ok(false);
        }

        let lock = ArchiveLock::acquire(&self.dir)?;
        fs::remove_file(&path)?;
        lock.release()?;

        self.log.info(
            Some(collection),
            Some(Step::Cleanup),
            format!("archive {} purged", path.display()),
        );
        Ok(true)
    }
}
