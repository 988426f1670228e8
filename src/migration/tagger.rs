use std::thread;
use std::time::Duration;

use crate::error::Result;
use crate::migration::cursor::BatchCursor;
use crate::model::{MigrationState, Step, TenantId};
use crate::progress::ProgressLog;
use crate::store::database::Collection;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSettings {
    pub field: String,
    /// Pause after every non-empty batch to throttle write pressure.
    pub batch_interval: Duration,
    pub progress_every: u64,
}

impl Default for TagSettings {
    fn default() -> Self {
        Self {
            field: "tenantId".into(),
            batch_interval: Duration::from_millis(100),
            progress_every: 1000,
        }
    }
}

/// Writes the default tenant onto every record that has none, one document
/// and one batch at a time.
pub struct TenantTagger<'a> {
    log: &'a ProgressLog,
    settings: TagSettings,
}

impl<'a> TenantTagger<'a> {
    pub fn new(log: &'a ProgressLog, mut settings: TagSettings) -> Self {
        settings.progress_every = settings.progress_every.max(1);
        Self { log, settings }
    }

    pub fn settings(&self) -> &TagSettings {
        &self.settings
    }

    /// Tag every untagged record of `collection` from the beginning.
    /// Returns the number of records updated by this call.
    pub fn tag_all(
        &self,
        collection: &Collection<'_>,
        tenant: &TenantId,
        batch_size: usize,
    ) -> Result<u64> {
        let mut state = MigrationState::new(collection.name());
        self.tag_from(collection, tenant, batch_size, &mut state, |_| Ok(()))
    }

    /// Resumable form of [`tag_all`](Self::tag_all): starts after
    /// `state.last_processed_id`, keeps `state` current after every record
    /// and hands it to `on_batch` after every completed batch.
    ///
    /// The first failed update aborts with `WriteFailure`; everything
    /// before it stays applied and `state` points at the last good record.
    pub fn tag_from<F>(
        &self,
        collection: &Collection<'_>,
        tenant: &TenantId,
        batch_size: usize,
        state: &mut MigrationState,
        mut on_batch: F,
    ) -> Result<u64>
    where
        F: FnMut(&MigrationState) -> Result<()>,
    {
        let name = collection.name();
        let field = self.settings.field.as_str();
        let total = collection
            .count()
            .map_err(|err| err.during(name, Step::Tag))?;

        match &state.last_processed_id {
            Some(last) => self.log.info(
                Some(name),
                Some(Step::Tag),
                format!("resuming tag phase after {last}: {total} records in collection"),
            ),
            None => self.log.info(
                Some(name),
                Some(Step::Tag),
                format!("starting tag phase: {total} records in collection"),
            ),
        }

        let mut cursor = BatchCursor::new(collection, field, batch_size)?
            .resume_after(state.last_processed_id.clone());
        let mut updated = 0_u64;

        loop {
            let batch = cursor
                .next_batch()
                .map_err(|err| err.during(name, Step::Tag))?;
            if batch.is_empty() {
                break;
            }

            for record in &batch {
                let changed = collection
                    .set_tenant_if_missing(field, &record.id, tenant)
                    .map_err(|err| err.during(name, Step::Tag))?;
                cursor.advance(&record.id);
                state.last_processed_id = cursor.position().cloned();

                if changed {
                    updated += 1;
                    state.processed_count += 1;
                    if state.processed_count % self.settings.progress_every == 0 {
                        self.log.info(
                            Some(name),
                            Some(Step::Tag),
                            format!(
                                "progress: {}% ({}/{total})",
                                percent(state.processed_count, total),
                                state.processed_count
                            ),
                        );
                    }
                }
            }

            on_batch(state)?;

            if !self.settings.batch_interval.is_zero() {
                thread::sleep(self.settings.batch_interval);
            }
        }

        self.log.info(
            Some(name),
            Some(Step::Tag),
            format!("tag complete: {updated} records updated"),
        );
        Ok(updated)
    }
}

fn percent(done: u64, total: u64) -> u64 {
    if total == 0 {
        return 100;
    }
    (done.saturating_mul(100) / total).min(100)
}
