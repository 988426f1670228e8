use crate::error::{MigrationError, Result};
use crate::model::{Record, RecordId};
use crate::store::database::Collection;

/// Forward-only scan over the records of a collection that still lack a
/// field, paged in ascending id order.
///
/// Each page is selected by `id > position AND field absent`. The lower
/// bound guarantees forward progress; the absence predicate means records
/// tagged in between never come back. The position only moves when the
/// caller reports a record as handled, so a failed page can be retried.
pub struct BatchCursor<'c> {
    collection: &'c Collection<'c>,
    field: &'c str,
    batch_size: usize,
    position: Option<RecordId>,
}

impl<'c> BatchCursor<'c> {
    pub fn new(collection: &'c Collection<'c>, field: &'c str, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(MigrationError::InvalidConfig(
                "batch size must be a positive integer".into(),
            ));
        }
        Ok(Self {
            collection,
            field,
            batch_size,
            position: None,
        })
    }

    /// Continue after a previously saved position.
    pub fn resume_after(mut self, position: Option<RecordId>) -> Self {
        self.position = position;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn position(&self) -> Option<&RecordId> {
        self.position.as_ref()
    }

    /// The next page; empty once nothing beyond the position is left.
    pub fn next_batch(&self) -> Result<Vec<Record>> {
        self.collection
            .missing_after(self.field, self.position.as_ref(), self.batch_size)
    }

    /// Record `id` as handled. Positions only ever increase.
    pub fn advance(&mut self, id: &RecordId) {
        if self.position.as_ref().is_none_or(|current| id > current) {
            self.position = Some(id.clone());
        }
    }
}
