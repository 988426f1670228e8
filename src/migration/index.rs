use serde::Serialize;

use crate::error::{MigrationError, Result};
use crate::model::Step;
use crate::progress::ProgressLog;
use crate::store::database::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Created,
    AlreadyExists,
}

/// Builds the ascending secondary index on the tenant field.
pub struct IndexBuilder<'a> {
    log: &'a ProgressLog,
    field: String,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(log: &'a ProgressLog, field: impl Into<String>) -> Self {
        Self {
            log,
            field: field.into(),
        }
    }

    pub fn index_name(&self, collection: &str) -> String {
        format!("idx_{collection}_{}", self.field)
    }

    /// Create the index, logging the outcome. Returns `false` on failure;
    /// the cause is in the progress log.
    pub fn build(&self, collection: &Collection<'_>) -> bool {
        let name = collection.name();
        let index_name = self.index_name(name);
        self.log.info(
            Some(name),
            Some(Step::Index),
            format!("creating index {index_name} on {}", self.field),
        );

        match self.try_build(collection) {
            Ok(IndexOutcome::Created) => {
                self.log.info(
                    Some(name),
                    Some(Step::Index),
                    format!("index {index_name} created"),
                );
                true
            }
            Ok(IndexOutcome::AlreadyExists) => {
                self.log.info(
                    Some(name),
                    Some(Step::Index),
                    format!("index {index_name} already exists"),
                );
                true
            }
            Err(err) => {
                self.log.error(Some(name), Some(Step::Index), err.to_string());
                false
            }
        }
    }

    /// Idempotent: an index with the same name and definition is left alone.
    /// A same-named index with any other definition is an `IndexBuildFailure`.
    pub fn try_build(&self, collection: &Collection<'_>) -> Result<IndexOutcome> {
        let name = collection.name();
        let index_name = self.index_name(name);
        let expected = collection.field_index_sql(&index_name, &self.field);
        let failure = |detail: String| MigrationError::IndexBuildFailure {
            collection: name.to_string(),
            detail,
        };

        let current = collection
            .index(&index_name)
            .map_err(|e| failure(e.to_string()))?;
        if let Some((table, existing)) = current {
            if table == name && same_definition(&existing.sql, &expected) {
                return Ok(IndexOutcome::AlreadyExists);
            }
            return Err(failure(format!(
                "index {index_name} already exists on '{table}' with a different definition: {}",
                existing.sql
            )));
        }

        collection
            .create_field_index(&index_name, &self.field)
            .map_err(|e| failure(e.to_string()))?;
        Ok(IndexOutcome::Created)
    }

    /// Whether the tenant index is present with the expected definition.
    pub fn is_built(&self, collection: &Collection<'_>) -> Result<bool> {
        let index_name = self.index_name(collection.name());
        let expected = collection.field_index_sql(&index_name, &self.field);
        Ok(collection
            .index(&index_name)?
            .is_some_and(|(table, existing)| {
                table == collection.name() && same_definition(&existing.sql, &expected)
            }))
    }
}

fn same_definition(stored: &str, expected: &str) -> bool {
    let normalize = |sql: &str| sql.split_whitespace().collect::<Vec<_>>().join(" ");
    normalize(stored).eq_ignore_ascii_case(&normalize(expected))
}
