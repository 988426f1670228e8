use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use serde_json::{Map, Value};

use crate::error::{MigrationError, Result};
use crate::model::{Record, RecordId, TenantId, is_identifier};

// ---------------------------------------------------------------------------
// Connection strings
// ---------------------------------------------------------------------------

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Memory,
    File(PathBuf),
}

impl DatabaseTarget {
    /// Accepts `sqlite::memory:`, `sqlite://<path>`, `sqlite:<path>` or a bare path.
    pub fn parse(uri: &str) -> Result<Self> {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(connectivity(uri, "connection string is empty"));
        }
        if trimmed == "sqlite::memory:" || trimmed == ":memory:" {
            return Ok(Self::Memory);
        }
        if let Some(path) = trimmed.strip_prefix("sqlite://") {
            return non_empty_path(uri, path);
        }
        if let Some(path) = trimmed.strip_prefix("sqlite:") {
            return non_empty_path(uri, path);
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(connectivity(
                uri,
                format!("unsupported scheme '{scheme}' (expected sqlite)"),
            ));
        }
        Ok(Self::File(PathBuf::from(trimmed)))
    }
}

fn non_empty_path(uri: &str, path: &str) -> Result<DatabaseTarget> {
    if path.is_empty() {
        return Err(connectivity(uri, "connection string has no database path"));
    }
    Ok(DatabaseTarget::File(PathBuf::from(path)))
}

fn connectivity(uri: &str, detail: impl std::fmt::Display) -> MigrationError {
    MigrationError::Connectivity {
        uri: uri.to_string(),
        detail: detail.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// A live document store: one SQLite table per collection, each row an
/// identifier plus an opaque JSON document.
pub struct Database {
    conn: Connection,
    uri: String,
}

impl Database {
    /// Connect to an existing database. Never creates one: a missing or
    /// unreadable file is a `Connectivity` error.
    pub fn connect(uri: &str) -> Result<Self> {
        let conn = match DatabaseTarget::parse(uri)? {
            DatabaseTarget::Memory => Connection::open_in_memory(),
            DatabaseTarget::File(path) => Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
        }
        .map_err(|err| connectivity(uri, err))?;

        Self::configure(conn, uri)
    }

    /// Create (or open) a database file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::configure(conn, &format!("sqlite://{}", path.display()))
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(conn, "sqlite::memory:")
    }

    fn configure(conn: Connection, uri: &str) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA busy_timeout=5000;",
        )
        .map_err(|err| connectivity(uri, err))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|err| connectivity(uri, err))?;

        Ok(Self {
            conn,
            uri: uri.to_string(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Expose the raw connection (for tests or advanced usage).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Release the connection, surfacing any close error.
    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, err)| MigrationError::from(err))
    }

    /// Handle to `name`, creating the backing table on first use.
    pub fn collection(&self, name: &str) -> Result<Collection<'_>> {
        let collection = Collection::new(&self.conn, name)?;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY NOT NULL,
                doc TEXT NOT NULL CHECK (json_valid(doc))
            );",
            collection.table
        ))?;
        Ok(collection)
    }

    /// Handle to `name` only if its table already exists. Never mutates.
    pub fn existing_collection(&self, name: &str) -> Result<Option<Collection<'_>>> {
        let collection = Collection::new(&self.conn, name)?;
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        Ok(exists.then_some(collection))
    }
}

// ---------------------------------------------------------------------------
// Collection
// ---------------------------------------------------------------------------

/// Name and stored definition of a secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub sql: String,
}

pub struct Collection<'a> {
    conn: &'a Connection,
    name: String,
    table: String,
}

impl<'a> Collection<'a> {
    fn new(conn: &'a Connection, name: &str) -> Result<Self> {
        if !is_identifier(name) {
            return Err(MigrationError::InvalidConfig(format!(
                "collection name '{name}' must be non-empty ASCII alphanumeric/hyphen/underscore"
            )));
        }
        Ok(Self {
            conn,
            name: name.to_string(),
            table: format!("\"{name}\""),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a transaction covering subsequent calls on this collection.
    /// Dropping it without `commit` rolls everything back.
    pub fn begin(&self) -> Result<Transaction<'a>> {
        Ok(self.conn.unchecked_transaction()?)
    }

    pub fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.table);
        Ok(self.conn.query_row(&sql, [], |row| row.get(0))?)
    }

    /// Records whose `field` is absent. A JSON `null` counts as present.
    pub fn count_missing(&self, field: &str) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE json_type(doc, ?1) IS NULL",
            self.table
        );
        Ok(self
            .conn
            .query_row(&sql, params![json_path(field)], |row| row.get(0))?)
    }

    pub fn count_with_tenant(&self, field: &str, tenant: &TenantId) -> Result<u64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE json_extract(doc, ?1) = ?2",
            self.table
        );
        Ok(self
            .conn
            .query_row(&sql, params![json_path(field), tenant], |row| row.get(0))?)
    }

    pub fn get(&self, id: &RecordId) -> Result<Option<Record>> {
        let sql = format!("SELECT doc FROM {} WHERE id = ?1", self.table);
        let doc: Option<String> = self
            .conn
            .query_row(&sql, params![id], |row| row.get(0))
            .optional()?;
        doc.map(|doc| Ok(Record::new(id.clone(), parse_doc(&doc)?)))
            .transpose()
    }

    /// Stream every record in physical (insertion) order without
    /// materializing the collection. Returns the number visited.
    pub fn scan<F>(&self, mut visit: F) -> Result<u64>
    where
        F: FnMut(Record) -> Result<()>,
    {
        self.scan_raw(|id, doc| visit(Record::new(id, parse_doc(&doc)?)))
    }

    /// Same order as [`scan`](Self::scan), but each document is handed over
    /// as the stored JSON text, unparsed. Documents stored across several
    /// lines are minified by SQLite so every one fits on a single line.
    pub fn scan_raw<F>(&self, mut visit: F) -> Result<u64>
    where
        F: FnMut(RecordId, String) -> Result<()>,
    {
        let sql = format!(
            "SELECT id,
                    CASE WHEN instr(doc, char(10)) > 0 OR instr(doc, char(13)) > 0
                         THEN json(doc) ELSE doc END
             FROM {} ORDER BY rowid",
            self.table
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut visited = 0;

        while let Some(row) = rows.next()? {
            visit(row.get(0)?, row.get(1)?)?;
            visited += 1;
        }

        Ok(visited)
    }

    /// Up to `limit` records with `id > after` and `field` absent, ascending by id.
    pub fn missing_after(
        &self,
        field: &str,
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT id, doc FROM {}
             WHERE (?1 IS NULL OR id > ?1) AND json_type(doc, ?2) IS NULL
             ORDER BY id
             LIMIT ?3",
            self.table
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![after, json_path(field), limit], |row| {
                Ok((row.get::<_, RecordId>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, doc)| Ok(Record::new(id, parse_doc(&doc)?)))
            .collect()
    }

    /// Set `field` to `tenant` on one record, only while the field is still
    /// absent. Returns whether a row changed.
    pub fn set_tenant_if_missing(
        &self,
        field: &str,
        id: &RecordId,
        tenant: &TenantId,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET doc = json_set(doc, ?1, ?2)
             WHERE id = ?3 AND json_type(doc, ?1) IS NULL",
            self.table
        );
        let changed = self
            .conn
            .execute(&sql, params![json_path(field), tenant, id])?;
        Ok(changed > 0)
    }

    pub fn insert(&self, record: &Record) -> Result<()> {
        let doc = serde_json::to_string(&record.doc)?;
        self.insert_raw(&record.id, &doc)
    }

    /// Insert a document that is already JSON text, stored byte for byte.
    pub fn insert_raw(&self, id: &RecordId, doc: &str) -> Result<()> {
        let sql = format!("INSERT INTO {} (id, doc) VALUES (?1, ?2)", self.table);
        self.conn.execute(&sql, params![id, doc])?;
        Ok(())
    }

    pub fn delete(&self, id: &RecordId) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE id = ?1", self.table);
        Ok(self.conn.execute(&sql, params![id])? > 0)
    }

    pub fn delete_all(&self) -> Result<u64> {
        let sql = format!("DELETE FROM {}", self.table);
        Ok(self.conn.execute(&sql, [])? as u64)
    }

    // -----------------------------------------------------------------------
    // Indexes
    // -----------------------------------------------------------------------

    /// Definition for an ascending index on `json_extract(doc, '$.<field>')`.
    /// `field` must already be validated as an identifier.
    pub fn field_index_sql(&self, index_name: &str, field: &str) -> String {
        format!(
            "CREATE INDEX \"{index_name}\" ON {} (json_extract(doc, '{}'))",
            self.table,
            json_path(field)
        )
    }

    pub fn create_field_index(&self, index_name: &str, field: &str) -> Result<()> {
        self.conn
            .execute_batch(&self.field_index_sql(index_name, field))?;
        Ok(())
    }

    /// Look up an index by name anywhere in the database.
    pub fn index(&self, index_name: &str) -> Result<Option<(String, IndexInfo)>> {
        Ok(self
            .conn
            .query_row(
                "SELECT tbl_name, name, COALESCE(sql, '') FROM sqlite_master
                 WHERE type = 'index' AND name = ?1",
                params![index_name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        IndexInfo {
                            name: row.get(1)?,
                            sql: row.get(2)?,
                        },
                    ))
                },
            )
            .optional()?)
    }

    /// Explicitly created indexes on this collection (primary key excluded).
    pub fn indexes(&self) -> Result<Vec<IndexInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL
             ORDER BY name",
        )?;
        let rows = stmt
            .query_map(params![self.name], |row| {
                Ok(IndexInfo {
                    name: row.get(0)?,
                    sql: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn parse_doc(doc: &str) -> Result<Map<String, Value>> {
    Ok(serde_json::from_str(doc)?)
}
