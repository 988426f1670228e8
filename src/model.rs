use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{MigrationError, Result};

/// A collection named in configuration. Names double as table and archive
/// file names, so they are restricted to ASCII alphanumerics, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionDescriptor {
    name: String,
}

impl CollectionDescriptor {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !is_identifier(&name) {
            return Err(MigrationError::InvalidConfig(format!(
                "collection name '{name}' must be non-empty ASCII alphanumeric/hyphen/underscore"
            )));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for CollectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for CollectionDescriptor {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CollectionDescriptor> for String {
    fn from(value: CollectionDescriptor) -> Self {
        value.name
    }
}

pub(crate) fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Ordered record identifier. Comparison is byte-wise, matching SQLite's
/// BINARY collation so cursor bounds agree with `ORDER BY id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(RecordId::from)
                .map_err(|err| FromSqlError::Other(Box::new(err))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Tenant identifier: a 128-bit UUID rendered as its hyphenated lowercase form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(Uuid);

impl TenantId {
    /// Fresh random identifier, used as the run's default tenant.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for TenantId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl ToSql for TenantId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

/// One document plus its identifier. The engine only ever looks at the
/// tenant field; everything else in `doc` is carried through untouched,
/// including a `_id` key of the document's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: RecordId,
    pub doc: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, doc: Map<String, Value>) -> Self {
        Self { id: id.into(), doc }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.doc.get(name)
    }

    /// The tenant recorded under `field`, if it is present and parses.
    pub fn tenant(&self, field: &str) -> Option<TenantId> {
        self.field(field)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }
}

/// Unit of work reported in progress events and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Connect,
    Backup,
    Tag,
    Index,
    Restore,
    Cleanup,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Backup => write!(f, "backup"),
            Self::Tag => write!(f, "tag"),
            Self::Index => write!(f, "index"),
            Self::Restore => write!(f, "restore"),
            Self::Cleanup => write!(f, "cleanup"),
        }
    }
}

/// How far a collection has progressed through a migration run.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    NotStarted,
    BackedUp,
    Tagged,
    Indexed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::BackedUp => write!(f, "backed_up"),
            Self::Tagged => write!(f, "tagged"),
            Self::Indexed => write!(f, "indexed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationState {
    pub collection: String,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_id: Option<RecordId>,
    #[serde(default)]
    pub processed_count: u64,
}

impl MigrationState {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            phase: Phase::NotStarted,
            last_processed_id: None,
            processed_count: 0,
        }
    }

    /// Move forward to `phase`; never moves backwards.
    pub fn advance(&mut self, phase: Phase) {
        if phase > self.phase {
            self.phase = phase;
        }
    }

    pub fn reached(&self, phase: Phase) -> bool {
        self.phase >= phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn collection_descriptor_rejects_unsafe_names() {
        assert!(CollectionDescriptor::new("entries").is_ok());
        assert!(CollectionDescriptor::new("device_status-2").is_ok());
        assert!(CollectionDescriptor::new("").is_err());
        assert!(CollectionDescriptor::new("bad name").is_err());
        assert!(CollectionDescriptor::new("x\"; DROP TABLE y").is_err());
    }

    #[test]
    fn collection_descriptor_deserializes_from_plain_string() {
        let parsed: Vec<CollectionDescriptor> =
            serde_yaml::from_str("[entries, treatments]").unwrap();
        assert_eq!(parsed[1].name(), "treatments");
        assert!(serde_yaml::from_str::<Vec<CollectionDescriptor>>("['a b']").is_err());
    }

    #[test]
    fn record_ids_order_bytewise() {
        let mut ids: Vec<RecordId> = ["b", "B", "a10", "a2"]
            .into_iter()
            .map(RecordId::from)
            .collect();
        ids.sort();
        let ordered: Vec<&str> = ids.iter().map(RecordId::as_str).collect();
        assert_eq!(ordered, vec!["B", "a10", "a2", "b"]);
    }

    #[test]
    fn tenant_id_round_trips_through_text() {
        let tenant = TenantId::generate();
        let text = tenant.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<TenantId>().unwrap(), tenant);
        assert_eq!(serde_json::to_value(tenant).unwrap(), json!(text));
    }

    #[test]
    fn record_keeps_its_document_id_apart_from_the_record_id() {
        let doc = json!({"zeta": 1, "_id": "legacy-1", "alpha": {"nested": true}});
        let record = Record::new("r1", doc.as_object().unwrap().clone());
        let line = serde_json::to_string(&record).unwrap();
        assert_eq!(
            line,
            r#"{"_id":"r1","doc":{"zeta":1,"_id":"legacy-1","alpha":{"nested":true}}}"#
        );

        let parsed: Record = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn record_tenant_reads_configured_field() {
        let tenant = TenantId::generate();
        let doc = json!({"tenantId": tenant.to_string()});
        let record = Record::new("r1", doc.as_object().unwrap().clone());
        assert_eq!(record.tenant("tenantId"), Some(tenant));
        assert_eq!(record.tenant("patientId"), None);
    }

    #[test]
    fn migration_state_never_regresses() {
        let mut state = MigrationState::new("entries");
        state.advance(Phase::Tagged);
        state.advance(Phase::BackedUp);
        assert_eq!(state.phase, Phase::Tagged);
        assert!(state.reached(Phase::BackedUp));
        assert!(!state.reached(Phase::Indexed));
    }
}
