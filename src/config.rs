use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrationError, Result};
use crate::model::{CollectionDescriptor, TenantId, is_identifier};

/// Environment variable holding the database connection string.
pub const DATABASE_URI_ENV: &str = "TENANTIZE_DATABASE_URI";

/// Development fallback when no connection string is configured.
pub const DEFAULT_DATABASE_URI: &str = "sqlite://data/documents.db";

pub const DEFAULT_COLLECTIONS: [&str; 7] = [
    "entries",
    "treatments",
    "devicestatus",
    "profile",
    "food",
    "activity",
    "settings",
];

/// Migration settings, read from an optional YAML file and then overlaid
/// with the environment and command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MigrationConfig {
    pub database_uri: Option<String>,
    pub collections: Vec<CollectionDescriptor>,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub backup_dir: PathBuf,
    pub log_file: PathBuf,
    pub tenant_field: String,
    pub tag_progress_every: u64,
    pub archive_progress_every: u64,
    pub default_tenant: Option<TenantId>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_uri: None,
            collections: DEFAULT_COLLECTIONS
                .iter()
                .filter_map(|name| CollectionDescriptor::new(*name).ok())
                .collect(),
            batch_size: 1000,
            batch_interval_ms: 100,
            backup_dir: PathBuf::from("backup"),
            log_file: PathBuf::from("logs").join("migration.log"),
            tenant_field: "tenantId".into(),
            tag_progress_every: 1000,
            archive_progress_every: 10_000,
            default_tenant: None,
        }
    }
}

impl MigrationConfig {
    /// Load configuration. Without a file, defaults apply and relative paths
    /// resolve against `base_dir`; with one, they resolve against the file's
    /// directory. The connection string is then resolved from the environment.
    pub fn load(path: Option<&Path>, base_dir: &Path) -> Result<Self> {
        let (mut config, root) = match path {
            Some(path) => {
                let data = fs::read_to_string(path)?;
                let config: MigrationConfig = serde_yaml::from_str(&data)?;
                let root = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| base_dir.to_path_buf());
                (config, root)
            }
            None => (Self::default(), base_dir.to_path_buf()),
        };

        config.backup_dir = resolve_path(&root, &config.backup_dir);
        config.log_file = resolve_path(&root, &config.log_file);

        let env_uri = std::env::var(DATABASE_URI_ENV).ok();
        config.database_uri = Some(resolve_database_uri(
            config.database_uri.as_deref(),
            env_uri.as_deref(),
        ));

        config.validate()?;
        Ok(config)
    }

    pub fn database_uri(&self) -> &str {
        self.database_uri.as_deref().unwrap_or(DEFAULT_DATABASE_URI)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Overlay the `--batch` and `--tenant` flags. An unusable `--batch` is
    /// ignored and described in the returned warning; a malformed
    /// `--tenant` is an error.
    pub fn apply_overrides(
        &mut self,
        batch: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<Option<String>> {
        if let Some(raw) = tenant {
            let parsed = raw.trim().parse::<TenantId>().map_err(|err| {
                MigrationError::InvalidConfig(format!("--tenant '{raw}' is not a UUID: {err}"))
            })?;
            self.default_tenant = Some(parsed);
        }

        let Some(raw) = batch else {
            return Ok(None);
        };
        match parse_batch_flag(raw) {
            Some(size) => {
                self.batch_size = size;
                Ok(None)
            }
            None => Ok(Some(format!(
                "ignoring --batch={raw}: not a positive integer; using {}",
                self.batch_size
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.collections.is_empty() {
            return Err(MigrationError::InvalidConfig(
                "at least one collection must be configured".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            if !seen.insert(collection.name()) {
                return Err(MigrationError::InvalidConfig(format!(
                    "collection '{collection}' is listed more than once"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(MigrationError::InvalidConfig(
                "batch_size must be a positive integer".into(),
            ));
        }
        if self.tag_progress_every == 0 || self.archive_progress_every == 0 {
            return Err(MigrationError::InvalidConfig(
                "progress intervals must be positive".into(),
            ));
        }
        if !is_identifier(&self.tenant_field) || self.tenant_field.contains('-') {
            return Err(MigrationError::InvalidConfig(format!(
                "tenant_field '{}' must be ASCII alphanumeric/underscore",
                self.tenant_field
            )));
        }
        Ok(())
    }
}

/// `--batch=N` is honored only for positive integers; anything else is ignored.
pub fn parse_batch_flag(raw: &str) -> Option<usize> {
    raw.trim().parse::<usize>().ok().filter(|n| *n > 0)
}

/// Environment wins over the file; an empty value counts as unset.
pub fn resolve_database_uri(file_value: Option<&str>, env_value: Option<&str>) -> String {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or(file_value.filter(|v| !v.trim().is_empty()))
        .unwrap_or(DEFAULT_DATABASE_URI)
        .trim()
        .to_string()
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
