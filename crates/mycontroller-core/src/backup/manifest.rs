// ── Backup manifest ──

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::storage::StorageFormat;
use crate::version::VersionInfo;

pub const MANIFEST_FILE: &str = "backup.yaml";
/// Bundle sub-directory holding the paginated entity dumps.
pub const STORAGE_DIR: &str = "storage";

/// `backup.yaml` at the root of every bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub filename: String,
    pub storage_export_type: StorageFormat,
    pub created_on: DateTime<Utc>,
    pub version: VersionInfo,
    /// Logical name to the absolute path it was copied from.
    #[serde(default)]
    pub directories: BTreeMap<String, PathBuf>,
}

impl Manifest {
    pub async fn write(&self, bundle_root: &Path) -> Result<(), CoreError> {
        let path = bundle_root.join(MANIFEST_FILE);
        let yaml = serde_yaml::to_string(self)?;
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| CoreError::io(&path, e))
    }

    pub async fn read(bundle_root: &Path) -> Result<Self, CoreError> {
        let path = bundle_root.join(MANIFEST_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| CoreError::io(&path, e))?;
        serde_yaml::from_slice(&bytes).map_err(|e| {
            CoreError::validation(format!("invalid manifest {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn yaml_shape() {
        let manifest = Manifest {
            filename: "mycontroller_backup_20260310".into(),
            storage_export_type: StorageFormat::Json,
            created_on: DateTime::parse_from_rfc3339("2026-03-10T01:02:03Z")
                .unwrap()
                .with_timezone(&Utc),
            version: VersionInfo {
                version: "2.1.0".into(),
                git_commit: "abc123".into(),
                ..VersionInfo::default()
            },
            directories: BTreeMap::from([("firmware".into(), PathBuf::from("/mc/firmware"))]),
        };
        let yaml = serde_yaml::to_string(&manifest).unwrap();
        assert!(yaml.contains("storage_export_type: json"));
        assert!(yaml.contains("gitCommit: abc123"));
        assert!(yaml.contains("firmware: /mc/firmware"));
        assert_eq!(serde_yaml::from_str::<Manifest>(&yaml).unwrap(), manifest);
    }

    #[tokio::test]
    async fn garbage_manifest_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "filename: [").unwrap();
        let err = Manifest::read(dir.path()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
