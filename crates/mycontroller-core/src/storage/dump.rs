// ── Paginated collection files ──
//
// Shared by the in-memory engine's periodic dump and by backup bundles:
// one collection is split into `<collection>__<idx>.<ext>` files of at
// most 50 rows each, indexed from 1.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, trace};

use super::{StorageError, StorageFormat};

pub const DUMP_ROWS_PER_FILE: usize = 50;

const SEPARATOR: &str = "__";

const TMP_SUFFIX: &str = ".tmp";

pub fn dump_file_name(collection: &str, index: usize, format: StorageFormat) -> String {
    format!("{collection}{SEPARATOR}{index}.{}", format.extension())
}

/// Split `<collection>__<idx>.<ext>` into its parts.
pub fn parse_dump_file_name(name: &str) -> Option<(String, usize, StorageFormat)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let format = StorageFormat::from_extension(ext)?;
    let (collection, index) = stem.rsplit_once(SEPARATOR)?;
    if collection.is_empty() {
        return None;
    }
    Some((collection.to_owned(), index.parse().ok()?, format))
}

/// Replace the `format` files of one collection in `dir` with `rows`.
/// Returns the number of files written.
///
/// Pages are written under a `.tmp` suffix and renamed over the old ones,
/// so an interrupted dump leaves the previous files readable.
pub async fn write_dump(
    dir: &Path,
    collection: &str,
    rows: &[Value],
    format: StorageFormat,
) -> Result<usize, StorageError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    let mut staged = Vec::new();
    for (i, chunk) in rows.chunks(DUMP_ROWS_PER_FILE).enumerate() {
        let name = dump_file_name(collection, i + 1, format);
        let tmp = dir.join(format!("{name}{TMP_SUFFIX}"));
        let path = dir.join(name);
        let bytes = format.encode(chunk)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        staged.push((tmp, path));
    }
    for (tmp, path) in &staged {
        tokio::fs::rename(tmp, path)
            .await
            .map_err(|e| StorageError::io(path, e))?;
    }
    let written = staged.len();
    remove_collection_files(dir, collection, format, written).await?;
    trace!(collection, rows = rows.len(), files = written, "collection dumped");
    Ok(written)
}

/// Remove the pages of one collection numbered above `keep`.
async fn remove_collection_files(
    dir: &Path,
    collection: &str,
    format: StorageFormat,
    keep: usize,
) -> Result<(), StorageError> {
    for (path, name) in list_files(dir).await? {
        if parse_dump_file_name(&name)
            .is_some_and(|(c, i, f)| c == collection && f == format && i > keep)
        {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
        }
    }
    Ok(())
}

async fn list_files(dir: &Path) -> Result<Vec<(PathBuf, String)>, StorageError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let path = entry.path();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        if !metadata.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            files.push((path.clone(), name.to_owned()));
        }
    }
    Ok(files)
}

/// One decoded dump file.
#[derive(Debug, Clone)]
pub struct DumpFile {
    pub collection: String,
    pub index: usize,
    pub path: PathBuf,
    pub rows: Vec<Value>,
}

/// Read every `format` dump file in `dir`, ordered by collection then
/// index. Files with other extensions or names are skipped.
pub async fn read_dump_dir(dir: &Path, format: StorageFormat) -> Result<Vec<DumpFile>, StorageError> {
    let mut found = Vec::new();
    for (path, name) in list_files(dir).await? {
        match parse_dump_file_name(&name) {
            Some((collection, index, file_format)) if file_format == format => {
                found.push((collection, index, path));
            }
            _ => trace!(file = %name, "skipping non-dump file"),
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut files = Vec::with_capacity(found.len());
    for (collection, index, path) in found {
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        let rows = format.decode(&bytes).map_err(|e| {
            StorageError::Serialization(format!("{}: {e}", path.display()))
        })?;
        debug!(collection = %collection, index, rows = rows.len(), "dump file read");
        files.push(DumpFile {
            collection,
            index,
            path,
            rows,
        });
    }
    Ok(files)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_names_round_trip() {
        let name = dump_file_name("service_token", 3, StorageFormat::Yaml);
        assert_eq!(name, "service_token__3.yaml");
        assert_eq!(
            parse_dump_file_name(&name),
            Some(("service_token".to_owned(), 3, StorageFormat::Yaml))
        );
        assert_eq!(parse_dump_file_name("backup.yaml"), None);
        assert_eq!(parse_dump_file_name("node__x.json"), None);
    }

    #[tokio::test]
    async fn splits_into_pages_of_fifty() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<Value> = (0..120).map(|i| json!({"id": format!("u{i:03}")})).collect();

        let files = write_dump(dir.path(), "user", &rows, StorageFormat::Json)
            .await
            .unwrap();
        assert_eq!(files, 3);

        let read = read_dump_dir(dir.path(), StorageFormat::Json).await.unwrap();
        let sizes: Vec<_> = read.iter().map(|f| f.rows.len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(read[0].rows[0]["id"], "u000");
    }

    #[tokio::test]
    async fn rewrite_drops_stale_pages() {
        let dir = tempfile::tempdir().unwrap();
        let many: Vec<Value> = (0..60).map(|i| json!({"id": i})).collect();
        write_dump(dir.path(), "node", &many, StorageFormat::Yaml)
            .await
            .unwrap();
        write_dump(dir.path(), "node", &many[..5], StorageFormat::Yaml)
            .await
            .unwrap();

        let read = read_dump_dir(dir.path(), StorageFormat::Yaml).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].rows.len(), 5);
    }

    #[tokio::test]
    async fn rewrite_replaces_pages_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let old: Vec<Value> = (0..120).map(|i| json!({"id": format!("old{i}")})).collect();
        write_dump(dir.path(), "field", &old, StorageFormat::Json)
            .await
            .unwrap();
        // A leftover from an interrupted dump is ignored and overwritten.
        std::fs::write(dir.path().join("field__1.json.tmp"), b"garbage").unwrap();

        let new: Vec<Value> = (0..70).map(|i| json!({"id": format!("new{i}")})).collect();
        let files = write_dump(dir.path(), "field", &new, StorageFormat::Json)
            .await
            .unwrap();
        assert_eq!(files, 2);

        let read = read_dump_dir(dir.path(), StorageFormat::Json).await.unwrap();
        let ids: Vec<_> = read
            .iter()
            .flat_map(|f| f.rows.iter().map(|r| r["id"].as_str().unwrap().to_owned()))
            .collect();
        assert_eq!(ids.len(), 70);
        assert!(ids.iter().all(|id| id.starts_with("new")));

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["field__1.json", "field__2.json"]);
    }

    #[tokio::test]
    async fn missing_dir_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let read = read_dump_dir(&dir.path().join("absent"), StorageFormat::Json)
            .await
            .unwrap();
        assert!(read.is_empty());
    }
}
