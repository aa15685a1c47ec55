// ── Storage plugin contract ──
//
// The single boundary between the core and a persistence engine.
// Documents cross it as `serde_json::Value`; typed access lives one
// layer up in `EntityApi`. Filters are conjunctions of field-path
// predicates; pagination is limit/offset with multi-key sorting.

mod dump;
mod filter;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;

use crate::model::Collection;

pub use dump::{
    DUMP_ROWS_PER_FILE, DumpFile, dump_file_name, parse_dump_file_name, read_dump_dir, write_dump,
};
pub use filter::{lookup_path, sort_documents};
pub(crate) use filter::CompiledFilters;
pub use memory::{MemoryStorage, MemoryStorageConfig};

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no documents in '{collection}' match the filter")]
    NoDocuments { collection: String },

    #[error("document '{id}' already exists in '{collection}'")]
    Conflict { collection: String, id: String },

    #[error("invalid filter on '{key}': {message}")]
    InvalidFilter { key: String, message: String },

    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    #[error("storage IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage serialization error: {0}")]
    Serialization(String),

    /// Engine-specific failure that may succeed on retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn invalid_filter(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidFilter {
            key: key.to_owned(),
            message: message.into(),
        }
    }
}

// ── Filters ─────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    In,
    Nin,
    Gt,
    Lt,
    Gte,
    Lte,
    RangeIn,
    RangeNotIn,
    Exists,
    Regex,
}

/// One predicate `{key, operator, value}`. `key` is a dotted path into the
/// document, using the camelCase field names (`state.since`, `labels.room`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub key: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(key: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(key, Operator::Eq, value)
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<Value> = ids.into_iter().map(|id| Value::String(id.into())).collect();
        Self::new("id", Operator::In, Value::Array(ids))
    }
}

// ── Pagination ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortBy {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// `limit <= 0` means unbounded. With no `sort_by`, rows sort by `id` asc.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub sort_by: Vec<SortBy>,
}

impl Pagination {
    pub fn page(limit: i64, offset: i64) -> Self {
        Self {
            limit,
            offset,
            sort_by: Vec::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sorted(mut self, sort: SortBy) -> Self {
        self.sort_by.push(sort);
        self
    }
}

/// Result page. `count` is the total number of matches before paging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResult<T = Value> {
    pub count: u64,
    pub limit: i64,
    pub offset: i64,
    pub data: Vec<T>,
}

// ── Formats ─────────────────────────────────────────────────────────

/// On-disk serialization used by dumps and backup bundles.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Json,
    Yaml,
}

impl StorageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            _ => None,
        }
    }

    pub(crate) fn encode(self, rows: &[Value]) -> Result<Vec<u8>, StorageError> {
        match self {
            Self::Json => serde_json::to_vec_pretty(rows)
                .map_err(|e| StorageError::Serialization(e.to_string())),
            Self::Yaml => serde_yaml::to_string(rows)
                .map(String::into_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string())),
        }
    }

    pub(crate) fn decode(self, bytes: &[u8]) -> Result<Vec<Value>, StorageError> {
        match self {
            Self::Json => {
                serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
            }
            Self::Yaml => {
                serde_yaml::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
            }
        }
    }
}

/// A request from the engine to be seeded from disk before services start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupImport {
    pub dir: PathBuf,
    pub format: StorageFormat,
}

// ── Contract ────────────────────────────────────────────────────────

/// A persistence engine. Implementations must be safe to share across
/// tasks; every method may block on engine I/O.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn find(
        &self,
        collection: Collection,
        filters: &[Filter],
        pagination: &Pagination,
    ) -> Result<FindResult, StorageError>;

    /// First match in default order, or [`StorageError::NoDocuments`].
    async fn find_one(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<Value, StorageError>;

    /// Fails with [`StorageError::Conflict`] when the id already exists.
    async fn insert(&self, collection: Collection, document: Value) -> Result<(), StorageError>;

    /// Replace every matching document. Returns how many were replaced;
    /// zero matches is not an error.
    async fn update(
        &self,
        collection: Collection,
        document: Value,
        filters: &[Filter],
    ) -> Result<u64, StorageError>;

    /// Replace the first match or insert. An empty filter matches by id.
    async fn upsert(
        &self,
        collection: Collection,
        document: Value,
        filters: &[Filter],
    ) -> Result<(), StorageError>;

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64, StorageError>;

    async fn pause(&self) -> Result<(), StorageError>;
    async fn resume(&self) -> Result<(), StorageError>;
    async fn clear_database(&self) -> Result<(), StorageError>;

    /// Where to seed from at boot, if the engine wants seeding.
    fn startup_import(&self) -> Option<StartupImport>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Read the `id` string of a document.
pub fn document_id(document: &Value) -> Option<&str> {
    document.get("id").and_then(Value::as_str)
}
