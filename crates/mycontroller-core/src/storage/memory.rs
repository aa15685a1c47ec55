// ── In-memory storage engine ──
//
// Collections live in memory, one `RwLock` each, keyed by document id so
// the default `id asc` order comes for free. Documents are cloned on the
// way in and out. A background task dumps every collection to disk at a
// fixed interval; the host seeds the engine from that dump at boot.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dump::write_dump;
use super::filter::{CompiledFilters, sort_documents};
use super::{
    Filter, FindResult, Pagination, StartupImport, Storage, StorageError, StorageFormat,
    document_id,
};
use crate::model::Collection;

/// Dump behaviour of the in-memory engine.
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    pub dump_enabled: bool,
    pub dump_interval: Duration,
    pub dump_dir: PathBuf,
    /// Every format is written on each dump; the first is read at boot.
    pub dump_formats: Vec<StorageFormat>,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            dump_enabled: true,
            dump_interval: Duration::from_secs(60),
            dump_dir: PathBuf::from("mc_data/storage/memory"),
            dump_formats: vec![StorageFormat::Yaml],
        }
    }
}

type Rows = BTreeMap<String, Value>;

pub struct MemoryStorage {
    config: MemoryStorageConfig,
    collections: DashMap<Collection, Arc<RwLock<Rows>>>,
    paused: AtomicBool,
    /// Serialises dumps against each other and against `clear_database`.
    dump_lock: Mutex<()>,
    cancel: CancellationToken,
    dump_task: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryStorage {
    /// Create the engine and, when enabled, start the periodic dump task.
    pub fn start(config: MemoryStorageConfig) -> Arc<Self> {
        let storage = Arc::new(Self {
            config,
            collections: DashMap::new(),
            paused: AtomicBool::new(false),
            dump_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
            dump_task: Mutex::new(None),
        });

        if storage.config.dump_enabled && !storage.config.dump_interval.is_zero() {
            let handle = tokio::spawn(dump_task(
                Arc::downgrade(&storage),
                storage.config.dump_interval,
                storage.cancel.clone(),
            ));
            if let Ok(mut slot) = storage.dump_task.try_lock() {
                *slot = Some(handle);
            }
        }
        info!(
            dump_dir = %storage.config.dump_dir.display(),
            interval = ?storage.config.dump_interval,
            "memory storage started"
        );
        storage
    }

    fn rows(&self, collection: Collection) -> Arc<RwLock<Rows>> {
        Arc::clone(self.collections.entry(collection).or_default().value())
    }

    fn handles(&self) -> Vec<(Collection, Arc<RwLock<Rows>>)> {
        self.collections
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Write every collection in every configured format. Skipped while
    /// paused or when dumping is disabled.
    pub async fn dump(&self) -> Result<(), StorageError> {
        if !self.config.dump_enabled || self.is_paused() {
            debug!("dump skipped");
            return Ok(());
        }
        let _guard = self.dump_lock.lock().await;

        for (collection, rows) in self.handles() {
            let snapshot: Vec<Value> = rows.read().await.values().cloned().collect();
            for format in &self.config.dump_formats {
                write_dump(&self.config.dump_dir, collection.as_ref(), &snapshot, *format).await?;
            }
        }
        debug!(dir = %self.config.dump_dir.display(), "memory storage dumped");
        Ok(())
    }
}

async fn dump_task(
    storage: std::sync::Weak<MemoryStorage>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(storage) = storage.upgrade() else { break };
                if let Err(e) = storage.dump().await {
                    warn!(error = %e, "periodic dump failed");
                }
            }
        }
    }
}

fn paginate(mut matched: Vec<Value>, pagination: &Pagination) -> FindResult {
    if !pagination.sort_by.is_empty() {
        sort_documents(&mut matched, &pagination.sort_by);
    }
    let count = matched.len() as u64;
    let offset = usize::try_from(pagination.offset.max(0)).unwrap_or(usize::MAX);
    let data: Vec<Value> = if pagination.limit > 0 {
        let limit = usize::try_from(pagination.limit).unwrap_or(usize::MAX);
        matched.into_iter().skip(offset).take(limit).collect()
    } else {
        matched.into_iter().skip(offset).collect()
    };
    FindResult {
        count,
        limit: pagination.limit,
        offset: pagination.offset,
        data,
    }
}

fn require_id(document: &Value) -> Result<String, StorageError> {
    match document_id(document) {
        Some(id) if !id.is_empty() => Ok(id.to_owned()),
        _ => Err(StorageError::InvalidDocument {
            message: "document has no id".into(),
        }),
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn find(
        &self,
        collection: Collection,
        filters: &[Filter],
        pagination: &Pagination,
    ) -> Result<FindResult, StorageError> {
        let filters = CompiledFilters::compile(filters)?;
        let rows = self.rows(collection);
        let matched: Vec<Value> = {
            let rows = rows.read().await;
            if filters.is_empty() {
                rows.values().cloned().collect()
            } else {
                rows.values().filter(|d| filters.matches(d)).cloned().collect()
            }
        };
        Ok(paginate(matched, pagination))
    }

    async fn find_one(
        &self,
        collection: Collection,
        filters: &[Filter],
    ) -> Result<Value, StorageError> {
        let filters = CompiledFilters::compile(filters)?;
        let rows = self.rows(collection);
        let rows = rows.read().await;
        rows.values()
            .find(|d| filters.matches(d))
            .cloned()
            .ok_or_else(|| StorageError::NoDocuments {
                collection: collection.to_string(),
            })
    }

    async fn insert(&self, collection: Collection, document: Value) -> Result<(), StorageError> {
        let id = require_id(&document)?;
        let rows = self.rows(collection);
        let mut rows = rows.write().await;
        if rows.contains_key(&id) {
            return Err(StorageError::Conflict {
                collection: collection.to_string(),
                id,
            });
        }
        rows.insert(id, document);
        Ok(())
    }

    async fn update(
        &self,
        collection: Collection,
        document: Value,
        filters: &[Filter],
    ) -> Result<u64, StorageError> {
        let filters = CompiledFilters::compile(filters)?;
        let rows = self.rows(collection);
        let mut rows = rows.write().await;
        let mut updated = 0;
        for (id, existing) in rows.iter_mut() {
            if filters.matches(existing) {
                let mut replacement = document.clone();
                if let Some(map) = replacement.as_object_mut() {
                    map.insert("id".into(), Value::String(id.clone()));
                }
                *existing = replacement;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn upsert(
        &self,
        collection: Collection,
        document: Value,
        filters: &[Filter],
    ) -> Result<(), StorageError> {
        let id = require_id(&document)?;
        let by_id;
        let filters = if filters.is_empty() {
            by_id = [Filter::eq("id", id.clone())];
            CompiledFilters::compile(&by_id)?
        } else {
            CompiledFilters::compile(filters)?
        };

        let rows = self.rows(collection);
        let mut rows = rows.write().await;
        let existing = rows
            .iter()
            .find(|(_, d)| filters.matches(d))
            .map(|(key, _)| key.clone());
        if let Some(key) = existing {
            rows.remove(&key);
        }
        rows.insert(id, document);
        Ok(())
    }

    async fn delete(&self, collection: Collection, filters: &[Filter]) -> Result<u64, StorageError> {
        let filters = CompiledFilters::compile(filters)?;
        let rows = self.rows(collection);
        let mut rows = rows.write().await;
        let before = rows.len();
        rows.retain(|_, d| !filters.matches(d));
        Ok((before - rows.len()) as u64)
    }

    async fn pause(&self) -> Result<(), StorageError> {
        self.paused.store(true, Ordering::Release);
        debug!("memory storage paused");
        Ok(())
    }

    async fn resume(&self) -> Result<(), StorageError> {
        self.paused.store(false, Ordering::Release);
        debug!("memory storage resumed");
        Ok(())
    }

    async fn clear_database(&self) -> Result<(), StorageError> {
        let _guard = self.dump_lock.lock().await;
        for (_, rows) in self.handles() {
            rows.write().await.clear();
        }
        let dir = &self.config.dump_dir;
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(dir, e)),
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::io(dir, e))?;
        info!(dir = %dir.display(), "memory storage cleared");
        Ok(())
    }

    fn startup_import(&self) -> Option<StartupImport> {
        let format = self.config.dump_formats.first().copied()?;
        Some(StartupImport {
            dir: self.config.dump_dir.clone(),
            format,
        })
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.cancel.cancel();
        if let Some(handle) = self.dump_task.lock().await.take() {
            let _ = handle.await;
        }
        self.dump().await?;
        info!("memory storage closed");
        Ok(())
    }
}
