//! Thread persistence.
//!
//! `MemoryThreadStore` keeps everything in a map. `FileThreadStore` writes one
//! pretty-printed JSON document per thread (`{dir}/{thread_id}.json`) through
//! a temp file and rename, caching loaded threads in memory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentos_common::ThreadsConfig;
use agentos_events::Event;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::thread::{Thread, ThreadStatus};

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>, StoreError>;

    /// Create a thread. Fails with `AlreadyExists` if the id is taken.
    async fn create(
        &self,
        thread_id: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Thread, StoreError>;

    async fn append_event(&self, thread_id: &str, event: Event) -> Result<(), StoreError>;

    /// Threads ordered by `updated_at`, newest first.
    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError>;

    async fn archive(&self, thread_id: &str) -> Result<Thread, StoreError>;

    /// Active threads whose summary or recent results mention `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError>;

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: Map<String, Value>,
    ) -> Result<Thread, StoreError>;
}

/// Build the store `[threads]` asks for.
pub fn store_from_config(config: &ThreadsConfig) -> Arc<dyn ThreadStore> {
    if config.persist {
        Arc::new(FileThreadStore::new(&config.dir))
    } else {
        Arc::new(MemoryThreadStore::new())
    }
}

fn newest_first(mut threads: Vec<Thread>) -> Vec<Thread> {
    threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    threads
}

fn search_in(threads: Vec<Thread>, query: &str, limit: usize) -> Vec<Thread> {
    newest_first(threads)
        .into_iter()
        .filter(|t| t.is_active() && t.matches(query))
        .take(limit)
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryThreadStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<String, Thread>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        Ok(self.threads.lock().await.get(thread_id).cloned())
    }

    async fn create(
        &self,
        thread_id: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Thread, StoreError> {
        let thread = Thread::create(thread_id, summary);
        let mut threads = self.threads.lock().await;
        if threads.contains_key(&thread.thread_id) {
            return Err(StoreError::AlreadyExists(thread.thread_id));
        }
        threads.insert(thread.thread_id.clone(), thread.clone());
        info!(thread_id = %thread.thread_id, "Created thread");
        Ok(thread)
    }

    async fn append_event(&self, thread_id: &str, event: Event) -> Result<(), StoreError> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        thread.push_event(event);
        Ok(())
    }

    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError> {
        let threads = self.threads.lock().await;
        Ok(newest_first(
            threads
                .values()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn archive(&self, thread_id: &str) -> Result<Thread, StoreError> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        if thread.archive() {
            info!(thread_id = %thread_id, "Archived thread");
        }
        Ok(thread.clone())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let threads: Vec<Thread> = self.threads.lock().await.values().cloned().collect();
        Ok(search_in(threads, query, limit))
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: Map<String, Value>,
    ) -> Result<Thread, StoreError> {
        let mut threads = self.threads.lock().await;
        let thread = threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        thread.merge_metadata(patch);
        Ok(thread.clone())
    }
}

// ---------------------------------------------------------------------------
// FileThreadStore
// ---------------------------------------------------------------------------

pub struct FileThreadStore {
    dir: PathBuf,
    // Held across disk IO so writes to one thread never interleave.
    cache: Mutex<HashMap<String, Thread>>,
}

impl FileThreadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, thread_id: &str) -> Result<PathBuf, StoreError> {
        let valid = !thread_id.is_empty()
            && thread_id != "."
            && thread_id != ".."
            && !thread_id.contains(['/', '\\']);
        if !valid {
            return Err(StoreError::InvalidId(thread_id.to_string()));
        }
        Ok(self.dir.join(format!("{thread_id}.json")))
    }

    /// Cached thread, else the one on disk (which is then cached).
    async fn load<'a>(
        &self,
        cache: &'a mut HashMap<String, Thread>,
        thread_id: &str,
    ) -> Result<Option<&'a mut Thread>, StoreError> {
        if !cache.contains_key(thread_id) {
            let path = self.path_for(thread_id)?;
            match read_thread(path).await? {
                Some(thread) => {
                    debug!(thread_id = %thread_id, "Loaded thread from disk");
                    cache.insert(thread_id.to_string(), thread);
                }
                None => return Ok(None),
            }
        }
        Ok(cache.get_mut(thread_id))
    }

    async fn save(&self, thread: &Thread) -> Result<(), StoreError> {
        let path = self.path_for(&thread.thread_id)?;
        let body = serde_json::to_vec_pretty(thread)?;
        tokio::task::spawn_blocking(move || write_atomic(&path, &body)).await?
    }
}

#[async_trait]
impl ThreadStore for FileThreadStore {
    async fn get(&self, thread_id: &str) -> Result<Option<Thread>, StoreError> {
        let mut cache = self.cache.lock().await;
        Ok(self.load(&mut cache, thread_id).await?.map(|t| t.clone()))
    }

    async fn create(
        &self,
        thread_id: Option<&str>,
        summary: Option<&str>,
    ) -> Result<Thread, StoreError> {
        let thread = Thread::create(thread_id, summary);
        let mut cache = self.cache.lock().await;
        if cache.contains_key(&thread.thread_id)
            || self.path_for(&thread.thread_id)?.exists()
        {
            return Err(StoreError::AlreadyExists(thread.thread_id));
        }
        self.save(&thread).await?;
        cache.insert(thread.thread_id.clone(), thread.clone());
        info!(thread_id = %thread.thread_id, dir = %self.dir.display(), "Created thread");
        Ok(thread)
    }

    async fn append_event(&self, thread_id: &str, event: Event) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().await;
        let thread = self
            .load(&mut cache, thread_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        let mut next = thread.clone();
        next.push_event(event);
        self.save(&next).await?;
        *thread = next;
        Ok(())
    }

    async fn list(&self, status: Option<ThreadStatus>) -> Result<Vec<Thread>, StoreError> {
        let mut cache = self.cache.lock().await;
        for thread_id in list_thread_ids(self.dir.clone()).await? {
            if let Err(e) = self.load(&mut cache, &thread_id).await {
                error!(thread_id = %thread_id, error = %e, "Skipping unreadable thread");
            }
        }
        Ok(newest_first(
            cache
                .values()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn archive(&self, thread_id: &str) -> Result<Thread, StoreError> {
        let mut cache = self.cache.lock().await;
        let thread = self
            .load(&mut cache, thread_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        let mut next = thread.clone();
        if next.archive() {
            self.save(&next).await?;
            info!(thread_id = %thread_id, "Archived thread");
        }
        *thread = next.clone();
        Ok(next)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Thread>, StoreError> {
        let threads = self.list(Some(ThreadStatus::Active)).await?;
        Ok(search_in(threads, query, limit))
    }

    async fn update_metadata(
        &self,
        thread_id: &str,
        patch: Map<String, Value>,
    ) -> Result<Thread, StoreError> {
        let mut cache = self.cache.lock().await;
        let thread = self
            .load(&mut cache, thread_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(thread_id.to_string()))?;
        let mut next = thread.clone();
        next.merge_metadata(patch);
        self.save(&next).await?;
        *thread = next.clone();
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Disk IO
// ---------------------------------------------------------------------------

async fn read_thread(path: PathBuf) -> Result<Option<Thread>, StoreError> {
    tokio::task::spawn_blocking(move || {
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt { path, source })
    })
    .await?
}

async fn list_thread_ids(dir: PathBuf) -> Result<Vec<String>, StoreError> {
    tokio::task::spawn_blocking(move || {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };
        Ok(entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != "json" {
                    return None;
                }
                path.file_stem()?.to_str().map(str::to_string)
            })
            .collect())
    })
    .await?
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}
