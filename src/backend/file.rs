//! JSON-file backend.
//!
//! The file holds one JSON object mapping keys to values. Several handles
//! opened on the same path (in this or other processes) act as separate
//! instances: writes go through a temp file and an atomic rename, and each
//! handle notices foreign writes by comparing a SHA-256 digest of the file,
//! either on its own reads/writes or from the polling watcher.

use super::{KvBackend, StorageChange, StorageScope, CHANGE_CHANNEL_CAPACITY};
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Last state of the file this handle knows about
struct Known {
    digest: String,
    values: Map<String, Value>,
}

struct Inner {
    path: PathBuf,
    scope: StorageScope,
    changes: broadcast::Sender<StorageChange>,
    known: Mutex<Known>,
}

#[derive(Clone)]
pub struct FileBackend {
    inner: Arc<Inner>,
}

fn digest_of(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

async fn read_file(path: &Path) -> Result<(String, Map<String, Value>)> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let digest = digest_of(&bytes);
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok((digest, Map::new()));
    }
    let values = serde_json::from_slice::<Map<String, Value>>(&bytes).map_err(|e| {
        Error::Backend(format!("{} is not a JSON object: {}", path.display(), e))
    })?;
    Ok((digest, values))
}

impl FileBackend {
    /// Open (or lazily create) the storage file at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_scope(path, StorageScope::Sync).await
    }

    pub async fn open_with_scope(path: impl Into<PathBuf>, scope: StorageScope) -> Result<Self> {
        let path = path.into();
        let (digest, values) = read_file(&path).await?;
        log::debug!("Opened file backend at {} ({} keys)", path.display(), values.len());
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                scope,
                changes,
                known: Mutex::new(Known { digest, values }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Re-read the file and announce every key that changed since this
    /// handle last looked. Returns the number of announced changes.
    pub async fn poll(&self) -> Result<usize> {
        let mut known = self.inner.known.lock().await;
        self.refresh(&mut known).await
    }

    /// Poll the file every `interval` until all handles are dropped
    pub fn spawn_watcher(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else { break };
                let handle = FileBackend { inner };
                if let Err(e) = handle.poll().await {
                    log::warn!("File backend poll failed: {}", e);
                }
            }
            log::debug!("File backend watcher stopped");
        })
    }

    async fn refresh(&self, known: &mut Known) -> Result<usize> {
        let (digest, values) = read_file(&self.inner.path).await?;
        if digest == known.digest {
            return Ok(0);
        }

        let mut announced = 0;
        for (key, new_value) in &values {
            let old_value = known.values.get(key);
            if old_value != Some(new_value) {
                self.announce(key, old_value.cloned(), Some(new_value.clone()));
                announced += 1;
            }
        }
        for (key, old_value) in &known.values {
            if !values.contains_key(key) {
                self.announce(key, Some(old_value.clone()), None);
                announced += 1;
            }
        }
        known.digest = digest;
        known.values = values;
        Ok(announced)
    }

    fn announce(&self, key: &str, old_value: Option<Value>, new_value: Option<Value>) {
        let _ = self.inner.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
            scope: self.inner.scope,
        });
    }

    async fn write_key(&self, key: &str, new_value: Option<Value>) -> Result<()> {
        let mut known = self.inner.known.lock().await;
        // Pick up (and announce) foreign writes first so they are not
        // mistaken for ours below.
        self.refresh(&mut known).await?;

        let mut values = known.values.clone();
        let old_value = match &new_value {
            Some(v) => values.insert(key.to_string(), v.clone()),
            None => values.remove(key),
        };
        if old_value.is_none() && new_value.is_none() {
            return Ok(());
        }

        let bytes = serde_json::to_vec_pretty(&values)?;
        self.replace_file(&bytes).await?;

        known.digest = digest_of(&bytes);
        known.values = values;
        drop(known);

        self.announce(key, old_value, new_value);
        Ok(())
    }

    async fn replace_file(&self, bytes: &[u8]) -> Result<()> {
        let path = &self.inner.path;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "storage".to_string());
        let tmp = path.with_file_name(format!(
            ".{}.{}.{}.tmp",
            file_name,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move {
            let mut known = self.inner.known.lock().await;
            self.refresh(&mut known).await?;
            Ok(known.values.get(key).cloned())
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_key(key, Some(value)))
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_key(key, None))
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.inner.changes.subscribe()
    }

    fn scope(&self) -> StorageScope {
        self.inner.scope
    }
}
