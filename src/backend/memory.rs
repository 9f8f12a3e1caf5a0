//! In-process backend. Clones share storage, so each clone behaves like a
//! separate instance attached to the same synchronised store.

use super::{KvBackend, StorageChange, StorageScope, CHANGE_CHANNEL_CAPACITY};
use crate::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

struct Shared {
    values: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<StorageChange>,
    scope: StorageScope,
}

#[derive(Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_scope(StorageScope::Sync)
    }

    pub fn with_scope(scope: StorageScope) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                values: Mutex::new(HashMap::new()),
                changes,
                scope,
            }),
        }
    }

    /// Synchronous peek, handy for tests and diagnostics
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.shared
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn write(&self, key: &str, new_value: Option<Value>) {
        let old_value = {
            let mut values = self
                .shared
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match &new_value {
                Some(v) => values.insert(key.to_string(), v.clone()),
                None => values.remove(key),
            }
        };
        // No receivers is fine
        let _ = self.shared.changes.send(StorageChange {
            key: key.to_string(),
            old_value,
            new_value,
            scope: self.shared.scope,
        });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl KvBackend for MemoryBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>> {
        Box::pin(async move { Ok(self.snapshot(key)) })
    }

    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.write(key, Some(value));
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.write(key, None);
            Ok(())
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.shared.changes.subscribe()
    }

    fn scope(&self) -> StorageScope {
        self.shared.scope
    }
}
