//! Persistent key-value backends shared by concurrently running instances
//!
//! A backend exposes async `get`/`set`/`remove` on JSON values and a change
//! stream. Every write, whichever handle made it, is announced on the stream
//! of every handle attached to the same underlying storage, so an instance
//! also sees its own writes echo back.

pub mod file;
pub mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use crate::Result;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::broadcast;

/// Capacity of the change broadcast channel before receivers start lagging
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Storage area a change happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageScope {
    /// Synchronised across every instance sharing the storage
    Sync,
    /// Visible to this machine only
    Local,
}

/// A change notification for a single key
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: String,
    pub old_value: Option<Value>,
    /// `None` when the key was removed
    pub new_value: Option<Value>,
    pub scope: StorageScope,
}

/// Key-value storage with change notifications.
///
/// Implementations must be cheap to share (`Arc`) and must announce every
/// successful write on the streams returned by [`KvBackend::subscribe`].
pub trait KvBackend: Send + Sync {
    /// Read a key; `Ok(None)` when it has never been set
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Value>>>;

    /// Write a key
    fn set<'a>(&'a self, key: &'a str, value: Value) -> BoxFuture<'a, Result<()>>;

    /// Remove a key; removing a missing key is not an error
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Subscribe to changes made through any handle of this storage
    fn subscribe(&self) -> broadcast::Receiver<StorageChange>;

    /// Scope announced by this backend's change notifications
    fn scope(&self) -> StorageScope {
        StorageScope::Sync
    }
}
