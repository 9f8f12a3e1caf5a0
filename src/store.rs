//! The preset store.
//!
//! Owns the in-memory preset list of one instance and keeps it consistent
//! with a backend that other instances write to at any time. Local edits are
//! applied to memory synchronously, rendered, then persisted as a full list.
//! Remote edits only ever arrive through [`PresetStore::on_remote_change`],
//! which never writes back.
//!
//! Writes from one instance are serialised and always carry the newest
//! in-memory list, so a retried write never undoes a later local edit.
//!
//! Across instances the backend is last-write-wins: two instances writing
//! their full lists at nearly the same time can drop each other's edits.
//! Startup reconciliation is the only guard, and it only protects edits made
//! in this instance while its initial load is in flight.

use crate::backend::{KvBackend, StorageChange, StorageScope};
use crate::preset::default_presets;
use crate::{Config, Error, Preset, PresetList, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

type OnRenderHandler = Arc<dyn Fn(&[Preset]) + Send + Sync>;
type OnDuplicateHandler = Arc<dyn Fn(&Preset) + Send + Sync>;

/// Options for [`PresetStore::add`]
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Fire the duplicate handler when the preset already exists
    pub notify_duplicate: bool,
}

impl AddOptions {
    pub fn notify_duplicate() -> Self {
        Self {
            notify_duplicate: true,
        }
    }
}

#[derive(Default)]
struct State {
    presets: PresetList,
    initialized: bool,
    /// Bumped by every local mutation
    revision: u64,
    /// Highest revision known to be in the backend
    persisted: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

pub struct PresetStore {
    backend: Arc<dyn KvBackend>,
    key: String,
    write_attempts: u32,
    retry_delay: Duration,
    state: Mutex<State>,
    writer: AsyncMutex<()>,
    ready: watch::Sender<bool>,
    render_gate: Mutex<()>,
    on_render: Mutex<Option<OnRenderHandler>>,
    on_duplicate: Mutex<Option<OnDuplicateHandler>>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PresetStore {
    pub fn new(backend: Arc<dyn KvBackend>, config: &Config) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            backend,
            key: config.storage_key.clone(),
            write_attempts: config.write_attempts.max(1),
            retry_delay: config.write_retry_delay(),
            state: Mutex::new(State::default()),
            writer: AsyncMutex::new(()),
            ready,
            render_gate: Mutex::new(()),
            on_render: Mutex::new(None),
            on_duplicate: Mutex::new(None),
        }
    }

    /// Register a callback receiving the full list after every change,
    /// local or remote.
    ///
    /// Renders are serialised and always show the list as it is when the
    /// callback runs. The callback must not mutate the store.
    pub fn on_render<F>(&self, cb: F)
    where
        F: Fn(&[Preset]) + Send + Sync + 'static,
    {
        *locked(&self.on_render) = Some(Arc::new(cb));
    }

    /// Remove previously registered on_render callback if any
    pub fn clear_on_render(&self) {
        *locked(&self.on_render) = None;
    }

    /// Register a callback for rejected duplicate adds (only fired when the
    /// add asked for it)
    pub fn on_duplicate<F>(&self, cb: F)
    where
        F: Fn(&Preset) + Send + Sync + 'static,
    {
        *locked(&self.on_duplicate) = Some(Arc::new(cb));
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Snapshot of the current in-memory list
    pub fn presets(&self) -> PresetList {
        locked(&self.state).presets.clone()
    }

    pub fn len(&self) -> usize {
        locked(&self.state).presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        locked(&self.state).initialized
    }

    /// Resolves once [`PresetStore::reconcile_on_start`] has committed
    pub async fn initialized(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in self, so this cannot fail while we are borrowed
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Read the persisted list. `Ok(None)` means the key was never set (or
    /// does not hold a list), which is different from an empty list.
    pub async fn load(&self) -> Result<Option<PresetList>> {
        let value = self.backend.get(&self.key).await?;
        Ok(value.as_ref().and_then(PresetList::from_value))
    }

    /// Append a preset. Returns `false` without side effects for zero sizes
    /// and for presets already in the list.
    ///
    /// The list is updated and rendered before this first yields; the
    /// returned future completes once the write has been attempted. Write
    /// failures are logged and retried, never returned.
    pub async fn add(&self, w: u32, h: u32, options: AddOptions) -> bool {
        let preset = match Preset::new(w, h) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("Rejected preset: {}", e);
                return false;
            }
        };

        let revision = {
            let mut state = locked(&self.state);
            if state.presets.push_unique(preset) {
                Some(state.bump())
            } else {
                None
            }
        };

        let Some(revision) = revision else {
            log::debug!("{}", Error::DuplicatePreset(preset));
            if options.notify_duplicate {
                let handler = locked(&self.on_duplicate).clone();
                if let Some(cb) = handler {
                    cb(&preset);
                }
            }
            return false;
        };

        self.render();
        let _ = self.persist(revision, |state| state.presets.clone()).await;
        true
    }

    /// Remove the entry at `index`; out-of-range indices are ignored.
    pub async fn remove(&self, index: usize) {
        let revision = {
            let mut state = locked(&self.state);
            match state.presets.remove(index) {
                Some(removed) => {
                    log::debug!("Removed preset {} at {}", removed, index);
                    state.bump()
                }
                None => return,
            }
        };
        self.render();
        let _ = self.persist(revision, |state| state.presets.clone()).await;
    }

    /// Replace the entry at `index`, returning the previous preset.
    pub async fn edit(&self, index: usize, preset: Preset) -> Result<Preset> {
        let (previous, revision) = {
            let mut state = locked(&self.state);
            let previous = state.presets.replace(index, preset)?;
            (previous, state.bump())
        };
        self.render();
        let _ = self.persist(revision, |state| state.presets.clone()).await;
        Ok(previous)
    }

    /// The preset at `index`; the store is not modified.
    pub fn apply(&self, index: usize) -> Result<Preset> {
        let state = locked(&self.state);
        state.presets.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: state.presets.len(),
        })
    }

    /// Load the persisted list (seeding the defaults when the key was never
    /// set) and merge in whatever reached memory while the load was in
    /// flight, preserving order and dropping duplicates.
    ///
    /// Entries merged from memory are not written again: local adds already
    /// persisted themselves. The seeding write is the exception, it carries
    /// the defaults followed by any local entries present when it runs.
    pub async fn reconcile_on_start(&self) -> Result<()> {
        let mut base = match self.load().await? {
            Some(list) => {
                log::debug!("Loaded {} preset(s) from backend", list.len());
                list
            }
            None => {
                let seeded = PresetList::from(default_presets());
                log::info!("No presets stored under {:?}, seeding defaults", self.key);
                let revision = locked(&self.state).bump();
                let _ = self
                    .persist(revision, |state| {
                        let mut list = seeded.clone();
                        list.extend_unique(state.presets.as_slice().iter().copied());
                        list
                    })
                    .await;
                seeded
            }
        };

        {
            let mut state = locked(&self.state);
            let before = base.len();
            base.extend_unique(state.presets.as_slice().iter().copied());
            if base.len() > before {
                log::debug!("Merged {} preset(s) added during load", base.len() - before);
            }
            state.presets = base;
            state.initialized = true;
        }
        self.ready.send_replace(true);
        self.render();
        Ok(())
    }

    /// Replace the in-memory list with one observed in the backend. Never
    /// writes, so an instance's own writes echoing back are harmless.
    pub fn on_remote_change(&self, new_list: PresetList) {
        locked(&self.state).presets = new_list;
        self.render();
    }

    /// Re-read the key and apply it exactly like a change notification.
    /// Returns whether the in-memory list was replaced.
    pub async fn resync(&self) -> Result<bool> {
        let value = self.backend.get(&self.key).await?;
        Ok(self.handle_change(&StorageChange {
            key: self.key.clone(),
            old_value: None,
            new_value: value,
            scope: self.backend.scope(),
        }))
    }

    /// Apply a backend notification if it concerns this store's key in the
    /// synchronised scope. Returns whether it was applied.
    pub fn handle_change(&self, change: &StorageChange) -> bool {
        if change.scope != StorageScope::Sync || change.key != self.key {
            return false;
        }
        match &change.new_value {
            None => {
                log::info!("Preset key {:?} removed externally", self.key);
                self.on_remote_change(PresetList::new());
                true
            }
            Some(value) => match PresetList::from_value(value) {
                Some(list) => {
                    self.on_remote_change(list);
                    true
                }
                None => {
                    log::warn!("Ignoring non-list value stored under {:?}", self.key);
                    false
                }
            },
        }
    }

    /// Follow the backend's change stream until it closes.
    ///
    /// Subscribes immediately, so call this before
    /// [`PresetStore::reconcile_on_start`] to not miss early changes.
    pub fn spawn_sync(self: &Arc<Self>) -> JoinHandle<()> {
        let mut rx = self.backend.subscribe();
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => {
                        store.handle_change(&change);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} storage change(s), re-reading presets", skipped);
                        if let Err(e) = store.resync().await {
                            log::error!("Re-reading presets failed: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            log::debug!("Preset sync stopped");
        })
    }

    fn render(&self) {
        let _gate = locked(&self.render_gate);
        let handler = locked(&self.on_render).clone();
        if let Some(cb) = handler {
            let presets = self.presets();
            cb(presets.as_slice());
        }
    }

    /// Write the list `compose` builds from the current state, on behalf of
    /// the mutation that produced `revision`. Each attempt composes afresh,
    /// and the write is skipped once a newer revision has reached the backend.
    async fn persist<F>(&self, revision: u64, compose: F) -> Result<()>
    where
        F: Fn(&State) -> PresetList,
    {
        let _writer = self.writer.lock().await;
        let mut attempt = 0;
        loop {
            let (value, current) = {
                let state = locked(&self.state);
                if state.persisted >= revision {
                    log::debug!("Revision {} already superseded in backend", revision);
                    return Ok(());
                }
                (compose(&state).to_value(), state.revision)
            };
            attempt += 1;
            match self.backend.set(&self.key, value).await {
                Ok(()) => {
                    let mut state = locked(&self.state);
                    state.persisted = state.persisted.max(current);
                    return Ok(());
                }
                Err(e) if attempt < self.write_attempts => {
                    log::warn!(
                        "Writing presets failed (attempt {}/{}): {}",
                        attempt,
                        self.write_attempts,
                        e
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    let err = Error::BackendWriteFailed {
                        attempts: attempt,
                        reason: e.to_string(),
                    };
                    log::error!("{}", err);
                    return Err(err);
                }
            }
        }
    }
}
