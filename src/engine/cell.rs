//! Self-healing artifact slot.
//!
//! An [`ArtifactCell`] holds one artifact in one of four states. A persisted
//! candidate is [`offer`](ArtifactCell::offer)ed unvalidated; the first
//! [`get_or_build`](ArtifactCell::get_or_build) validates it and either promotes it
//! or rebuilds. Builds run under a dedicated lock and produce a complete value that
//! is swapped in under the write lock, so readers only ever see a whole artifact.

use std::sync::{Arc, Mutex, RwLock};

use crate::error::{EngineError, Result};

enum Slot<T> {
    Absent,
    Loaded(Arc<T>),
    Invalid,
    Valid(Arc<T>),
}

/// Externally visible state of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Absent,
    /// Loaded from the store, not yet checked.
    Unvalidated,
    Invalid,
    Valid,
}

pub struct ArtifactCell<T> {
    name: &'static str,
    slot: RwLock<Slot<T>>,
    build_lock: Mutex<()>,
}

impl<T> ArtifactCell<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: RwLock::new(Slot::Absent),
            build_lock: Mutex::new(()),
        }
    }

    /// The validated artifact, if one is published.
    pub fn current(&self) -> Option<Arc<T>> {
        match &*self.read() {
            Slot::Valid(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    pub fn state(&self) -> ArtifactState {
        match &*self.read() {
            Slot::Absent => ArtifactState::Absent,
            Slot::Loaded(_) => ArtifactState::Unvalidated,
            Slot::Invalid => ArtifactState::Invalid,
            Slot::Valid(_) => ArtifactState::Valid,
        }
    }

    /// Place a persisted candidate in the cell. It is validated on next access.
    pub fn offer(&self, candidate: T) {
        let _build = self.lock_build();
        *self.write() = Slot::Loaded(Arc::new(candidate));
    }

    /// Mark the current value unusable. The next access rebuilds.
    pub fn invalidate(&self) {
        let _build = self.lock_build();
        let mut slot = self.write();
        if !matches!(*slot, Slot::Absent) {
            tracing::debug!(artifact = self.name, "artifact invalidated");
            *slot = Slot::Invalid;
        }
    }

    /// Return the validated artifact, validating a loaded candidate or building a new
    /// one as needed.
    ///
    /// `validate` gates both persisted candidates and freshly built values; a fresh
    /// build that fails validation is returned as an error rather than published.
    pub fn get_or_build<V, B>(&self, validate: V, build: B) -> Result<Arc<T>>
    where
        V: Fn(&T) -> Result<()>,
        B: FnOnce() -> Result<T>,
    {
        if let Some(value) = self.current() {
            return Ok(value);
        }

        let _build = self.lock_build();

        // Another caller may have finished a build while we waited.
        let pending = match &*self.read() {
            Slot::Valid(value) => return Ok(Arc::clone(value)),
            Slot::Loaded(value) => Some(Arc::clone(value)),
            Slot::Absent | Slot::Invalid => None,
        };

        if let Some(candidate) = pending {
            match validate(candidate.as_ref()) {
                Ok(()) => {
                    tracing::debug!(artifact = self.name, "persisted artifact accepted");
                    *self.write() = Slot::Valid(Arc::clone(&candidate));
                    return Ok(candidate);
                }
                Err(err) => {
                    tracing::warn!(artifact = self.name, reason = %err, "persisted artifact rejected, rebuilding");
                    *self.write() = Slot::Invalid;
                }
            }
        } else if matches!(*self.read(), Slot::Absent) {
            tracing::info!(artifact = self.name, "no persisted artifact, building");
        }

        let built = build()?;
        validate(&built).map_err(|err| {
            EngineError::Other(anyhow::anyhow!(
                "freshly built {} failed validation: {err}",
                self.name
            ))
        })?;

        let built = Arc::new(built);
        *self.write() = Slot::Valid(Arc::clone(&built));
        Ok(built)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Slot<T>> {
        self.slot.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Slot<T>> {
        self.slot.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_build(&self) -> std::sync::MutexGuard<'_, ()> {
        self.build_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
