//! Process-wide view of uploads that are currently in flight.
//!
//! The registry maps an [`UploadId`] to the cancellation token of the upload
//! running under it. It is constructed explicitly and shared through an `Arc`
//! by whoever composes the orchestrator, so tests get their own instance.

use crate::error::UploadError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Identifier of one logical upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UploadId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// Registry of active uploads and their cancellation handles.
#[derive(Default)]
pub struct ActiveUploadRegistry {
    entries: Mutex<HashMap<UploadId, Entry>>,
    next_generation: AtomicU64,
}

impl ActiveUploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an upload and return the guard that owns its entry.
    ///
    /// Fails with [`UploadError::AlreadyActive`] when the id is in flight.
    pub fn register(self: &Arc<Self>, id: UploadId) -> Result<Registration, UploadError> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        {
            let mut entries = self.entries.lock();
            if entries.contains_key(&id) {
                return Err(UploadError::AlreadyActive(id));
            }
            entries.insert(
                id,
                Entry {
                    generation,
                    token: token.clone(),
                },
            );
        }

        debug!(upload_id = %id, "Upload registered");

        Ok(Registration {
            registry: Arc::clone(self),
            id,
            generation,
            token,
        })
    }

    /// Signal cancellation and drop the entry.
    ///
    /// Returns `false` for unknown or already terminated ids.
    pub fn cancel(&self, id: &UploadId) -> bool {
        let entry = self.entries.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                debug!(upload_id = %id, "Upload cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Cancel every active upload, returning how many were signalled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        for (_, entry) in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn is_active(&self, id: &UploadId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<UploadId> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn release(&self, id: &UploadId, generation: u64) {
        let mut entries = self.entries.lock();
        // A cancelled entry may already be gone and the id reused since.
        if entries.get(id).map(|e| e.generation) == Some(generation) {
            entries.remove(id);
            debug!(upload_id = %id, "Upload released");
        }
    }
}

/// Ownership of one registry entry. Dropping it removes the entry.
pub struct Registration {
    registry: Arc<ActiveUploadRegistry>,
    id: UploadId,
    generation: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn id(&self) -> UploadId {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.release(&self.id, self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_release_on_drop() {
        let registry = Arc::new(ActiveUploadRegistry::new());
        let id = UploadId::new();

        let registration = registry.register(id).unwrap();
        assert!(registry.is_active(&id));
        assert_eq!(registry.len(), 1);

        drop(registration);
        assert!(!registry.is_active(&id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = Arc::new(ActiveUploadRegistry::new());
        let id = UploadId::new();

        let _first = registry.register(id).unwrap();
        match registry.register(id) {
            Err(UploadError::AlreadyActive(dup)) => assert_eq!(dup, id),
            other => panic!("expected AlreadyActive, got {:?}", other.map(|r| r.id())),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cancel_signals_token_and_removes_entry() {
        let registry = Arc::new(ActiveUploadRegistry::new());
        let id = UploadId::new();
        let registration = registry.register(id).unwrap();

        assert!(registry.cancel(&id));
        assert!(registration.token().is_cancelled());
        assert!(!registry.is_active(&id));

        // Second cancel is a no-op
        assert!(!registry.cancel(&id));
    }

    #[test]
    fn test_cancel_unknown_is_noop() {
        let registry = ActiveUploadRegistry::new();
        assert!(!registry.cancel(&UploadId::new()));
    }

    #[test]
    fn test_stale_guard_does_not_remove_new_entry() {
        let registry = Arc::new(ActiveUploadRegistry::new());
        let id = UploadId::new();

        let old = registry.register(id).unwrap();
        registry.cancel(&id);
        let new = registry.register(id).unwrap();

        drop(old);
        assert!(registry.is_active(&id));
        assert!(!new.token().is_cancelled());

        drop(new);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_all() {
        let registry = Arc::new(ActiveUploadRegistry::new());
        let a = registry.register(UploadId::new()).unwrap();
        let b = registry.register(UploadId::new()).unwrap();

        assert_eq!(registry.cancel_all(), 2);
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_registrations() {
        let registry = Arc::new(ActiveUploadRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let id = UploadId::new();
                        let registration = registry.register(id).unwrap();
                        assert!(registry.is_active(&id));
                        drop(registration);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
