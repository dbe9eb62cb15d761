//! Process-wide registry of identifiers whose ingestion is in flight
//!
//! Created empty at startup and shared behind an `Arc`. All access goes
//! through the methods below; the set itself is never exposed.

use dashmap::DashSet;
use std::sync::Arc;

use crate::metrics::PENDING_ASSETS;
use crate::models::Identifier;

#[derive(Debug, Default)]
pub struct PendingRegistry {
    pending: DashSet<Identifier>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the pending set. Returns false if it was already there.
    pub fn mark_pending(&self, id: &Identifier) -> bool {
        let inserted = self.pending.insert(id.clone());
        if inserted {
            PENDING_ASSETS.inc();
        }
        inserted
    }

    /// Remove `id` from the pending set. Returns false if it was not pending.
    pub fn clear_pending(&self, id: &Identifier) -> bool {
        let removed = self.pending.remove(id).is_some();
        if removed {
            PENDING_ASSETS.dec();
        }
        removed
    }

    pub fn is_pending(&self, id: &Identifier) -> bool {
        self.pending.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Mark `id` pending and return a guard that clears it when dropped
    pub fn begin(self: &Arc<Self>, id: Identifier) -> PendingGuard {
        self.mark_pending(&id);
        PendingGuard {
            registry: Arc::clone(self),
            id,
        }
    }
}

/// Clears the pending flag on drop, so completion, failure, timeout and
/// panic all release the identifier exactly once.
#[derive(Debug)]
pub struct PendingGuard {
    registry: Arc<PendingRegistry>,
    id: Identifier,
}

impl PendingGuard {
    pub fn id(&self) -> &Identifier {
        &self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.registry.clear_pending(&self.id);
        tracing::debug!(image_id = %self.id, "pending flag cleared");
    }
}
