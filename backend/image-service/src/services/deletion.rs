/// Removal of an identifier and every blob stored under it
use std::sync::Arc;
use tracing::info;

use crate::error::{AppError, Result};
use crate::models::Identifier;
use crate::services::pending::PendingRegistry;
use crate::services::storage::VariantStore;

#[derive(Clone)]
pub struct DeletionHandler {
    registry: Arc<PendingRegistry>,
    store: Arc<VariantStore>,
    retry_after_secs: u64,
}

impl DeletionHandler {
    pub fn new(registry: Arc<PendingRegistry>, store: Arc<VariantStore>, retry_after_secs: u64) -> Self {
        Self {
            registry,
            store,
            retry_after_secs,
        }
    }

    /// Delete everything stored for `id`.
    ///
    /// A pending identifier still has a live pipeline run that may write
    /// after us, so it is refused with `Conflict`. Once an identifier leaves
    /// the pending set no writer for it can exist any more.
    pub async fn delete(&self, id: &Identifier) -> Result<()> {
        if self.registry.is_pending(id) {
            return Err(AppError::Conflict {
                message: format!("image {id} is still being processed"),
                retry_after: self.retry_after_secs,
            });
        }

        if !self.store.delete(id).await? {
            return Err(AppError::NotFound(format!("image {id}")));
        }

        info!(image_id = %id, "image deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::identifier::IdentifierGenerator;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<PendingRegistry>, Arc<VariantStore>, DeletionHandler) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(PendingRegistry::new());
        let store = Arc::new(VariantStore::new(dir.path()));
        let handler = DeletionHandler::new(registry.clone(), store.clone(), 3);
        (dir, registry, store, handler)
    }

    #[tokio::test]
    async fn test_delete_container_then_not_found() {
        let (_dir, _registry, store, handler) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.create_container(&id).await.unwrap();
        store.write_blob(&id, "original", b"o").await.unwrap();
        store.write_blob(&id, "scalex3", b"s").await.unwrap();

        handler.delete(&id).await.unwrap();
        assert!(matches!(handler.delete(&id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_refused_while_pending() {
        let (_dir, registry, store, handler) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.write_flat(&id, b"x").await.unwrap();
        registry.mark_pending(&id);

        assert!(matches!(
            handler.delete(&id).await,
            Err(AppError::Conflict { retry_after: 3, .. })
        ));
        assert!(store.read_flat(&id).await.unwrap().is_some());
    }
}
