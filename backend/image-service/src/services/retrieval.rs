/// Read-time variant lookup
///
/// Pending identifiers are never served. Otherwise the flat blob wins, then
/// an exact canonical-name match inside the container, then (only when no
/// descriptor was given) the lexicographically smallest stored blob.
use bytes::Bytes;
use std::io;
use std::sync::Arc;

use crate::metrics::RETRIEVALS_TOTAL;
use crate::models::{Identifier, VariantRequest};
use crate::services::pending::PendingRegistry;
use crate::services::storage::{AssetLayout, VariantStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Ingestion still in flight; retry later
    Pending,
    NotFound,
    Blob { name: String, data: Bytes },
}

impl Resolution {
    fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::NotFound => "not_found",
            Self::Blob { .. } => "served",
        }
    }
}

#[derive(Clone)]
pub struct RetrievalResolver {
    registry: Arc<PendingRegistry>,
    store: Arc<VariantStore>,
}

impl RetrievalResolver {
    pub fn new(registry: Arc<PendingRegistry>, store: Arc<VariantStore>) -> Self {
        Self { registry, store }
    }

    pub async fn resolve(&self, id: &Identifier, request: VariantRequest) -> io::Result<Resolution> {
        let resolution = self.lookup(id, request).await?;
        RETRIEVALS_TOTAL
            .with_label_values(&[resolution.label()])
            .inc();
        tracing::debug!(image_id = %id, ?request, result = resolution.label(), "image resolved");
        Ok(resolution)
    }

    async fn lookup(&self, id: &Identifier, request: VariantRequest) -> io::Result<Resolution> {
        if self.registry.is_pending(id) {
            return Ok(Resolution::Pending);
        }

        match self.store.locate(id).await? {
            AssetLayout::Missing => Ok(Resolution::NotFound),
            AssetLayout::Flat => Ok(match self.store.read_flat(id).await? {
                Some(data) => Resolution::Blob {
                    name: id.to_string(),
                    data,
                },
                // Deleted between locate and read
                None => Resolution::NotFound,
            }),
            AssetLayout::Container => {
                let name = match request.blob_name() {
                    Some(name) => name,
                    None => match self.store.list_blobs(id).await?.into_iter().next() {
                        Some(first) => first,
                        None => return Ok(Resolution::NotFound),
                    },
                };

                Ok(match self.store.read_blob(id, &name).await? {
                    Some(data) => Resolution::Blob { name, data },
                    None => Resolution::NotFound,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VariantDescriptor;
    use crate::services::identifier::IdentifierGenerator;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<PendingRegistry>, Arc<VariantStore>, RetrievalResolver) {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(PendingRegistry::new());
        let store = Arc::new(VariantStore::new(dir.path()));
        let resolver = RetrievalResolver::new(registry.clone(), store.clone());
        (dir, registry, store, resolver)
    }

    fn resize(width: u32, height: u32) -> VariantRequest {
        VariantRequest::Variant(VariantDescriptor::Resize { width, height })
    }

    #[tokio::test]
    async fn test_pending_wins_over_stored_blobs() {
        let (_dir, registry, store, resolver) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.write_flat(&id, b"x").await.unwrap();
        registry.mark_pending(&id);

        assert_eq!(
            resolver.resolve(&id, VariantRequest::Any).await.unwrap(),
            Resolution::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_not_found() {
        let (_dir, _registry, _store, resolver) = setup();
        let id = IdentifierGenerator::new().generate("missing.png");

        assert_eq!(
            resolver.resolve(&id, resize(1, 1)).await.unwrap(),
            Resolution::NotFound
        );
    }

    #[tokio::test]
    async fn test_flat_blob_served_for_any_request() {
        let (_dir, _registry, store, resolver) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.write_flat(&id, b"flat").await.unwrap();

        for request in [VariantRequest::Any, resize(5, 5)] {
            match resolver.resolve(&id, request).await.unwrap() {
                Resolution::Blob { data, .. } => assert_eq!(data, &b"flat"[..]),
                other => panic!("expected flat blob, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_exact_match_and_deterministic_fallback() {
        let (_dir, _registry, store, resolver) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.create_container(&id).await.unwrap();
        store.write_blob(&id, "scalex2", b"s").await.unwrap();
        store.write_blob(&id, "resize20x10", b"r").await.unwrap();

        let found = resolver.resolve(&id, resize(20, 10)).await.unwrap();
        assert!(matches!(found, Resolution::Blob { ref name, .. } if name == "resize20x10"));

        assert_eq!(
            resolver.resolve(&id, resize(10, 20)).await.unwrap(),
            Resolution::NotFound
        );
        assert_eq!(
            resolver.resolve(&id, VariantRequest::Original).await.unwrap(),
            Resolution::NotFound
        );

        let fallback = resolver.resolve(&id, VariantRequest::Any).await.unwrap();
        assert!(matches!(fallback, Resolution::Blob { ref name, .. } if name == "resize20x10"));
    }

    #[tokio::test]
    async fn test_empty_container_is_not_found() {
        let (_dir, _registry, store, resolver) = setup();
        let id = IdentifierGenerator::new().generate("a.png");
        store.create_container(&id).await.unwrap();

        assert_eq!(
            resolver.resolve(&id, VariantRequest::Any).await.unwrap(),
            Resolution::NotFound
        );
    }
}
