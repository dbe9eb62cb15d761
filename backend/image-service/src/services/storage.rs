/// Filesystem-backed variant storage
///
/// Layout under the storage root:
/// - `<id>`            flat blob, written when no variants were requested
/// - `<id>/original`   preserved source bytes
/// - `<id>/resize<W>x<H>`, `<id>/scalex<F>` derived variants
///
/// Each identifier owns its own path, so concurrent writers for different
/// identifiers never touch the same file and no locking is needed here.
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::models::Identifier;

/// What exists on disk for one identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLayout {
    /// Single blob named by the identifier alone
    Flat,
    /// Directory of named blobs
    Container,
    Missing,
}

#[derive(Debug, Clone)]
pub struct VariantStore {
    root: PathBuf,
}

impl VariantStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage root if it does not exist yet
    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    fn asset_path(&self, id: &Identifier) -> PathBuf {
        self.root.join(id.as_str())
    }

    fn blob_path(&self, id: &Identifier, name: &str) -> PathBuf {
        self.asset_path(id).join(name)
    }

    /// Create the per-identifier container that holds named blobs
    pub async fn create_container(&self, id: &Identifier) -> io::Result<()> {
        fs::create_dir_all(self.asset_path(id)).await
    }

    /// Write one named blob inside the identifier's container
    pub async fn write_blob(&self, id: &Identifier, name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.blob_path(id, name);
        fs::write(&path, data).await?;
        tracing::debug!(image_id = %id, blob = name, size = data.len(), "blob written");
        Ok(())
    }

    /// Write the single unvariant blob named by the identifier
    pub async fn write_flat(&self, id: &Identifier, data: &[u8]) -> io::Result<()> {
        fs::write(self.asset_path(id), data).await?;
        tracing::debug!(image_id = %id, size = data.len(), "flat blob written");
        Ok(())
    }

    pub async fn locate(&self, id: &Identifier) -> io::Result<AssetLayout> {
        match fs::metadata(self.asset_path(id)).await {
            Ok(meta) if meta.is_dir() => Ok(AssetLayout::Container),
            Ok(_) => Ok(AssetLayout::Flat),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AssetLayout::Missing),
            Err(e) => Err(e),
        }
    }

    /// Blob names stored for `id`, sorted lexicographically
    pub async fn list_blobs(&self, id: &Identifier) -> io::Result<Vec<String>> {
        let mut entries = fs::read_dir(self.asset_path(id)).await?;
        let mut names = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Read a named blob; `None` if it does not exist
    pub async fn read_blob(&self, id: &Identifier, name: &str) -> io::Result<Option<Bytes>> {
        read_optional(&self.blob_path(id, name)).await
    }

    /// Read the flat blob; `None` if it does not exist
    pub async fn read_flat(&self, id: &Identifier) -> io::Result<Option<Bytes>> {
        read_optional(&self.asset_path(id)).await
    }

    /// Remove every blob for `id` and then its container.
    ///
    /// Returns `false` when nothing was stored under `id`.
    pub async fn delete(&self, id: &Identifier) -> io::Result<bool> {
        match self.locate(id).await? {
            AssetLayout::Missing => Ok(false),
            AssetLayout::Flat => {
                fs::remove_file(self.asset_path(id)).await?;
                Ok(true)
            }
            AssetLayout::Container => {
                for name in self.list_blobs(id).await? {
                    fs::remove_file(self.blob_path(id, &name)).await?;
                }
                fs::remove_dir(self.asset_path(id)).await?;
                Ok(true)
            }
        }
    }
}

async fn read_optional(path: &Path) -> io::Result<Option<Bytes>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
