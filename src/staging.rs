//! Transient storage for serialized list pages.
//!
//! The index backend ingests sources by fetching them from a URL, so each
//! page pulled from the list is written to a [`StagingStore`] first and its
//! locator handed to the index. Staged objects belong to exactly one
//! refresh attempt and are deleted when the attempt ends.
//!
//! | Backend | Locator |
//! |---------|---------|
//! | [`S3StagingStore`](crate::staging_s3::S3StagingStore) | presigned `https://` GET URL or public URL |
//! | [`MemoryStagingStore`] | `memory://<name>` |

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{Error, Result};

#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Write `content` under `name` and return a locator the index backend
    /// can fetch it from.
    async fn put(&self, name: &str, content: &[u8]) -> Result<String>;

    /// Delete a staged object. Deleting a missing object succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// A fresh, collision-free object name: a random UUID with a `.json` suffix.
pub fn staged_object_name() -> String {
    format!("{}.json", Uuid::new_v4())
}

/// In-process staging store.
///
/// Locators are not fetchable by a remote backend; this store is for tests
/// and for wiring the pipeline against fake index clients.
#[derive(Default)]
pub struct MemoryStagingStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }

    pub async fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(name).cloned()
    }
}

#[async_trait]
impl StagingStore for MemoryStagingStore {
    async fn put(&self, name: &str, content: &[u8]) -> Result<String> {
        if name.is_empty() {
            return Err(Error::StagingWrite {
                name: name.to_string(),
                message: "object name is empty".to_string(),
            });
        }
        self.objects
            .write()
            .await
            .insert(name.to_string(), content.to_vec());
        Ok(format!("memory://{name}"))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.objects.write().await.remove(name);
        Ok(())
    }
}
