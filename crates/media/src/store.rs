//! Storage of normalized pictures.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, UserId};
use tokio::sync::RwLock;

use crate::Result;

/// Whose picture an image is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    UserAvatar,
    OrderPicture,
}

/// Owner kind plus owner id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub kind: ImageKind,
    pub owner: AggregateId,
}

impl ImageKey {
    pub fn avatar(user_id: UserId) -> Self {
        Self {
            kind: ImageKind::UserAvatar,
            owner: user_id.into(),
        }
    }

    pub fn order_picture(order_id: AggregateId) -> Self {
        Self {
            kind: ImageKind::OrderPicture,
            owner: order_id,
        }
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ImageKind::UserAvatar => write!(f, "avatar:{}", self.owner),
            ImageKind::OrderPicture => write!(f, "order-pic:{}", self.owner),
        }
    }
}

/// Keeps PNG bytes per owner. Writing replaces any previous picture.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn put(&self, key: ImageKey, png: Vec<u8>) -> Result<()>;

    async fn get(&self, key: ImageKey) -> Result<Option<Arc<Vec<u8>>>>;

    /// Returns true if a picture was removed.
    async fn remove(&self, key: ImageKey) -> Result<bool>;
}

/// Process-local image store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryImageStore {
    images: Arc<RwLock<HashMap<ImageKey, Arc<Vec<u8>>>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.images.read().await.len()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn put(&self, key: ImageKey, png: Vec<u8>) -> Result<()> {
        tracing::debug!(%key, bytes = png.len(), "image stored");
        self.images.write().await.insert(key, Arc::new(png));
        Ok(())
    }

    async fn get(&self, key: ImageKey) -> Result<Option<Arc<Vec<u8>>>> {
        Ok(self.images.read().await.get(&key).cloned())
    }

    async fn remove(&self, key: ImageKey) -> Result<bool> {
        Ok(self.images.write().await.remove(&key).is_some())
    }
}
