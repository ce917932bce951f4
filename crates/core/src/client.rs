//! The resource-client seam: typed CRUD + watch over one resource kind in one namespace.

use tokio::sync::mpsc;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<K> {
    Applied(K),
    Deleted(K),
}

/// Create/Get/Update/Delete/List/Watch for records of kind `K`.
///
/// Implementations stamp a fresh resource version on every write and return the
/// stored object, so callers always hold the version they must hand back on update.
#[async_trait::async_trait]
pub trait ResourceClient<K>: Send + Sync
where
    K: Clone + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, ClientError>;
    async fn get(&self, name: &str) -> Result<K, ClientError>;
    async fn update(&self, obj: &K) -> Result<K, ClientError>;
    async fn delete(&self, name: &str) -> Result<(), ClientError>;
    async fn list(&self) -> Result<Vec<K>, ClientError>;
    /// Stream changes until the receiver is dropped.
    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent<K>>, ClientError>;
}
