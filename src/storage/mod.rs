use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

use crate::settings::StorageSettings;

mod disk;
mod memory;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

/// Factory for body buffers.
#[async_trait]
pub trait Storage: Send + Sync {
    /// One-time initialization (directory creation, permissions).
    async fn setup(&self) -> Result<()>;

    /// Allocates a fresh buffer for the body of the given cache key.
    async fn create(&self, key: &str) -> Result<Arc<dyn BodyBuffer>>;
}

/// Append-only byte container written by exactly one producer and read by
/// any number of consumers. The producer appends until the body is complete,
/// then calls `close` exactly once; `clear` releases the underlying storage
/// when the owning cache entry is destroyed.
#[async_trait]
pub trait BodyBuffer: Send + Sync {
    async fn append(&self, chunk: &[u8]) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn new_reader(&self) -> Box<dyn BufferReader>;

    async fn clear(&self) -> Result<()>;
}

/// Cursor over a body buffer. `next_chunk` yields `None` at end of stream;
/// whether a reader may observe bytes before the producer closes the buffer
/// depends on the backing storage.
#[async_trait]
pub trait BufferReader: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

pub fn from_settings(settings: &StorageSettings) -> Arc<dyn Storage> {
    match settings {
        StorageSettings::InMemory => Arc::new(MemoryStorage),
        StorageSettings::OnDisk { path } => Arc::new(DiskStorage::new(path.clone())),
    }
}
