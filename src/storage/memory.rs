use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, ensure};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::Notify;

use super::{BodyBuffer, BufferReader, Storage};

pub struct MemoryStorage;

#[async_trait]
impl Storage for MemoryStorage {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, _key: &str) -> Result<Arc<dyn BodyBuffer>> {
        Ok(Arc::new(MemoryBuffer::new()))
    }
}

/// Broadcast buffer: one producer appends, many readers follow with
/// independent cursors while the body is still arriving.
///
/// The byte vector and the subscriber list are guarded by separate locks so
/// that signal delivery never contends with a reader copying bytes. Wake-ups
/// go through one `Notify` per subscriber; `notify_one` stores a permit, so
/// a reader that checks the buffer just before an append still wakes, and
/// the producer never blocks on a slow reader.
pub struct MemoryBuffer {
    shared: Arc<MemoryShared>,
}

struct MemoryShared {
    data: RwLock<Vec<u8>>,
    subscribers: RwLock<Vec<Arc<Notify>>>,
    closed: AtomicBool,
}

impl MemoryBuffer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                data: RwLock::new(Vec::new()),
                subscribers: RwLock::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for MemoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryShared {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        let mut subscribers = self.subscribers.write();
        for subscriber in subscribers.drain(..) {
            subscriber.notify_one();
        }
    }
}

#[async_trait]
impl BodyBuffer for MemoryBuffer {
    async fn append(&self, chunk: &[u8]) -> Result<()> {
        ensure!(
            !self.shared.closed.load(Ordering::Acquire),
            "buffer is closed"
        );
        self.shared.data.write().extend_from_slice(chunk);
        for subscriber in self.shared.subscribers.read().iter() {
            subscriber.notify_one();
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.mark_closed();
        Ok(())
    }

    fn new_reader(&self) -> Box<dyn BufferReader> {
        let notify = Arc::new(Notify::new());
        if !self.shared.closed.load(Ordering::Acquire) {
            self.shared.subscribers.write().push(notify.clone());
        }
        Box::new(MemoryReader {
            shared: self.shared.clone(),
            notify,
            offset: 0,
        })
    }

    async fn clear(&self) -> Result<()> {
        // Nothing to release beyond the allocation itself, but readers
        // parked on the signal must still observe end of stream.
        self.shared.mark_closed();
        Ok(())
    }
}

struct MemoryReader {
    shared: Arc<MemoryShared>,
    notify: Arc<Notify>,
    offset: usize,
}

#[async_trait]
impl BufferReader for MemoryReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            // Close is observed before the copy attempt: once `closed` is
            // seen, no further appends can happen, so an empty copy really
            // is end of stream.
            let was_closed = self.shared.closed.load(Ordering::Acquire);
            {
                let data = self.shared.data.read();
                if self.offset < data.len() {
                    let chunk = Bytes::copy_from_slice(&data[self.offset..]);
                    self.offset = data.len();
                    return Ok(Some(chunk));
                }
            }
            if was_closed {
                return Ok(None);
            }
            self.notify.notified().await;
        }
    }
}
