use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use data_encoding::BASE32;
use memmap2::Mmap;
use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, watch};
use tracing::warn;

use super::{BodyBuffer, BufferReader, Storage};

const NAME_SUFFIX_LEN: usize = 10;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// File-backed storage. Bodies are written to per-entry files under the
/// configured directory; directory and files are created with owner-only
/// permissions.
pub struct DiskStorage {
    dir: PathBuf,
}

impl DiskStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Storage for DiskStorage {
    async fn setup(&self) -> Result<()> {
        async_fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", self.dir.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            async_fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700)).await?;
        }
        Ok(())
    }

    async fn create(&self, key: &str) -> Result<Arc<dyn BodyBuffer>> {
        let name = format!("{}{}", BASE32.encode(key.as_bytes()), random_suffix());
        let path = self.dir.join(name);

        let mut options = async_fs::OpenOptions::new();
        options.create_new(true).read(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let file = options
            .open(&path)
            .await
            .with_context(|| format!("failed to create cache file {}", path.display()))?;

        Ok(Arc::new(FileBuffer::new(path, file)))
    }
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// Body buffer backed by a file. Unlike the in-memory variant there is no
/// read-while-write: readers that arrive before `close` wait until the file
/// has been synced and mapped, then snapshot from the shared mapping.
pub struct FileBuffer {
    shared: Arc<FileShared>,
}

struct FileShared {
    path: PathBuf,
    file: Mutex<Option<async_fs::File>>,
    mapping: RwLock<Option<Arc<Mmap>>>,
    closed_tx: watch::Sender<bool>,
}

impl FileBuffer {
    fn new(path: PathBuf, file: async_fs::File) -> Self {
        let (closed_tx, _closed_rx) = watch::channel(false);
        Self {
            shared: Arc::new(FileShared {
                path,
                file: Mutex::new(Some(file)),
                mapping: RwLock::new(None),
                closed_tx,
            }),
        }
    }
}

async fn finalize(mut file: async_fs::File) -> Result<Option<Mmap>> {
    file.flush().await?;
    file.sync_all().await?;
    let file = file.into_std().await;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: the file is fully written and synced before mapping, and no
    // writer touches it afterwards; readers only see the mapping once the
    // close signal fires.
    let mapping = unsafe { Mmap::map(&file)? };
    Ok(Some(mapping))
}

#[async_trait]
impl BodyBuffer for FileBuffer {
    async fn append(&self, chunk: &[u8]) -> Result<()> {
        let mut guard = self.shared.file.lock().await;
        let Some(file) = guard.as_mut() else {
            bail!("buffer is closed");
        };
        file.write_all(chunk)
            .await
            .with_context(|| format!("failed to write cache file {}", self.shared.path.display()))
    }

    async fn close(&self) -> Result<()> {
        let file = { self.shared.file.lock().await.take() };
        let Some(file) = file else {
            return Ok(());
        };
        let result = finalize(file).await.with_context(|| {
            format!("failed to finalize cache file {}", self.shared.path.display())
        });
        match result {
            Ok(mapping) => {
                *self.shared.mapping.write() = mapping.map(Arc::new);
                self.shared.closed_tx.send_replace(true);
                Ok(())
            }
            Err(err) => {
                // Unblock any reader parked on the close signal; they will
                // find no mapping and report end of stream.
                self.shared.closed_tx.send_replace(true);
                Err(err)
            }
        }
    }

    fn new_reader(&self) -> Box<dyn BufferReader> {
        Box::new(FileReader {
            shared: self.shared.clone(),
            closed_rx: self.shared.closed_tx.subscribe(),
            mapping: None,
            offset: 0,
        })
    }

    async fn clear(&self) -> Result<()> {
        {
            let mut file = self.shared.file.lock().await;
            *file = None;
        }
        *self.shared.mapping.write() = None;
        self.shared.closed_tx.send_replace(true);
        match async_fs::remove_file(&self.shared.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("failed to remove cache file {}", self.shared.path.display())
            }),
        }
    }
}

impl Drop for FileShared {
    fn drop(&mut self) {
        let path = self.path.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(err) = async_fs::remove_file(&path).await
                    && err.kind() != ErrorKind::NotFound
                {
                    warn!(error = %err, path = %path.display(), "failed to remove cache file");
                }
            });
        } else if let Err(err) = std::fs::remove_file(&path)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(error = %err, path = %path.display(), "failed to remove cache file");
        }
    }
}

struct FileReader {
    shared: Arc<FileShared>,
    closed_rx: watch::Receiver<bool>,
    mapping: Option<Arc<Mmap>>,
    offset: usize,
}

#[async_trait]
impl BufferReader for FileReader {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(mapping) = &self.mapping {
                if self.offset >= mapping.len() {
                    return Ok(None);
                }
                let end = (self.offset + READ_CHUNK_SIZE).min(mapping.len());
                let chunk = Bytes::copy_from_slice(&mapping[self.offset..end]);
                self.offset = end;
                return Ok(Some(chunk));
            }
            let _ = self.closed_rx.wait_for(|closed| *closed).await;
            let Some(mapping) = self.shared.mapping.read().clone() else {
                return Ok(None);
            };
            self.mapping = Some(mapping);
        }
    }
}
