//! Local filesystem side of a transfer.
//!
//! Part workers of one object share a single open file. Seek and read (or
//! seek and write) are not atomic as a pair, so `SharedFile` keeps the file
//! behind a mutex held only across that pair; the lock is released before
//! any network call is made with the bytes.

use bytes::Bytes;
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

/// Suffix of the temporary sibling a resumable download writes into.
pub const PARTIAL_SUFFIX: &str = ".partial";

pub struct SharedFile {
    file: Mutex<File>,
}

impl SharedFile {
    /// Open an existing file for positioned reads.
    pub async fn open_read(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Open (or create) a file for positioned writes without truncating it,
    /// so bytes written by an earlier run survive.
    pub async fn open_write(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Read exactly `len` bytes starting at `offset`.
    pub async fn read_at(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let mut buffer = vec![0u8; len as usize];
        {
            let mut file = self.file.lock().await;
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buffer).await?;
        }
        Ok(Bytes::from(buffer))
    }

    /// Write all of `data` starting at `offset` and sync it to disk.
    ///
    /// A checkpoint is recorded for the bytes as soon as this returns, so
    /// they must already survive a power loss by then.
    pub async fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_data().await
    }

    /// Flush data and metadata to disk.
    pub async fn sync(&self) -> io::Result<()> {
        self.file.lock().await.sync_all().await
    }
}

/// Size of the file at `path`, or `None` if it does not exist.
pub async fn stat_size(path: &Path) -> io::Result<Option<u64>> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len())),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Remove the file at `path`; a missing file is not an error.
pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path).await {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

/// The temporary sibling `<path>.partial` of a destination file.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Create the parent directory of `path` if needed.
pub async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

/// Atomically move a finished temporary file onto its final name.
///
/// The temporary file must already be synced and closed.
pub async fn finalize(partial: &Path, destination: &Path) -> io::Result<()> {
    if let Err(err) = fs::rename(partial, destination).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(destination).await?;
            fs::rename(partial, destination).await?;
        } else {
            return Err(err);
        }
    }
    Ok(())
}

/// Write `data` to `destination` through a temporary file and rename.
pub async fn write_whole(destination: &Path, data: &[u8]) -> io::Result<()> {
    ensure_parent(destination).await?;
    let partial = partial_path(destination);
    let mut file = File::create(&partial).await?;
    let written = async {
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&partial).await;
        return Err(err);
    }
    finalize(&partial, destination).await
}

/// Every regular file below `root` (or `root` itself when it is a file),
/// with its size, in a stable order.
pub async fn walk_files(root: &Path) -> io::Result<Vec<(PathBuf, u64)>> {
    let meta = fs::metadata(root).await?;
    if meta.is_file() {
        return Ok(vec![(root.to_path_buf(), meta.len())]);
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let len = entry.metadata().await?.len();
                files.push((entry.path(), len));
            }
        }
    }
    files.sort();
    Ok(files)
}
