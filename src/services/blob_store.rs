//! BlobStore: opaque record payloads on local disk.
//!
//! Payloads are addressed by a random handle and sharded beneath
//! `base_path/{shard}/{shard}/{handle}`. The lifecycle core never looks
//! inside them.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Result of a successful `put`.
#[derive(Clone, Debug)]
pub struct StoredBlob {
    pub handle: String,
    pub size_bytes: i64,
    /// Hex MD5 of the payload.
    pub etag: String,
}

#[derive(Clone, Debug)]
pub struct BlobStore {
    /// Base directory on disk where payloads are stored.
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Handles are UUIDs; anything else could escape the base directory.
    fn ensure_handle_safe(handle: &str) -> io::Result<()> {
        Uuid::parse_str(handle)
            .map(|_| ())
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "malformed blob handle"))
    }

    /// Two-level shard directories from the first two MD5 bytes of the handle.
    fn shards(handle: &str) -> (String, String) {
        let digest = md5::compute(handle);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn blob_path(&self, handle: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(handle);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(handle);
        path
    }

    /// Stream a payload to disk under a fresh handle.
    ///
    /// Bytes go to a temp file which is fsynced and then renamed into place,
    /// so a handle never points at a partial payload.
    pub async fn put_stream<S, E>(&self, payload: S) -> io::Result<StoredBlob>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let handle = Uuid::new_v4().to_string();
        let file_path = self.blob_path(&handle);
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("blob path missing parent directory"))?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(payload);
        while let Some(chunk_res) = payload.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(io::Error::other(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        Ok(StoredBlob {
            handle,
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }

    pub async fn put(&self, bytes: Bytes) -> io::Result<StoredBlob> {
        self.put_stream(stream::once(async move { Ok::<_, io::Error>(bytes) }))
            .await
    }

    /// Open a payload for streaming out.
    pub async fn open(&self, handle: &str) -> io::Result<File> {
        Self::ensure_handle_safe(handle)?;
        File::open(self.blob_path(handle)).await
    }

    pub async fn get(&self, handle: &str) -> io::Result<Bytes> {
        Self::ensure_handle_safe(handle)?;
        Ok(Bytes::from(fs::read(self.blob_path(handle)).await?))
    }

    /// Remove a payload. Already-missing payloads are not an error.
    pub async fn delete(&self, handle: &str) -> io::Result<()> {
        Self::ensure_handle_safe(handle)?;
        let file_path = self.blob_path(handle);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
            }
            Err(err) => return Err(err),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Remove empty shard directories up to (not including) the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());

        let blob = store.put(Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(blob.size_bytes, 5);
        assert_eq!(blob.etag, format!("{:x}", md5::compute(b"hello")));
        assert_eq!(store.get(&blob.handle).await.unwrap(), Bytes::from_static(b"hello"));

        store.delete(&blob.handle).await.unwrap();
        assert_eq!(
            store.get(&blob.handle).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        // Shard directories are pruned with the last payload.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        // Deleting twice is fine.
        store.delete(&blob.handle).await.unwrap();
    }

    #[tokio::test]
    async fn failed_streams_leave_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::other("connection reset")),
        ];

        assert!(store.put_stream(stream::iter(chunks)).await.is_err());
        let leftovers = walk_files(dir.path());
        assert!(leftovers.is_empty(), "leftover files: {leftovers:?}");
    }

    #[tokio::test]
    async fn rejects_handles_that_are_not_uuids() {
        let dir = tempfile::tempdir().unwrap();
        let store = BlobStore::new(dir.path());
        let err = store.get("../../etc/passwd").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    fn walk_files(root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in std::fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out
    }
}
