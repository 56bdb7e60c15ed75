//! The spool: an on-disk copy of the upload body, written while the same
//! bytes flow into the streaming parser.
//!
//! The tee is what paces the upload. Each chunk is appended to the spool
//! file and then handed to the byte queue; when either sink stalls, so
//! does the body reader. The spool outlives the streaming phase because
//! reconciliation needs random access to it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use zip_compat::QueueWriter;

use crate::errors::IngestError;

static SPOOL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Creates the spool file with exclusive-create semantics in the OS temp
/// directory. The name is unique per process; a stale collision from a
/// recycled pid just moves on to the next sequence number.
pub(crate) async fn create_spool() -> io::Result<(PathBuf, File)> {
    let dir = std::env::temp_dir();
    loop {
        let seq = SPOOL_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("zipset-spool-{}-{}", std::process::id(), seq));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Removes the spool unless retention was requested. Failures are logged
/// and swallowed; a leftover spool costs disk space, not correctness.
pub(crate) struct SpoolGuard {
    path: PathBuf,
    pub(crate) keep: bool,
}

impl SpoolGuard {
    pub(crate) fn new(path: PathBuf, keep: bool) -> Self {
        Self { path, keep }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SpoolGuard {
    fn drop(&mut self) {
        if self.keep {
            debug!(spool.path=%self.path.display(), "retaining spool file");
        } else if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(spool.path=%self.path.display(), err=%e, "failed to remove spool file");
        }
    }
}

/// Drives the upload body to completion, duplicating every chunk into the
/// spool file and the byte queue. Returns the total byte count.
///
/// The queue writer reporting a gone reader is not an error: the streaming
/// phase is done (or has failed) and the remaining upload only matters to
/// the spool. Exceeding `max_zip_bytes` kills the ingest.
pub(crate) async fn run_tee<S>(
    mut body: S,
    spool: &mut File,
    queue: QueueWriter,
    max_zip_bytes: u64,
) -> Result<u64, IngestError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let mut total = 0u64;
    let mut forward = true;
    while let Some(chunk) = body.try_next().await? {
        if chunk.is_empty() {
            continue;
        }
        total += chunk.len() as u64;
        if total > max_zip_bytes {
            return Err(IngestError::ZipTooLarge);
        }
        spool.write_all(&chunk).await?;
        if forward {
            forward = queue.push(chunk).await;
        }
    }
    spool.flush().await?;
    spool.sync_all().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio::io::AsyncReadExt;
    use zip_compat::ByteQueue;

    fn body_of(chunks: Vec<&'static [u8]>) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c))))
    }

    #[tokio::test]
    async fn duplicates_body_into_both_sinks() {
        let (writer, mut queue) = ByteQueue::pair();
        let (path, mut spool) = create_spool().await.unwrap();
        let guard = SpoolGuard::new(path, false);

        let tee = run_tee(body_of(vec![b"hello ", b"world"]), &mut spool, writer, 1024);
        let drain = async {
            let mut seen = Vec::new();
            queue.read_to_end(&mut seen).await.unwrap();
            seen
        };
        let (total, seen) = tokio::join!(tee, drain);
        assert_eq!(total.unwrap(), 11);
        assert_eq!(seen, b"hello world");
        assert_eq!(tokio::fs::read(guard.path()).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn cap_overflow_fails() {
        let (writer, mut queue) = ByteQueue::pair();
        let (path, mut spool) = create_spool().await.unwrap();
        let _guard = SpoolGuard::new(path, false);

        queue.discard_rest();
        let result = run_tee(body_of(vec![b"0123456789", b"x"]), &mut spool, writer, 10).await;
        assert!(matches!(result, Err(IngestError::ZipTooLarge)));
    }

    #[tokio::test]
    async fn keeps_spooling_after_reader_stops() {
        let (writer, mut queue) = ByteQueue::pair();
        let (path, mut spool) = create_spool().await.unwrap();
        let guard = SpoolGuard::new(path, false);

        queue.discard_rest();
        let total = run_tee(body_of(vec![b"abc", b"def"]), &mut spool, writer, 1024)
            .await
            .unwrap();
        assert_eq!(total, 6);
        assert_eq!(tokio::fs::read(guard.path()).await.unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn spool_guard_removes_file() {
        let (path, _spool) = create_spool().await.unwrap();
        assert!(path.exists());
        drop(SpoolGuard::new(path.clone(), false));
        assert!(!path.exists());
    }
}
