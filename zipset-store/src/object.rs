//! Per-entry processing: raw member bytes in, committed object out.

use async_compression::tokio::write::BrotliEncoder;
use async_compression::Level;
use data_encoding::HEXLOWER;
use sha2::Sha256;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::errors::IngestError;
use crate::hashing_reader::HashingReader;
use crate::store::FilesetStore;

/// Brotli effort for stored objects. Quality 5 keeps ingest CPU-bound work
/// reasonable while still compressing well for the immutable read path.
const BROTLI_QUALITY: i32 = 5;

/// What one archive member boils down to once processed. `sha256` and
/// `size` describe the raw (decompressed) bytes, never the stored Brotli
/// form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedEntry {
    pub sha256: String,
    pub size: u64,
    pub crc32: u32,
}

/// Streams raw member bytes through the accounting tap and a Brotli
/// encoder into a staged file, then publishes it under the content hash.
///
/// The reader is capped at `max_file_bytes`: a member that turns out
/// bigger (decompression bombs included) fails without being read to its
/// end.
pub(crate) async fn process_entry<R>(
    store: &FilesetStore,
    raw: R,
    max_file_bytes: u64,
) -> Result<ProcessedEntry, IngestError>
where
    R: AsyncRead + Unpin,
{
    let mut tap =
        HashingReader::<_, Sha256>::from(raw.take(max_file_bytes.saturating_add(1)));

    let staged = store.scratch_file().await?;
    let mut encoder = BrotliEncoder::with_quality(staged, Level::Precise(BROTLI_QUALITY));
    tokio::io::copy(&mut tap, &mut encoder).await?;
    if tap.count() > max_file_bytes {
        return Err(IngestError::FileTooLarge);
    }
    encoder.shutdown().await?;

    let staged = encoder.into_inner();
    staged.sync_all().await?;

    let (digest, crc32, size) = tap.finalize();
    let sha256 = HEXLOWER.encode(digest.as_slice());
    store.commit_object(&sha256, staged.file_path()).await?;

    Ok(ProcessedEntry {
        sha256,
        size,
        crc32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::bufread::BrotliDecoder;
    use tokio::io::BufReader;

    async fn store() -> (tempfile::TempDir, FilesetStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FilesetStore::open(dir.path().join("store"))
            .await
            .expect("open");
        (dir, store)
    }

    async fn decode_object(store: &FilesetStore, sha256: &str) -> Vec<u8> {
        let file = store
            .open_object(sha256)
            .await
            .expect("open")
            .expect("object exists");
        let mut decoder = BrotliDecoder::new(BufReader::new(file));
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw).await.expect("brotli decode");
        raw
    }

    #[tokio::test]
    async fn commits_brotli_object_under_content_hash() {
        let (_dir, store) = store().await;
        let entry = process_entry(&store, &b"hello\n"[..], 1024).await.unwrap();

        assert_eq!(
            entry.sha256,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
        assert_eq!(entry.size, 6);
        assert_eq!(entry.crc32, 0x363a3020);
        assert_eq!(decode_object(&store, &entry.sha256).await, b"hello\n");
    }

    #[tokio::test]
    async fn oversize_member_fails_without_draining() {
        let (_dir, store) = store().await;
        let big = vec![0u8; 4096];
        match process_entry(&store, &big[..], 100).await {
            Err(IngestError::FileTooLarge) => {}
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_member_is_a_valid_object() {
        let (_dir, store) = store().await;
        let entry = process_entry(&store, &b""[..], 1024).await.unwrap();
        assert_eq!(
            entry.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(entry.size, 0);
        assert_eq!(entry.crc32, 0);
        assert!(decode_object(&store, &entry.sha256).await.is_empty());
    }

    #[tokio::test]
    async fn identical_members_share_one_object() {
        let (_dir, store) = store().await;
        let first = process_entry(&store, &b"same bytes"[..], 1024).await.unwrap();
        let second = process_entry(&store, &b"same bytes"[..], 1024).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(decode_object(&store, &first.sha256).await, b"same bytes");
    }
}
