//! Forward, single-pass reader over the local file headers of a ZIP
//! stream.
//!
//! The reader walks the archive in upload order: header, body, optional
//! data descriptor, next header. It never seeks; once a non-header
//! signature shows up (central directory, EOCD, or garbage) the streaming
//! phase is over and the rest of the upload is left to the spool.

use bytes::{Buf, Bytes};
use tokio::io::Take;

use crate::queue::ByteQueue;
use crate::{
    find_extra_field, Error, DATA_DESCRIPTOR_SIGNATURE, FLAG_DATA_DESCRIPTOR,
    LOCAL_FILE_HEADER_SIGNATURE, METHOD_DEFLATE, METHOD_STORE, ZIP64_EXTRA_TAG, ZIP64_SENTINEL,
};

/// A local file header, with ZIP64 size substitution already applied.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// Offset of the header's first byte in the upload stream. This is the
    /// value the central directory later records for the same entry.
    pub local_header_offset: u64,
    /// Filename exactly as stored; decoding is a central directory
    /// concern.
    pub name_raw: Bytes,
    pub extra: Bytes,
    pub method: u16,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl LocalEntry {
    /// Whether sizes and CRC trail the body in a data descriptor.
    pub fn has_data_descriptor(&self) -> bool {
        self.flags & FLAG_DATA_DESCRIPTOR != 0
    }

    /// A data descriptor carries 8-byte sizes iff the header advertised
    /// 64-bit values.
    pub fn zip64_descriptor(&self) -> bool {
        self.compressed_size > u64::from(u32::MAX) || self.uncompressed_size > u64::from(u32::MAX)
    }
}

/// Sizes and CRC read from a trailing data descriptor.
#[derive(Debug, Clone, Copy)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

pub struct ZipStreamReader {
    queue: ByteQueue,
}

impl ZipStreamReader {
    pub fn new(queue: ByteQueue) -> Self {
        Self { queue }
    }

    /// Offset of the next unread byte in the upload stream.
    pub fn consumed(&self) -> u64 {
        self.queue.consumed()
    }

    /// Parses the next local file header, or returns `None` once the
    /// stream has moved past the last entry. In the `None` case the
    /// remainder of the upload is absorbed unread (it still reaches the
    /// spool through the tee).
    pub async fn next_header(&mut self) -> Result<Option<LocalEntry>, Error> {
        if self.queue.peek_u32_le().await? != LOCAL_FILE_HEADER_SIGNATURE {
            // central directory, EOCD, or garbage: the entry walk is over
            self.queue.discard_rest();
            return Ok(None);
        }

        let local_header_offset = self.queue.consumed();
        let mut fixed = self.queue.read_bytes(30).await?;
        let _signature = fixed.get_u32_le();
        let _version_needed = fixed.get_u16_le();
        let flags = fixed.get_u16_le();
        let method = fixed.get_u16_le();
        let _mod_time = fixed.get_u16_le();
        let _mod_date = fixed.get_u16_le();
        let crc32 = fixed.get_u32_le();
        let compressed_size_32 = fixed.get_u32_le();
        let uncompressed_size_32 = fixed.get_u32_le();
        let name_len = fixed.get_u16_le() as usize;
        let extra_len = fixed.get_u16_le() as usize;

        if method != METHOD_STORE && method != METHOD_DEFLATE {
            return Err(Error::UnsupportedMethod(method));
        }

        let name_raw = self.queue.read_bytes(name_len).await?;
        let extra = self.queue.read_bytes(extra_len).await?;
        let (compressed_size, uncompressed_size) =
            apply_zip64_sizes(compressed_size_32, uncompressed_size_32, &extra)?;

        Ok(Some(LocalEntry {
            local_header_offset,
            name_raw,
            extra,
            method,
            flags,
            crc32,
            compressed_size,
            uncompressed_size,
        }))
    }

    /// Reader over exactly the next `len` body bytes.
    pub fn body_exact(&mut self, len: u64) -> Take<&mut ByteQueue> {
        self.queue.take_exact(len)
    }

    /// Reader over the rest of the upload; the caller (a raw-DEFLATE
    /// decoder) is responsible for stopping at the end of the entry.
    pub fn body_unknown(&mut self) -> &mut ByteQueue {
        &mut self.queue
    }

    /// Reads the data descriptor that follows an entry with flag bit 3.
    /// The optional signature word is recognized and skipped.
    pub async fn read_data_descriptor(&mut self, zip64: bool) -> Result<DataDescriptor, Error> {
        if self.queue.peek_u32_le().await? == DATA_DESCRIPTOR_SIGNATURE {
            self.queue.read_bytes(4).await?;
        }
        let mut fields = self.queue.read_bytes(if zip64 { 20 } else { 12 }).await?;
        let crc32 = fields.get_u32_le();
        let (compressed_size, uncompressed_size) = if zip64 {
            (fields.get_u64_le(), fields.get_u64_le())
        } else {
            (
                u64::from(fields.get_u32_le()),
                u64::from(fields.get_u32_le()),
            )
        };
        Ok(DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    /// Stops the streaming phase: everything still unread is absorbed so
    /// the upload keeps flowing into the spool.
    pub fn abandon(&mut self) {
        self.queue.discard_rest();
    }
}

/// Substitutes 32-bit sentinel sizes with their ZIP64 extra field values.
/// The extra must contain exactly the values the sentinels ask for, in
/// APPNOTE order: uncompressed size first, then compressed size.
fn apply_zip64_sizes(
    compressed_size_32: u32,
    uncompressed_size_32: u32,
    extra: &[u8],
) -> Result<(u64, u64), Error> {
    if compressed_size_32 != ZIP64_SENTINEL && uncompressed_size_32 != ZIP64_SENTINEL {
        return Ok((
            u64::from(compressed_size_32),
            u64::from(uncompressed_size_32),
        ));
    }

    let mut field = find_extra_field(extra, ZIP64_EXTRA_TAG).unwrap_or(&[]);
    let mut uncompressed_size = u64::from(uncompressed_size_32);
    let mut compressed_size = u64::from(compressed_size_32);
    if uncompressed_size_32 == ZIP64_SENTINEL {
        uncompressed_size = take_u64(&mut field).ok_or(Error::Zip64FieldMissing("usize"))?;
    }
    if compressed_size_32 == ZIP64_SENTINEL {
        compressed_size = take_u64(&mut field).ok_or(Error::Zip64FieldMissing("csize"))?;
    }
    Ok((compressed_size, uncompressed_size))
}

pub(crate) fn take_u64(field: &mut &[u8]) -> Option<u64> {
    if field.len() < 8 {
        return None;
    }
    let (head, rest) = field.split_at(8);
    *field = rest;
    let mut word = [0u8; 8];
    word.copy_from_slice(head);
    Some(u64::from_le_bytes(word))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Entry, ZipBuilder};
    use crate::queue::QueueWriter;
    use async_compression::tokio::bufread::DeflateDecoder;
    use tokio::io::AsyncReadExt;

    async fn feed_all(writer: QueueWriter, data: Vec<u8>) {
        // deliberately tiny chunks so header fields cross boundaries
        for chunk in data.chunks(7) {
            writer.push(Bytes::copy_from_slice(chunk)).await;
        }
    }

    fn reader_pair() -> (QueueWriter, ZipStreamReader) {
        let (writer, queue) = ByteQueue::pair();
        (writer, ZipStreamReader::new(queue))
    }

    #[tokio::test]
    async fn walks_store_entries() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("a.txt", b"alpha"))
            .entry(Entry::store("b.txt", b"bravo!"))
            .build();
        let (writer, mut zip) = reader_pair();

        let parse = async {
            let first = zip.next_header().await.unwrap().unwrap();
            assert_eq!(&first.name_raw[..], b"a.txt");
            assert_eq!(first.method, METHOD_STORE);
            assert_eq!(first.local_header_offset, 0);
            assert_eq!(first.compressed_size, 5);
            assert_eq!(first.uncompressed_size, 5);
            assert!(!first.has_data_descriptor());
            let mut body = Vec::new();
            zip.body_exact(first.compressed_size)
                .read_to_end(&mut body)
                .await
                .unwrap();
            assert_eq!(body, b"alpha");

            let second = zip.next_header().await.unwrap().unwrap();
            assert_eq!(&second.name_raw[..], b"b.txt");
            // 30-byte header + 5-byte name + 5-byte body
            assert_eq!(second.local_header_offset, 40);
            let mut body = Vec::new();
            zip.body_exact(second.compressed_size)
                .read_to_end(&mut body)
                .await
                .unwrap();
            assert_eq!(body, b"bravo!");

            // the central directory signature ends the walk
            assert!(zip.next_header().await.unwrap().is_none());
        };
        tokio::join!(feed_all(writer, archive), parse);
    }

    #[tokio::test]
    async fn reads_data_descriptor_after_deflate_body() {
        let archive = ZipBuilder::new()
            .entry(Entry::deflate("d.txt", b"ABC").with_data_descriptor())
            .build();
        let (writer, mut zip) = reader_pair();

        let parse = async {
            let header = zip.next_header().await.unwrap().unwrap();
            assert!(header.has_data_descriptor());
            assert_eq!(header.method, METHOD_DEFLATE);
            assert_eq!(header.crc32, 0);
            assert_eq!(header.compressed_size, 0);

            // decode the unknown-length body, then pick up the descriptor
            let mut decoder = DeflateDecoder::new(zip.body_unknown());
            let mut raw = Vec::new();
            decoder.read_to_end(&mut raw).await.unwrap();
            assert_eq!(raw, b"ABC");

            let dd = zip
                .read_data_descriptor(header.zip64_descriptor())
                .await
                .unwrap();
            assert_eq!(dd.uncompressed_size, 3);
            assert_eq!(dd.crc32, crc32fast::hash(b"ABC"));

            assert!(zip.next_header().await.unwrap().is_none());
        };
        tokio::join!(feed_all(writer, archive), parse);
    }

    #[tokio::test]
    async fn zip64_extra_supplies_sizes() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("big.bin", b"0123456789").with_zip64())
            .build();
        let (writer, mut zip) = reader_pair();

        let parse = async {
            let header = zip.next_header().await.unwrap().unwrap();
            assert_eq!(header.compressed_size, 10);
            assert_eq!(header.uncompressed_size, 10);
            assert!(!header.zip64_descriptor());
        };
        tokio::join!(feed_all(writer, archive), parse);
    }

    #[tokio::test]
    async fn zip64_sentinel_without_extra_is_rejected() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("x", b"12345").with_size_override(0xFFFFFFFF, 5))
            .build();
        let (writer, mut zip) = reader_pair();

        let parse = async {
            match zip.next_header().await {
                Err(Error::Zip64FieldMissing("csize")) => {}
                other => panic!("expected Zip64 csize missing, got {other:?}"),
            }
        };
        tokio::join!(feed_all(writer, archive), parse);
    }

    #[tokio::test]
    async fn unsupported_method_is_rejected() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("x", b"1").with_method(12))
            .build();
        let (writer, mut zip) = reader_pair();

        let parse = async {
            match zip.next_header().await {
                Err(Error::UnsupportedMethod(12)) => {}
                other => panic!("expected unsupported method, got {other:?}"),
            }
        };
        tokio::join!(feed_all(writer, archive), parse);
    }

    #[tokio::test]
    async fn garbage_signature_ends_the_walk() {
        let (writer, mut zip) = reader_pair();
        let parse = async {
            assert!(zip.next_header().await.unwrap().is_none());
        };
        tokio::join!(feed_all(writer, b"not a zip at all".to_vec()), parse);
    }
}
