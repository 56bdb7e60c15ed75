//! Random-access reader for the central directory at the tail of a ZIP
//! archive. This is the authoritative view of the archive: entry sizes,
//! CRCs, offsets and filenames come from here, with the streamed results
//! reconciled against it.

use std::io::SeekFrom;

use encoding_rs::SHIFT_JIS;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

use crate::stream::take_u64;
use crate::{
    find_extra_field, Error, CENTRAL_DIRECTORY_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    FLAG_UTF8, UNICODE_PATH_EXTRA_TAG, ZIP64_EOCD_LOCATOR_SIGNATURE, ZIP64_EOCD_SIGNATURE,
    ZIP64_EXTRA_TAG, ZIP64_SENTINEL,
};

/// EOCD is 22 bytes; the comment before it is capped at 64 KiB.
const EOCD_SEARCH_SPAN: u64 = 65557;

/// A central directory record with ZIP64 substitution applied and the
/// filename decoded.
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub name: String,
    pub is_directory: bool,
    pub method: u16,
    pub flags: u16,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_header_offset: u64,
}

#[derive(Debug, Default)]
pub struct CentralDirectory {
    pub entries: Vec<CentralEntry>,
    /// Non-fatal structural oddities, reported to the caller.
    pub warnings: Vec<String>,
}

/// Reads the whole central directory from a completed archive.
///
/// The EOCD record is located by scanning the final `min(len, 65557)`
/// bytes backwards for its signature; ZIP64 archives are recognized by the
/// saturated 32-bit fields and resolved through the ZIP64 locator at
/// EOCD − 20. Enumeration is signature-driven: records are read until
/// something other than a central directory header shows up.
pub async fn read_central_directory<R>(r: &mut R) -> Result<CentralDirectory, Error>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let file_size = r.seek(SeekFrom::End(0)).await?;
    let tail_len = file_size.min(EOCD_SEARCH_SPAN);
    let tail_start = file_size - tail_len;
    r.seek(SeekFrom::Start(tail_start)).await?;
    let mut tail = vec![0u8; tail_len as usize];
    r.read_exact(&mut tail).await.map_err(eof_as_truncated)?;

    let eocd_pos = find_eocd(&tail).ok_or(Error::EocdNotFound)?;
    let eocd_offset = tail_start + eocd_pos as u64;
    let eocd = &tail[eocd_pos..];
    let total_entries_16 = u16_at(eocd, 10);
    let cd_size_32 = u32_at(eocd, 12);
    let cd_offset_32 = u32_at(eocd, 16);

    let mut warnings = Vec::new();
    let mut cd_offset = u64::from(cd_offset_32);
    if total_entries_16 == 0xFFFF || cd_size_32 == ZIP64_SENTINEL || cd_offset_32 == ZIP64_SENTINEL
    {
        match read_zip64_eocd(r, eocd_offset).await? {
            Some(offset) => cd_offset = offset,
            None => warnings
                .push("Zip64 needed but Zip64 locator not found; using 32-bit CD fields".into()),
        }
    }

    r.seek(SeekFrom::Start(cd_offset)).await?;
    let mut entries = Vec::new();
    loop {
        let mut sig = [0u8; 4];
        r.read_exact(&mut sig).await.map_err(eof_as_truncated)?;
        if u32::from_le_bytes(sig) != CENTRAL_DIRECTORY_SIGNATURE {
            break;
        }
        entries.push(read_entry(r).await?);
    }

    Ok(CentralDirectory { entries, warnings })
}

/// Reads one record, positioned just past the signature.
async fn read_entry<R>(r: &mut R) -> Result<CentralEntry, Error>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let mut fixed = [0u8; 42];
    r.read_exact(&mut fixed).await.map_err(eof_as_truncated)?;
    let flags = u16_at(&fixed, 4);
    let method = u16_at(&fixed, 6);
    let crc32 = u32_at(&fixed, 12);
    let compressed_size_32 = u32_at(&fixed, 16);
    let uncompressed_size_32 = u32_at(&fixed, 20);
    let name_len = u16_at(&fixed, 24) as usize;
    let extra_len = u16_at(&fixed, 26) as usize;
    let comment_len = u16_at(&fixed, 28) as usize;
    let local_header_offset_32 = u32_at(&fixed, 38);

    let mut name_raw = vec![0u8; name_len];
    r.read_exact(&mut name_raw).await.map_err(eof_as_truncated)?;
    let mut extra = vec![0u8; extra_len];
    r.read_exact(&mut extra).await.map_err(eof_as_truncated)?;
    if comment_len > 0 {
        r.seek(SeekFrom::Current(comment_len as i64)).await?;
    }

    let (uncompressed_size, compressed_size, local_header_offset) = apply_zip64(
        uncompressed_size_32,
        compressed_size_32,
        local_header_offset_32,
        &extra,
    )?;

    let name = decode_name(&name_raw, flags, &extra);
    let is_directory = name.ends_with('/');

    Ok(CentralEntry {
        name,
        is_directory,
        method,
        flags,
        crc32,
        compressed_size,
        uncompressed_size,
        local_header_offset,
    })
}

/// Follows the ZIP64 locator expected at `eocd_offset - 20`. Returns the
/// central directory offset from the ZIP64 EOCD record, or `None` when no
/// locator is present there.
async fn read_zip64_eocd<R>(r: &mut R, eocd_offset: u64) -> Result<Option<u64>, Error>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    let Some(locator_offset) = eocd_offset.checked_sub(20) else {
        return Ok(None);
    };
    r.seek(SeekFrom::Start(locator_offset)).await?;
    let mut locator = [0u8; 20];
    r.read_exact(&mut locator).await.map_err(eof_as_truncated)?;
    if u32_at(&locator, 0) != ZIP64_EOCD_LOCATOR_SIGNATURE {
        return Ok(None);
    }
    let zip64_eocd_offset = u64_at(&locator, 8);

    r.seek(SeekFrom::Start(zip64_eocd_offset)).await?;
    let mut record = [0u8; 56];
    r.read_exact(&mut record).await.map_err(eof_as_truncated)?;
    let found = u32_at(&record, 0);
    if found != ZIP64_EOCD_SIGNATURE {
        return Err(Error::SignatureMismatch {
            expected: ZIP64_EOCD_SIGNATURE,
            found,
        });
    }
    let _cd_size = u64_at(&record, 40);
    Ok(Some(u64_at(&record, 48)))
}

/// Backward scan for the EOCD signature. A signature hit only counts when
/// its comment-length field spans exactly the rest of the file, which
/// rejects stray signature bytes embedded in the archive comment.
fn find_eocd(tail: &[u8]) -> Option<usize> {
    if tail.len() < 22 {
        return None;
    }
    (0..=tail.len() - 22).rev().find(|&i| {
        u32_at(tail, i) == END_OF_CENTRAL_DIRECTORY_SIGNATURE
            && i + 22 + u16_at(tail, i + 20) as usize == tail.len()
    })
}

fn apply_zip64(
    uncompressed_size_32: u32,
    compressed_size_32: u32,
    local_header_offset_32: u32,
    extra: &[u8],
) -> Result<(u64, u64, u64), Error> {
    let mut uncompressed_size = u64::from(uncompressed_size_32);
    let mut compressed_size = u64::from(compressed_size_32);
    let mut local_header_offset = u64::from(local_header_offset_32);
    if uncompressed_size_32 != ZIP64_SENTINEL
        && compressed_size_32 != ZIP64_SENTINEL
        && local_header_offset_32 != ZIP64_SENTINEL
    {
        return Ok((uncompressed_size, compressed_size, local_header_offset));
    }

    let mut field = find_extra_field(extra, ZIP64_EXTRA_TAG).unwrap_or(&[]);
    if uncompressed_size_32 == ZIP64_SENTINEL {
        uncompressed_size = take_u64(&mut field).ok_or(Error::Zip64FieldMissing("usize"))?;
    }
    if compressed_size_32 == ZIP64_SENTINEL {
        compressed_size = take_u64(&mut field).ok_or(Error::Zip64FieldMissing("csize"))?;
    }
    if local_header_offset_32 == ZIP64_SENTINEL {
        local_header_offset = take_u64(&mut field).ok_or(Error::Zip64FieldMissing("offset"))?;
    }
    Ok((uncompressed_size, compressed_size, local_header_offset))
}

/// Decodes a stored filename.
///
/// Writers that set general purpose bit 11 promise UTF-8. The Info-ZIP
/// Unicode Path extra (0x7075, version 1) overrides the stored name with
/// UTF-8 bytes. Everything else is tried as Shift-JIS first and falls back
/// to Latin-1, which cannot fail.
fn decode_name(raw: &[u8], flags: u16, extra: &[u8]) -> String {
    if flags & FLAG_UTF8 != 0 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    if let Some(field) = find_extra_field(extra, UNICODE_PATH_EXTRA_TAG) {
        // version byte, then a CRC-32 of the stored name, then the override
        if field.len() >= 5 && field[0] == 1 {
            return String::from_utf8_lossy(&field[5..]).into_owned();
        }
    }
    match SHIFT_JIS.decode_without_bom_handling_and_without_replacement(raw) {
        Some(decoded) => decoded.into_owned(),
        None => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

fn eof_as_truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Truncated
    } else {
        Error::Io(e)
    }
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn u64_at(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Entry, ZipBuilder};
    use std::io::Cursor;

    async fn read(archive: Vec<u8>) -> CentralDirectory {
        let mut cursor = Cursor::new(archive);
        read_central_directory(&mut cursor).await.unwrap()
    }

    #[tokio::test]
    async fn enumerates_entries_with_offsets() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("a.txt", b"alpha"))
            .entry(Entry::deflate("b/c.txt", b"hello hello hello"))
            .build();
        let cd = read(archive).await;

        assert!(cd.warnings.is_empty());
        assert_eq!(cd.entries.len(), 2);
        assert_eq!(cd.entries[0].name, "a.txt");
        assert_eq!(cd.entries[0].local_header_offset, 0);
        assert_eq!(cd.entries[0].uncompressed_size, 5);
        assert_eq!(cd.entries[0].crc32, crc32fast::hash(b"alpha"));
        assert_eq!(cd.entries[1].name, "b/c.txt");
        assert_eq!(cd.entries[1].method, crate::METHOD_DEFLATE);
        assert_eq!(cd.entries[1].uncompressed_size, 17);
        assert!(cd.entries[1].local_header_offset > 0);
    }

    #[tokio::test]
    async fn finds_eocd_behind_comment() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("x", b"1"))
            .comment(b"a comment mentioning PK\x05\x06 which must not confuse us")
            .build();
        let cd = read(archive).await;
        assert_eq!(cd.entries.len(), 1);
    }

    #[tokio::test]
    async fn directories_are_flagged() {
        let archive = ZipBuilder::new()
            .entry(Entry::directory("sub/"))
            .entry(Entry::store("sub/f", b"x"))
            .build();
        let cd = read(archive).await;
        assert!(cd.entries[0].is_directory);
        assert!(!cd.entries[1].is_directory);
    }

    #[tokio::test]
    async fn zip64_records_are_followed() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("big", b"0123456789").with_zip64())
            .zip64_eocd()
            .build();
        let cd = read(archive).await;
        assert!(cd.warnings.is_empty());
        assert_eq!(cd.entries.len(), 1);
        assert_eq!(cd.entries[0].uncompressed_size, 10);
        assert_eq!(cd.entries[0].compressed_size, 10);
        assert_eq!(cd.entries[0].local_header_offset, 0);
    }

    #[tokio::test]
    async fn missing_zip64_locator_warns() {
        // saturated entry count without any ZIP64 records; the 32-bit
        // size and offset are still honest, so enumeration succeeds
        let archive = ZipBuilder::new()
            .entry(Entry::store("x", b"1"))
            .saturate_entry_count()
            .build();
        let cd = read(archive).await;
        assert_eq!(
            cd.warnings,
            vec!["Zip64 needed but Zip64 locator not found; using 32-bit CD fields".to_string()]
        );
        assert_eq!(cd.entries.len(), 1);
    }

    #[tokio::test]
    async fn eocd_missing_is_an_error() {
        let mut cursor = Cursor::new(b"definitely not a zip file".to_vec());
        match read_central_directory(&mut cursor).await {
            Err(Error::EocdNotFound) => {}
            other => panic!("expected EocdNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn utf8_flag_decodes_name() {
        let archive = ZipBuilder::new()
            .entry(Entry::store("héllo.txt", b"x").with_utf8_flag())
            .build();
        let cd = read(archive).await;
        assert_eq!(cd.entries[0].name, "héllo.txt");
    }

    #[tokio::test]
    async fn unicode_path_extra_overrides_name() {
        let archive = ZipBuilder::new()
            .entry(Entry::store_bytes(b"mojibake.txt", b"x").with_unicode_path("正しい.txt"))
            .build();
        let cd = read(archive).await;
        assert_eq!(cd.entries[0].name, "正しい.txt");
    }

    #[tokio::test]
    async fn shift_jis_names_decode() {
        // "テスト.txt" in Shift-JIS
        let sjis: &[u8] = &[0x83, 0x65, 0x83, 0x58, 0x83, 0x67, b'.', b't', b'x', b't'];
        let archive = ZipBuilder::new()
            .entry(Entry::store_bytes(sjis, b"x"))
            .build();
        let cd = read(archive).await;
        assert_eq!(cd.entries[0].name, "テスト.txt");
    }

    #[tokio::test]
    async fn undecodable_names_fall_back_to_latin1() {
        // 0xFF is not valid Shift-JIS in any position
        let archive = ZipBuilder::new()
            .entry(Entry::store_bytes(&[b'a', 0xFF, b'b'], b"x"))
            .build();
        let cd = read(archive).await;
        assert_eq!(cd.entries[0].name, "a\u{ff}b");
    }
}
