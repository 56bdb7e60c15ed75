//! The ingest orchestrator: one upload in, one fileset out.
//!
//! Two phases share a single pass over the upload. While the tee copies
//! the body into the spool file, the streaming phase walks local file
//! headers off the byte queue and processes each member as its bytes
//! arrive. When the body is complete, the reconciliation phase reads the
//! authoritative central directory from the spool, cross-checks every
//! streamed result, and re-processes from the spool whatever the streaming
//! phase could not handle (STORE members with data descriptors, and
//! anything after them).

use std::collections::HashMap;
use std::io::{self, SeekFrom};

use async_compression::tokio::bufread::DeflateDecoder;
use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, BufReader};
use tracing::{debug, instrument};
use zip_compat::{
    read_central_directory, ByteQueue, CentralEntry, ZipStreamReader,
    LOCAL_FILE_HEADER_SIGNATURE, METHOD_DEFLATE, METHOD_STORE,
};

use crate::errors::IngestError;
use crate::manifest::{FileEntry, Manifest};
use crate::object::{process_entry, ProcessedEntry};
use crate::path::normalize_entry_path;
use crate::spool::{create_spool, run_tee, SpoolGuard};
use crate::store::FilesetStore;

/// Upload limits, enforced during ingest.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_entries: u64,
    pub max_file_bytes: u64,
    pub max_total_bytes: u64,
    pub max_zip_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_entries: 8000,
            max_file_bytes: 500 * 1024 * 1024,
            max_total_bytes: 2 * 1024 * 1024 * 1024,
            max_zip_bytes: 300 * 1024 * 1024,
        }
    }
}

/// A successful ingest.
#[derive(Debug)]
pub struct IngestOutcome {
    pub fileset_id: String,
    pub manifest: Manifest,
    /// Name of the ref that was pointed at the fileset, when one was.
    pub updated_ref: Option<String>,
}

/// Ingests one ZIP upload into the store.
///
/// On success the manifest has been written and the optional ref updated.
/// On failure neither exists, though objects committed before the failure
/// remain (they are content-addressed and harmless). The spool file is
/// removed either way unless `keep_spool` is set.
#[instrument(skip_all, err, fields(update_ref = update_ref.unwrap_or("")))]
pub async fn ingest_zip<S>(
    store: &FilesetStore,
    body: S,
    limits: &Limits,
    update_ref: Option<&str>,
    keep_spool: bool,
) -> Result<IngestOutcome, IngestError>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    let (queue_writer, queue) = ByteQueue::pair();
    let (spool_path, mut spool_file) = create_spool().await?;
    let spool = SpoolGuard::new(spool_path, keep_spool);

    let mut zip = ZipStreamReader::new(queue);
    let mut streamed: HashMap<String, ProcessedEntry> = HashMap::new();
    let mut warnings: Vec<String> = Vec::new();
    let mut total_raw = 0u64;

    let tee = run_tee(body, &mut spool_file, queue_writer, limits.max_zip_bytes);
    let streaming = async {
        let res = streaming_phase(
            store,
            &mut zip,
            limits,
            &mut streamed,
            &mut warnings,
            &mut total_raw,
        )
        .await;
        if res.is_err() {
            // unblock the tee; this failure is fatal regardless of what
            // the rest of the upload holds
            zip.abandon();
        }
        res
    };
    let (tee_res, stream_res) = tokio::join!(tee, streaming);
    // the tee error is authoritative: a cap overflow or broken body often
    // shows up in the parser as a truncated stream first
    tee_res?;
    stream_res?;
    drop(spool_file);

    // reconciliation against the authoritative central directory
    let mut spool_read = File::open(spool.path()).await?;
    let cd = read_central_directory(&mut spool_read).await?;
    warnings.extend(cd.warnings);
    if cd.entries.len() as u64 > limits.max_entries {
        return Err(IngestError::TooManyEntries);
    }

    let mut files: Vec<FileEntry> = Vec::new();
    let mut index_by_path: HashMap<String, usize> = HashMap::new();
    for entry in &cd.entries {
        if entry.is_directory {
            continue;
        }
        if entry.method != METHOD_STORE && entry.method != METHOD_DEFLATE {
            return Err(IngestError::UnsupportedMethodInCd(entry.method));
        }
        let Some(path) = normalize_entry_path(&entry.name)? else {
            continue;
        };

        let processed = match streamed.get(&entry.local_header_offset.to_string()) {
            Some(rec) => {
                if rec.size != entry.uncompressed_size || rec.crc32 != entry.crc32 {
                    return Err(IngestError::CdMismatch { path });
                }
                rec.clone()
            }
            None => {
                debug!(path=%path, offset=entry.local_header_offset, "falling back to spool");
                fallback_entry(store, &mut spool_read, entry, limits, &path, &mut total_raw)
                    .await?
            }
        };

        let file = FileEntry {
            path: path.clone(),
            sha256: processed.sha256,
            size: processed.size,
        };
        if let Some(&at) = index_by_path.get(&path) {
            warnings.push(format!("Duplicate path: {path} (last wins)"));
            files[at] = file;
        } else {
            index_by_path.insert(path, files.len());
            files.push(file);
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    let manifest = Manifest::build(files, warnings);
    store.write_manifest(&manifest).await?;

    let updated_ref = match update_ref {
        Some(name) if !name.is_empty() => {
            store.write_ref(name, &manifest.fileset_id).await?;
            Some(name.to_string())
        }
        _ => None,
    };

    Ok(IngestOutcome {
        fileset_id: manifest.fileset_id.clone(),
        manifest,
        updated_ref,
    })
}

/// Walks local file headers as they arrive, processing member bodies in
/// archive order. Results are keyed by the decimal local header offset,
/// the one value the central directory shares verbatim.
async fn streaming_phase(
    store: &FilesetStore,
    zip: &mut ZipStreamReader,
    limits: &Limits,
    streamed: &mut HashMap<String, ProcessedEntry>,
    warnings: &mut Vec<String>,
    total_raw: &mut u64,
) -> Result<(), IngestError> {
    let mut entry_count = 0u64;
    while let Some(header) = zip.next_header().await? {
        entry_count += 1;
        if entry_count > limits.max_entries {
            return Err(IngestError::TooManyEntries);
        }

        if header.has_data_descriptor() && header.method == METHOD_STORE {
            // a stored body of unknown length cannot be framed without
            // scanning payload for descriptor signatures; leave this
            // member (and whatever follows) to the spool fallback
            warnings.push(format!(
                "Deferred STORE+DD at offset {}",
                header.local_header_offset
            ));
            zip.abandon();
            break;
        }

        let processed = if header.has_data_descriptor() {
            let decoder = DeflateDecoder::new(zip.body_unknown());
            let processed = process_entry(store, decoder, limits.max_file_bytes).await?;
            let descriptor = zip.read_data_descriptor(header.zip64_descriptor()).await?;
            if descriptor.uncompressed_size != processed.size {
                return Err(IngestError::SizeMismatchDescriptor {
                    expected: descriptor.uncompressed_size,
                    actual: processed.size,
                });
            }
            if descriptor.crc32 != processed.crc32 {
                return Err(IngestError::CrcMismatchDescriptor {
                    expected: descriptor.crc32,
                    actual: processed.crc32,
                });
            }
            processed
        } else {
            let mut body = zip.body_exact(header.compressed_size);
            let processed = if header.method == METHOD_DEFLATE {
                process_entry(store, DeflateDecoder::new(&mut body), limits.max_file_bytes)
                    .await?
            } else {
                process_entry(store, &mut body, limits.max_file_bytes).await?
            };
            // keep framing exact even if the deflate stream stopped short
            // of the advertised compressed size
            tokio::io::copy(&mut body, &mut tokio::io::sink()).await?;

            if header.uncompressed_size != 0 && header.uncompressed_size != processed.size {
                return Err(IngestError::SizeMismatchLocal {
                    expected: header.uncompressed_size,
                    actual: processed.size,
                });
            }
            if header.crc32 != 0 && header.crc32 != processed.crc32 {
                return Err(IngestError::CrcMismatchLocal {
                    expected: header.crc32,
                    actual: processed.crc32,
                });
            }
            processed
        };

        *total_raw += processed.size;
        if *total_raw > limits.max_total_bytes {
            return Err(IngestError::TotalTooLarge);
        }
        streamed.insert(header.local_header_offset.to_string(), processed);
    }
    Ok(())
}

/// Re-processes one member by random access to the spool, using the
/// central directory's sizes for framing and its CRC for verification.
async fn fallback_entry(
    store: &FilesetStore,
    spool: &mut File,
    entry: &CentralEntry,
    limits: &Limits,
    path: &str,
    total_raw: &mut u64,
) -> Result<ProcessedEntry, IngestError> {
    spool
        .seek(SeekFrom::Start(entry.local_header_offset))
        .await?;
    let mut lfh = [0u8; 30];
    spool.read_exact(&mut lfh).await?;
    let found = u32::from_le_bytes([lfh[0], lfh[1], lfh[2], lfh[3]]);
    if found != LOCAL_FILE_HEADER_SIGNATURE {
        return Err(zip_compat::Error::SignatureMismatch {
            expected: LOCAL_FILE_HEADER_SIGNATURE,
            found,
        }
        .into());
    }
    let name_len = u64::from(u16::from_le_bytes([lfh[26], lfh[27]]));
    let extra_len = u64::from(u16::from_le_bytes([lfh[28], lfh[29]]));
    let data_start = entry.local_header_offset + 30 + name_len + extra_len;

    spool.seek(SeekFrom::Start(data_start)).await?;
    let body = (&mut *spool).take(entry.compressed_size);
    let processed = if entry.method == METHOD_DEFLATE {
        let decoder = DeflateDecoder::new(BufReader::new(body));
        process_entry(store, decoder, limits.max_file_bytes).await?
    } else {
        process_entry(store, body, limits.max_file_bytes).await?
    };

    if processed.size != entry.uncompressed_size || processed.crc32 != entry.crc32 {
        return Err(IngestError::FallbackMismatch {
            path: path.to_string(),
        });
    }

    *total_raw += processed.size;
    if *total_raw > limits.max_total_bytes {
        return Err(IngestError::TotalTooLarge);
    }
    Ok(processed)
}
