//! Content-addressable fileset store and the ZIP ingest pipeline that
//! feeds it.
//!
//! Objects are the decompressed bytes of individual archive members,
//! identified by the SHA-256 of those bytes and persisted Brotli-compressed
//! under a sharded on-disk layout. A successful ingest additionally writes
//! a fileset manifest (the canonical list of `(path, sha256, size)`
//! triples, identified by its own SHA-256) and optionally points a named
//! ref at it.

mod errors;
mod hashing_reader;
mod ingest;
mod manifest;
mod object;
mod path;
mod spool;
mod store;

pub use errors::IngestError;
pub use hashing_reader::HashingReader;
pub use ingest::{ingest_zip, IngestOutcome, Limits};
pub use manifest::{canonical_string, fileset_id, FileEntry, Manifest, SCHEMA};
pub use object::ProcessedEntry;
pub use path::normalize_entry_path;
pub use store::FilesetStore;
