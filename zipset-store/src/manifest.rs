//! The fileset manifest: a canonical, deterministic description of one
//! ingested archive.

use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Manifest schema marker.
pub const SCHEMA: &str = "fileset.v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: String,
    pub fileset_id: String,
    pub file_count: u64,
    pub total_bytes: u64,
    pub files: Vec<FileEntry>,
    pub warnings: Vec<String>,
}

impl Manifest {
    /// Assembles a manifest from final entries. `files` must already be
    /// sorted by path; the fileset id and the aggregates are derived here.
    pub fn build(files: Vec<FileEntry>, warnings: Vec<String>) -> Self {
        let fileset_id = fileset_id(&files);
        let total_bytes = files.iter().map(|f| f.size).sum();
        Manifest {
            schema: SCHEMA.to_string(),
            fileset_id,
            file_count: files.len() as u64,
            total_bytes,
            files,
            warnings,
        }
    }
}

/// The canonical text form hashed into the fileset id: one line per entry,
/// in final (sorted) order.
pub fn canonical_string(files: &[FileEntry]) -> String {
    files
        .iter()
        .map(|f| format!("{} sha256:{} {}\n", f.path, f.sha256, f.size))
        .collect()
}

/// `SHA-256("v1 " || canonical)`, lowercase hex.
pub fn fileset_id(files: &[FileEntry]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"v1 ");
    hasher.update(canonical_string(files).as_bytes());
    HEXLOWER.encode(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, sha256: &str, size: u64) -> FileEntry {
        FileEntry {
            path: path.into(),
            sha256: sha256.into(),
            size,
        }
    }

    #[test]
    fn empty_fileset_id_is_fixed() {
        // SHA-256 of the bare "v1 " prefix
        assert_eq!(
            fileset_id(&[]),
            "51aa814f6b8cfaf3f91b6e7e49149dd403942d284e255ce4a5e28fb44dc6a163"
        );
    }

    #[test]
    fn canonical_lines_follow_entry_order() {
        let files = vec![
            entry("a.txt", "aa".repeat(32).as_str(), 1),
            entry("b/c", "bb".repeat(32).as_str(), 20),
        ];
        let canonical = canonical_string(&files);
        assert_eq!(
            canonical,
            format!(
                "a.txt sha256:{} 1\nb/c sha256:{} 20\n",
                "aa".repeat(32),
                "bb".repeat(32)
            )
        );
    }

    #[test]
    fn single_entry_id_matches_reference() {
        let files = vec![entry(
            "hello.txt",
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03",
            6,
        )];
        assert_eq!(
            fileset_id(&files),
            "fee3b4e0eddf715383803f319d3ad3c6dbc90083abb61dfd140fadaa5cdd2ab3"
        );
    }

    #[test]
    fn build_fills_aggregates() {
        let manifest = Manifest::build(
            vec![
                entry("a", &"aa".repeat(32), 3),
                entry("b", &"bb".repeat(32), 4),
            ],
            vec!["a warning".into()],
        );
        assert_eq!(manifest.schema, SCHEMA);
        assert_eq!(manifest.file_count, 2);
        assert_eq!(manifest.total_bytes, 7);
        assert_eq!(manifest.fileset_id, fileset_id(&manifest.files));
        assert_eq!(manifest.warnings, vec!["a warning".to_string()]);
    }
}
