//! On-disk layout and publish protocol of the fileset store.
//!
//! Everything lives under one root on a POSIX filesystem:
//!
//! ```text
//! objects/<hh>/<rest>        Brotli-compressed object bodies
//! filesets/<hh>/<rest>.json  fileset manifests
//! refs/<name>                named pointers to fileset ids
//! tmp/                       staging area for everything above
//! ```
//!
//! All writes are staged in `tmp/` and published with a rename, so readers
//! only ever observe fully committed files. Objects are immutable and
//! deduplicated by existence; manifests and refs are last-writer-wins.

use std::io;
use std::path::{Path, PathBuf};

use async_tempfile::TempFile;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

use crate::manifest::Manifest;

#[derive(Debug, Clone)]
pub struct FilesetStore {
    root: PathBuf,
}

impl FilesetStore {
    /// Opens (creating as needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tokio::fs::create_dir_all(root.join("objects")).await?;
        tokio::fs::create_dir_all(root.join("filesets")).await?;
        tokio::fs::create_dir_all(root.join("refs")).await?;
        tokio::fs::create_dir_all(root.join("tmp")).await?;

        Ok(Self { root })
    }

    /// Fresh staging file under `tmp/`. Committing renames it away; if it
    /// is dropped uncommitted the file is cleaned up with it.
    pub(crate) async fn scratch_file(&self) -> io::Result<TempFile> {
        TempFile::new_in(self.root.join("tmp"))
            .await
            .map_err(tempfile_error)
    }

    fn object_path(&self, sha256hex: &str) -> PathBuf {
        shard(self.root.join("objects"), sha256hex)
    }

    fn fileset_path(&self, fileset_id: &str) -> PathBuf {
        let mut path = shard(self.root.join("filesets"), fileset_id);
        path.set_extension("json");
        path
    }

    fn ref_path(&self, name: &str) -> io::Result<PathBuf> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0'])
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid ref name {name:?}"),
            ));
        }
        Ok(self.root.join("refs").join(name))
    }

    #[instrument(skip_all, ret, err, fields(object.sha256=%sha256hex))]
    pub async fn has_object(&self, sha256hex: &str) -> io::Result<bool> {
        if !is_hex64(sha256hex) {
            return Ok(false);
        }
        tokio::fs::try_exists(self.object_path(sha256hex)).await
    }

    /// Opens a stored object for reading; the contents are the Brotli
    /// form, exactly as served.
    #[instrument(skip_all, err, fields(object.sha256=%sha256hex))]
    pub async fn open_object(&self, sha256hex: &str) -> io::Result<Option<File>> {
        if !is_hex64(sha256hex) {
            return Ok(None);
        }
        match File::open(self.object_path(sha256hex)).await {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Publishes a staged object file. If the object already exists the
    /// staged file is simply abandoned; an identical object racing in from
    /// another ingest leaves the same visible state either way.
    pub(crate) async fn commit_object(&self, sha256hex: &str, staged: &Path) -> io::Result<()> {
        let dst = self.object_path(sha256hex);
        if tokio::fs::try_exists(&dst).await? {
            return Ok(());
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(staged, &dst).await?;
        Ok(())
    }

    /// Writes a manifest to its content-addressed location. Rewriting an
    /// existing manifest is permitted and replaces it atomically.
    #[instrument(skip_all, err, fields(fileset.id=%manifest.fileset_id))]
    pub async fn write_manifest(&self, manifest: &Manifest) -> io::Result<()> {
        let body = serde_json::to_vec(manifest).map_err(io::Error::other)?;
        let dst = self.fileset_path(&manifest.fileset_id);
        self.publish(&body, &dst).await
    }

    #[instrument(skip_all, err, fields(fileset.id=%fileset_id))]
    pub async fn read_manifest_bytes(&self, fileset_id: &str) -> io::Result<Option<Vec<u8>>> {
        if !is_hex64(fileset_id) {
            return Ok(None);
        }
        match tokio::fs::read(self.fileset_path(fileset_id)).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Points `refs/<name>` at a fileset id, last writer wins.
    #[instrument(skip_all, err, fields(ref_name=%name, fileset.id=%fileset_id))]
    pub async fn write_ref(&self, name: &str, fileset_id: &str) -> io::Result<()> {
        let dst = self.ref_path(name)?;
        let body = format!("{fileset_id}\n");
        self.publish(body.as_bytes(), &dst).await
    }

    #[instrument(skip_all, err, fields(ref_name=%name))]
    pub async fn read_ref(&self, name: &str) -> io::Result<Option<String>> {
        let path = match self.ref_path(name) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        match tokio::fs::read_to_string(path).await {
            Ok(body) => Ok(Some(body.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stage-then-rename for small documents (manifests, refs).
    async fn publish(&self, body: &[u8], dst: &Path) -> io::Result<()> {
        let mut staged = self.scratch_file().await?;
        staged.write_all(body).await?;
        staged.sync_all().await?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(staged.file_path(), dst).await?;
        Ok(())
    }
}

fn shard(base: PathBuf, hex: &str) -> PathBuf {
    base.join(&hex[..2]).join(&hex[2..])
}

/// Identifiers coming in from the outside must be exactly the hex form we
/// generate; anything else (wrong length, uppercase, path separators) is
/// treated as absent rather than risking a path escape.
fn is_hex64(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn tempfile_error(e: async_tempfile::Error) -> io::Error {
    match e {
        async_tempfile::Error::Io(io_error) => io_error,
        other => io::Error::new(io::ErrorKind::NotFound, other.to_string()),
    }
}
