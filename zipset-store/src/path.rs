//! Normalization of archive member names into manifest paths.

use crate::errors::IngestError;

/// Normalizes a decoded central directory filename.
///
/// The result is a relative, forward-slash path with no `.`/`..` segments.
/// `Ok(None)` means the name normalizes to nothing (for example `./`) and
/// the entry should be dropped. Traversal attempts are errors, not skips:
/// an archive that tries to climb out of its root is rejected whole.
pub fn normalize_entry_path(raw: &str) -> Result<Option<String>, IngestError> {
    if raw.contains('\0') {
        return Err(IngestError::FilenameNul);
    }

    let mut stripped = raw;
    while let Some(rest) = stripped.strip_prefix("./") {
        stripped = rest;
    }
    // Absolute means a leading forward slash in the stored name. A leading
    // backslash is legacy-DOS noise and falls out as an empty component
    // below.
    if stripped.starts_with('/') {
        return Err(IngestError::FilenameAbsolute);
    }

    let replaced = stripped.replace('\\', "/");
    let mut components = Vec::new();
    for component in replaced.split('/') {
        match component {
            "" | "." => continue,
            ".." => return Err(IngestError::FilenameParent),
            component => components.push(component),
        }
    }

    if components.is_empty() {
        Ok(None)
    } else {
        Ok(Some(components.join("/")))
    }
}
