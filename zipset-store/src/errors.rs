use thiserror::Error;

/// Failures that abort an in-progress ingest. All of them are fatal: no
/// manifest is written and no ref is moved. Objects committed before the
/// failure stay in the store; they are content-addressed and will be
/// reused by any later ingest of the same bytes.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ZIP too large")]
    ZipTooLarge,

    #[error("Too many entries")]
    TooManyEntries,

    #[error("File too large")]
    FileTooLarge,

    #[error("Total too large")]
    TotalTooLarge,

    #[error("Unsupported method {0} in CD")]
    UnsupportedMethodInCd(u16),

    #[error("Size mismatch (local header): header says {expected}, got {actual}")]
    SizeMismatchLocal { expected: u64, actual: u64 },

    #[error("CRC mismatch (local header): header says {expected:08x}, got {actual:08x}")]
    CrcMismatchLocal { expected: u32, actual: u32 },

    #[error("Size mismatch (DD): descriptor says {expected}, got {actual}")]
    SizeMismatchDescriptor { expected: u64, actual: u64 },

    #[error("CRC mismatch (DD): descriptor says {expected:08x}, got {actual:08x}")]
    CrcMismatchDescriptor { expected: u32, actual: u32 },

    #[error("Size/CRC mismatch vs CD for {path}")]
    CdMismatch { path: String },

    #[error("Fallback size/CRC mismatch for {path}")]
    FallbackMismatch { path: String },

    #[error("Invalid filename (NUL)")]
    FilenameNul,

    #[error("Absolute paths not allowed")]
    FilenameAbsolute,

    #[error("Parent path not allowed")]
    FilenameParent,

    #[error(transparent)]
    Zip(#[from] zip_compat::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
