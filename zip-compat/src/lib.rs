//! Parsers and data structures for the ZIP wire format, used by the ingest
//! pipeline: a forward streaming reader over an async byte queue, and a
//! random-access central directory reader for reconciliation.
//!
//! Only the STORE (0) and DEFLATE (8) compression methods are understood;
//! everything else is rejected at parse time.

use thiserror::Error;

mod central;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;
mod queue;
mod stream;

pub use central::{read_central_directory, CentralDirectory, CentralEntry};
pub use queue::{ByteQueue, QueueWriter};
pub use stream::{DataDescriptor, LocalEntry, ZipStreamReader};

/// Local file header signature.
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;

/// Central directory file header signature.
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;

/// End of central directory record signature.
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;

/// ZIP64 end of central directory record signature.
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x06064b50;

/// ZIP64 end of central directory locator signature.
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// Optional data descriptor signature.
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;

/// No compression.
pub const METHOD_STORE: u16 = 0;

/// Raw DEFLATE.
pub const METHOD_DEFLATE: u16 = 8;

/// General purpose flag bit 3: sizes and CRC follow the data in a
/// data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;

/// General purpose flag bit 11: the filename is UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// Extra field tag for ZIP64 extended information.
pub(crate) const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// Extra field tag for the Info-ZIP Unicode Path field.
pub(crate) const UNICODE_PATH_EXTRA_TAG: u16 = 0x7075;

/// 32-bit sentinel indicating the real value lives in a ZIP64 extra field.
pub(crate) const ZIP64_SENTINEL: u32 = 0xFFFFFFFF;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Input truncated")]
    Truncated,

    #[error("Unsupported method {0}")]
    UnsupportedMethod(u16),

    #[error("Zip64 {0} missing")]
    Zip64FieldMissing(&'static str),

    #[error("Signature mismatch: found 0x{found:08x}, expected 0x{expected:08x}")]
    SignatureMismatch { expected: u32, found: u32 },

    #[error("End of central directory not found")]
    EocdNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Locates an extra field by tag and returns its data bytes.
/// Malformed trailing bytes end the scan without an error; writers pad
/// extra blocks often enough that strictness here would reject real
/// archives.
pub(crate) fn find_extra_field(extra: &[u8], tag: u16) -> Option<&[u8]> {
    let mut rest = extra;
    while rest.len() >= 4 {
        let id = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        rest = &rest[4..];
        if rest.len() < len {
            return None;
        }
        if id == tag {
            return Some(&rest[..len]);
        }
        rest = &rest[len..];
    }
    None
}
