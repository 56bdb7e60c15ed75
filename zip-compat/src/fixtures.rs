//! In-memory ZIP builder for tests.
//!
//! Produces archives byte-by-byte so tests can exercise corners a real
//! archiver never writes: sentinel sizes without ZIP64 extras, deliberately
//! wrong CRCs, saturated EOCD counts, names in legacy encodings.

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

use crate::{
    CENTRAL_DIRECTORY_SIGNATURE, DATA_DESCRIPTOR_SIGNATURE, END_OF_CENTRAL_DIRECTORY_SIGNATURE,
    FLAG_DATA_DESCRIPTOR, FLAG_UTF8, LOCAL_FILE_HEADER_SIGNATURE, METHOD_DEFLATE, METHOD_STORE,
    UNICODE_PATH_EXTRA_TAG, ZIP64_EOCD_LOCATOR_SIGNATURE, ZIP64_EOCD_SIGNATURE, ZIP64_EXTRA_TAG,
    ZIP64_SENTINEL,
};

/// Raw-DEFLATE compression of `data`, as a ZIP body would store it.
pub fn deflate_raw(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("in-memory deflate");
    encoder.finish().expect("in-memory deflate")
}

/// One archive member, with knobs for malformed variants.
pub struct Entry {
    name: Vec<u8>,
    body: Vec<u8>,
    method: u16,
    data_descriptor: bool,
    descriptor_signature: bool,
    utf8_flag: bool,
    zip64: bool,
    unicode_path: Option<String>,
    size_override: Option<(u32, u32)>,
    lfh_crc_override: Option<u32>,
    cd_crc_override: Option<u32>,
}

impl Entry {
    fn new(name: Vec<u8>, body: Vec<u8>, method: u16) -> Self {
        Self {
            name,
            body,
            method,
            data_descriptor: false,
            descriptor_signature: true,
            utf8_flag: false,
            zip64: false,
            unicode_path: None,
            size_override: None,
            lfh_crc_override: None,
            cd_crc_override: None,
        }
    }

    pub fn store(name: &str, body: &[u8]) -> Self {
        Self::new(name.as_bytes().to_vec(), body.to_vec(), METHOD_STORE)
    }

    pub fn store_bytes(name: &[u8], body: &[u8]) -> Self {
        Self::new(name.to_vec(), body.to_vec(), METHOD_STORE)
    }

    pub fn deflate(name: &str, body: &[u8]) -> Self {
        Self::new(name.as_bytes().to_vec(), body.to_vec(), METHOD_DEFLATE)
    }

    /// A directory marker; the name should carry its trailing slash.
    pub fn directory(name: &str) -> Self {
        Self::store(name, b"")
    }

    /// Move CRC and sizes into a trailing data descriptor.
    pub fn with_data_descriptor(mut self) -> Self {
        self.data_descriptor = true;
        self
    }

    /// Write the descriptor without its optional signature word.
    pub fn without_descriptor_signature(mut self) -> Self {
        self.descriptor_signature = false;
        self
    }

    pub fn with_utf8_flag(mut self) -> Self {
        self.utf8_flag = true;
        self
    }

    /// Advertise sizes through a ZIP64 extra field (sentinels in the
    /// 32-bit columns).
    pub fn with_zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    /// Attach an Info-ZIP Unicode Path extra to the central directory
    /// record.
    pub fn with_unicode_path(mut self, path: &str) -> Self {
        self.unicode_path = Some(path.to_string());
        self
    }

    /// Write these raw 32-bit size columns into the local header, with no
    /// ZIP64 extra to back them.
    pub fn with_size_override(mut self, compressed: u32, uncompressed: u32) -> Self {
        self.size_override = Some((compressed, uncompressed));
        self
    }

    pub fn with_method(mut self, method: u16) -> Self {
        self.method = method;
        self
    }

    /// Corrupt the CRC stored in the local header.
    pub fn with_lfh_crc(mut self, crc: u32) -> Self {
        self.lfh_crc_override = Some(crc);
        self
    }

    /// Corrupt the CRC stored in the central directory.
    pub fn with_cd_crc(mut self, crc: u32) -> Self {
        self.cd_crc_override = Some(crc);
        self
    }
}

#[derive(Default)]
pub struct ZipBuilder {
    out: Vec<u8>,
    central: Vec<u8>,
    entry_count: u64,
    comment: Vec<u8>,
    zip64_eocd: bool,
    saturate_entry_count: bool,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comment(mut self, comment: &[u8]) -> Self {
        self.comment = comment.to_vec();
        self
    }

    /// Emit a ZIP64 EOCD record plus locator, saturating the classic EOCD
    /// fields.
    pub fn zip64_eocd(mut self) -> Self {
        self.zip64_eocd = true;
        self
    }

    /// Saturate the EOCD entry count without writing any ZIP64 records.
    pub fn saturate_entry_count(mut self) -> Self {
        self.saturate_entry_count = true;
        self
    }

    pub fn entry(mut self, entry: Entry) -> Self {
        let offset = self.out.len() as u64;
        let crc = crc32fast::hash(&entry.body);
        let stored = match entry.method {
            METHOD_DEFLATE => deflate_raw(&entry.body),
            _ => entry.body.clone(),
        };

        let mut flags = 0u16;
        if entry.data_descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }
        if entry.utf8_flag {
            flags |= FLAG_UTF8;
        }

        let mut lfh_extra = Vec::new();
        let (lfh_crc, lfh_csize, lfh_usize) = if entry.data_descriptor && !entry.zip64 {
            (0, 0, 0)
        } else if let Some((csize, usize_)) = entry.size_override {
            (entry.lfh_crc_override.unwrap_or(crc), csize, usize_)
        } else if entry.zip64 {
            push_extra_header(&mut lfh_extra, ZIP64_EXTRA_TAG, 16);
            push_u64(&mut lfh_extra, entry.body.len() as u64);
            push_u64(&mut lfh_extra, stored.len() as u64);
            (
                if entry.data_descriptor {
                    0
                } else {
                    entry.lfh_crc_override.unwrap_or(crc)
                },
                ZIP64_SENTINEL,
                ZIP64_SENTINEL,
            )
        } else {
            (
                entry.lfh_crc_override.unwrap_or(crc),
                stored.len() as u32,
                entry.body.len() as u32,
            )
        };

        push_u32(&mut self.out, LOCAL_FILE_HEADER_SIGNATURE);
        push_u16(&mut self.out, 20);
        push_u16(&mut self.out, flags);
        push_u16(&mut self.out, entry.method);
        push_u16(&mut self.out, 0); // mod time
        push_u16(&mut self.out, 0x21); // mod date
        push_u32(&mut self.out, lfh_crc);
        push_u32(&mut self.out, lfh_csize);
        push_u32(&mut self.out, lfh_usize);
        push_u16(&mut self.out, entry.name.len() as u16);
        push_u16(&mut self.out, lfh_extra.len() as u16);
        self.out.extend_from_slice(&entry.name);
        self.out.extend_from_slice(&lfh_extra);
        self.out.extend_from_slice(&stored);

        if entry.data_descriptor {
            if entry.descriptor_signature {
                push_u32(&mut self.out, DATA_DESCRIPTOR_SIGNATURE);
            }
            push_u32(&mut self.out, crc);
            if entry.zip64 {
                push_u64(&mut self.out, stored.len() as u64);
                push_u64(&mut self.out, entry.body.len() as u64);
            } else {
                push_u32(&mut self.out, stored.len() as u32);
                push_u32(&mut self.out, entry.body.len() as u32);
            }
        }

        // central directory record
        let mut cd_extra = Vec::new();
        let (cd_csize, cd_usize, cd_offset_32) = if entry.zip64 {
            push_extra_header(&mut cd_extra, ZIP64_EXTRA_TAG, 24);
            push_u64(&mut cd_extra, entry.body.len() as u64);
            push_u64(&mut cd_extra, stored.len() as u64);
            push_u64(&mut cd_extra, offset);
            (ZIP64_SENTINEL, ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (stored.len() as u32, entry.body.len() as u32, offset as u32)
        };
        if let Some(unicode_path) = &entry.unicode_path {
            let utf8 = unicode_path.as_bytes();
            push_extra_header(&mut cd_extra, UNICODE_PATH_EXTRA_TAG, 5 + utf8.len() as u16);
            cd_extra.push(1);
            push_u32(&mut cd_extra, crc32fast::hash(&entry.name));
            cd_extra.extend_from_slice(utf8);
        }

        push_u32(&mut self.central, CENTRAL_DIRECTORY_SIGNATURE);
        push_u16(&mut self.central, 20); // version made by
        push_u16(&mut self.central, 20); // version needed
        push_u16(&mut self.central, flags);
        push_u16(&mut self.central, entry.method);
        push_u16(&mut self.central, 0); // mod time
        push_u16(&mut self.central, 0x21); // mod date
        push_u32(&mut self.central, entry.cd_crc_override.unwrap_or(crc));
        push_u32(&mut self.central, cd_csize);
        push_u32(&mut self.central, cd_usize);
        push_u16(&mut self.central, entry.name.len() as u16);
        push_u16(&mut self.central, cd_extra.len() as u16);
        push_u16(&mut self.central, 0); // comment len
        push_u16(&mut self.central, 0); // disk number start
        push_u16(&mut self.central, 0); // internal attributes
        push_u32(&mut self.central, 0); // external attributes
        push_u32(&mut self.central, cd_offset_32);
        self.central.extend_from_slice(&entry.name);
        self.central.extend_from_slice(&cd_extra);

        self.entry_count += 1;
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let cd_offset = self.out.len() as u64;
        let cd_size = self.central.len() as u64;
        self.out.extend_from_slice(&self.central);

        if self.zip64_eocd {
            let zip64_eocd_offset = self.out.len() as u64;
            push_u32(&mut self.out, ZIP64_EOCD_SIGNATURE);
            push_u64(&mut self.out, 44); // record size, counted past this field
            push_u16(&mut self.out, 45); // version made by
            push_u16(&mut self.out, 45); // version needed
            push_u32(&mut self.out, 0); // this disk
            push_u32(&mut self.out, 0); // cd start disk
            push_u64(&mut self.out, self.entry_count);
            push_u64(&mut self.out, self.entry_count);
            push_u64(&mut self.out, cd_size);
            push_u64(&mut self.out, cd_offset);

            push_u32(&mut self.out, ZIP64_EOCD_LOCATOR_SIGNATURE);
            push_u32(&mut self.out, 0);
            push_u64(&mut self.out, zip64_eocd_offset);
            push_u32(&mut self.out, 1);
        }

        let saturated = self.zip64_eocd || self.saturate_entry_count;
        let count_16 = if saturated {
            0xFFFF
        } else {
            self.entry_count as u16
        };
        let (cd_size_32, cd_offset_32) = if self.zip64_eocd {
            (ZIP64_SENTINEL, ZIP64_SENTINEL)
        } else {
            (cd_size as u32, cd_offset as u32)
        };

        push_u32(&mut self.out, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        push_u16(&mut self.out, 0); // this disk
        push_u16(&mut self.out, 0); // cd start disk
        push_u16(&mut self.out, count_16);
        push_u16(&mut self.out, count_16);
        push_u32(&mut self.out, cd_size_32);
        push_u32(&mut self.out, cd_offset_32);
        push_u16(&mut self.out, self.comment.len() as u16);
        self.out.extend_from_slice(&self.comment);
        self.out
    }
}

fn push_extra_header(out: &mut Vec<u8>, tag: u16, len: u16) {
    push_u16(out, tag);
    push_u16(out, len);
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}
