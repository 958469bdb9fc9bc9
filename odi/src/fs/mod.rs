//! Filesystem readers over the logical data-sector space of a disc.

use std::sync::Arc;

use crate::disc::streams::DiscDataStream;

pub(crate) mod iso9660;
pub(crate) mod udf;

/// A file found in the disc's filesystem.
#[derive(Debug, Clone)]
pub struct FsEntry {
    /// Full path within the filesystem, `/`-separated.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    pub(crate) storage: FsStorage,
}

/// Where an entry's bytes live.
#[derive(Debug, Clone)]
pub(crate) enum FsStorage {
    /// Contiguous ISO9660 extent, in logical data sectors.
    Iso { start_sector: u64 },
    /// UDF allocation extents, resolved to logical byte ranges.
    Udf { extents: Vec<udf::UdfExtent> },
    /// Data embedded in the metadata itself (UDF inline files).
    Inline { data: Arc<[u8]> },
}

/// Probes the data tracks for a filesystem: UDF first (bridge discs carry
/// both volume structures, and UDF is the authoritative one), then ISO9660.
///
/// `base_lba` is the absolute start sector of the first data track; ISO9660
/// directory records address sectors absolutely, while the stream is
/// addressed from its own start.
pub(crate) fn probe(stream: &mut DiscDataStream, base_lba: u64) -> Option<Vec<FsEntry>> {
    if let Some(entries) = udf::read_filesystem(stream) {
        if !entries.is_empty() {
            log::debug!("Found UDF filesystem with {} entries", entries.len());
            return Some(entries);
        }
    }
    if let Some(entries) = iso9660::read_filesystem(stream, base_lba) {
        if !entries.is_empty() {
            log::debug!("Found ISO9660 filesystem with {} entries", entries.len());
            return Some(entries);
        }
    }
    None
}

/// Decodes a legacy 8-bit file name: ASCII as-is, anything else through the
/// configured legacy code page (Shift-JIS, the dominant encoding for the
/// discs this crate targets).
pub(crate) fn decode_legacy_name(raw: &[u8]) -> String {
    if raw.is_ascii() {
        String::from_utf8_lossy(raw).into_owned()
    } else {
        let (decoded, _, _) = encoding_rs::SHIFT_JIS.decode(raw);
        decoded.into_owned()
    }
}

/// Decodes a UTF-16BE name (Joliet and UDF 16-bit compression).
pub(crate) fn decode_utf16be_name(raw: &[u8]) -> String {
    let (decoded, _, _) = encoding_rs::UTF_16BE.decode(raw);
    decoded.into_owned()
}
