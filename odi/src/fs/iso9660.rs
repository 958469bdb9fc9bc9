//! ISO9660 filesystem reader and a minimal writer.

use std::{
    collections::BTreeMap,
    io::{self, Write},
};

use crate::{
    array_ref,
    disc::{streams::DiscDataStream, ISO_SECTOR_SIZE},
    fs::{decode_legacy_name, decode_utf16be_name, FsEntry, FsStorage},
};

/// Volume descriptors live in sectors 16..32.
const VD_FIRST_SECTOR: u64 = 16;
const VD_LAST_SECTOR: u64 = 32;
/// Directory trees deeper than this are treated as corrupt.
const MAX_DEPTH: usize = 32;
/// Upper bound on entries; a directory loop would otherwise spin forever.
const MAX_ENTRIES: usize = 1 << 20;

struct DirExtent {
    lba: u64,
    size: u64,
}

/// Reads the ISO9660 directory tree, if the volume carries one. The Joliet
/// tree is preferred over the primary one when both are present.
///
/// Returns None when no primary volume descriptor is found, or when the
/// descriptor area announces a UDF volume instead. `base_lba` shifts the
/// absolute sector numbers in directory records into the stream's space.
pub(crate) fn read_filesystem(
    stream: &mut DiscDataStream,
    base_lba: u64,
) -> Option<Vec<FsEntry>> {
    let mut primary: Option<DirExtent> = None;
    let mut joliet: Option<DirExtent> = None;
    let mut sector = [0u8; ISO_SECTOR_SIZE];

    for lba in VD_FIRST_SECTOR..VD_LAST_SECTOR {
        if lba >= stream.sector_count() {
            break;
        }
        stream.read_sector(lba, &mut sector).ok()?;
        if &sector[1..6] == b"BEA01" {
            // Bridge discs put the UDF recognition area here; this volume
            // belongs to the UDF reader.
            return None;
        }
        if &sector[1..6] != b"CD001" {
            if primary.is_some() {
                break;
            }
            continue;
        }
        match sector[0] {
            1 if primary.is_none() => primary = Some(root_extent(&sector)?),
            2 if joliet.is_none() && has_joliet_escape(&sector) => {
                joliet = Some(root_extent(&sector)?)
            }
            0xFF => break,
            _ => {}
        }
    }

    let use_joliet = joliet.is_some();
    let root = joliet.or(primary)?;
    let mut entries = Vec::new();
    read_directory(stream, base_lba, &root, use_joliet, "", &mut entries, 0)?;
    Some(entries)
}

fn root_extent(sector: &[u8]) -> Option<DirExtent> {
    // The root directory record sits at offset 156 of the descriptor.
    let record = sector.get(156..156 + 34)?;
    Some(DirExtent {
        lba: u32::from_le_bytes(*array_ref!(record, 2, 4)) as u64,
        size: u32::from_le_bytes(*array_ref!(record, 10, 4)) as u64,
    })
}

fn has_joliet_escape(sector: &[u8]) -> bool {
    // UCS-2 level 1..3 escape sequences.
    matches!(&sector[88..91], [0x25, 0x2F, 0x40] | [0x25, 0x2F, 0x43] | [0x25, 0x2F, 0x45])
}

fn read_directory(
    stream: &mut DiscDataStream,
    base_lba: u64,
    dir: &DirExtent,
    joliet: bool,
    prefix: &str,
    entries: &mut Vec<FsEntry>,
    depth: usize,
) -> Option<()> {
    if depth > MAX_DEPTH || dir.size == 0 {
        return None;
    }
    let logical_lba = dir.lba.checked_sub(base_lba)?;
    let sectors = dir.size.div_ceil(ISO_SECTOR_SIZE as u64);
    let mut data = vec![0u8; (sectors * ISO_SECTOR_SIZE as u64) as usize];
    stream.read_exact_at(logical_lba * ISO_SECTOR_SIZE as u64, &mut data).ok()?;
    data.truncate(dir.size as usize);

    let mut offset = 0usize;
    while offset < data.len() {
        let record_len = data[offset] as usize;
        if record_len == 0 {
            // Records never straddle a sector boundary; a zero length byte
            // means the rest of the sector is padding.
            offset = (offset / ISO_SECTOR_SIZE + 1) * ISO_SECTOR_SIZE;
            continue;
        }
        let record = data.get(offset..offset + record_len)?;
        offset += record_len;
        if record_len < 34 {
            continue;
        }

        let lba = u32::from_le_bytes(*array_ref!(record, 2, 4)) as u64;
        let size = u32::from_le_bytes(*array_ref!(record, 10, 4)) as u64;
        let flags = record[25];
        let name_len = record[32] as usize;
        let name_raw = record.get(33..33 + name_len)?;
        // Self and parent links.
        if name_raw.is_empty() || name_raw == [0x00] || name_raw == [0x01] {
            continue;
        }

        let name = decode_record_name(name_raw, joliet);
        if name.is_empty() {
            continue;
        }
        let path = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };

        if flags & 0x02 != 0 {
            read_directory(
                stream,
                base_lba,
                &DirExtent { lba, size },
                joliet,
                &path,
                entries,
                depth + 1,
            )?;
        } else {
            if entries.len() >= MAX_ENTRIES {
                return None;
            }
            let start_sector = lba.checked_sub(base_lba)?;
            entries.push(FsEntry { name: path, size, storage: FsStorage::Iso { start_sector } });
        }
    }
    Some(())
}

fn decode_record_name(raw: &[u8], joliet: bool) -> String {
    let name = if joliet { decode_utf16be_name(raw) } else { decode_legacy_name(raw) };
    // File identifiers carry a ";n" version suffix.
    match name.rfind(';') {
        Some(pos) if name[pos + 1..].chars().all(|c| c.is_ascii_digit()) => {
            name[..pos].to_string()
        }
        _ => name,
    }
}

// -------------------------------------------------------------------------

#[derive(Default)]
struct DirNode {
    dirs: BTreeMap<String, DirNode>,
    files: BTreeMap<String, Vec<u8>>,
}

/// Minimal ISO9660 image writer.
///
/// Produces a primary volume descriptor with upper-cased identifiers and a
/// Joliet supplementary descriptor with a second directory tree carrying
/// the original names in UTF-16BE. File extents are shared between the two
/// trees. Intended for building small test volumes and repacking extracted
/// files, not for full mastering (no path tables, zeroed timestamps).
pub struct IsoWriter {
    volume_id: String,
    root: DirNode,
}

struct DirLayout {
    /// Serialized directory content, boundary padding included.
    content: Vec<u8>,
    lba: u64,
}

impl IsoWriter {
    /// Creates a writer with the given volume identifier (truncated to 32
    /// ASCII characters).
    #[inline]
    pub fn new(volume_id: &str) -> IsoWriter {
        IsoWriter { volume_id: volume_id.to_string(), root: DirNode::default() }
    }

    /// Adds a file at `path` (components separated by `/`). Intermediate
    /// directories are created implicitly. Adding the same path twice
    /// replaces the previous content.
    pub fn add_file(&mut self, path: &str, data: Vec<u8>) {
        let mut node = &mut self.root;
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                node.files.insert(component.to_string(), data);
                return;
            }
            node = node.dirs.entry(component.to_string()).or_default();
        }
    }

    /// Serializes the volume to `out` as a plain 2048-byte-sector image.
    pub fn finish<W: Write>(self, out: &mut W) -> io::Result<()> {
        // Layout: 16 system sectors, PVD, SVD, terminator, the primary
        // directory tree, the Joliet tree, then file extents.
        let mut next_lba = 19u64;
        let mut primary_dir_lbas = Vec::new();
        assign_dir_lbas(&self.root, false, &mut next_lba, &mut primary_dir_lbas);
        let mut joliet_dir_lbas = Vec::new();
        assign_dir_lbas(&self.root, true, &mut next_lba, &mut joliet_dir_lbas);
        let mut file_lbas = Vec::new();
        assign_file_lbas(&self.root, &mut next_lba, &mut file_lbas);
        let total_sectors = next_lba;

        let primary_layouts = build_tree_layouts(&self.root, false, &primary_dir_lbas, &file_lbas);
        let joliet_layouts = build_tree_layouts(&self.root, true, &joliet_dir_lbas, &file_lbas);
        let primary_root = dir_record_bytes(
            &[0x00],
            primary_layouts[0].lba,
            primary_layouts[0].content.len() as u64,
            true,
        );
        let joliet_root = dir_record_bytes(
            &[0x00],
            joliet_layouts[0].lba,
            joliet_layouts[0].content.len() as u64,
            true,
        );

        // System area.
        out.write_all(&vec![0u8; 16 * ISO_SECTOR_SIZE])?;
        // Primary volume descriptor.
        let mut pvd = [0u8; ISO_SECTOR_SIZE];
        pvd[0] = 1;
        pvd[1..6].copy_from_slice(b"CD001");
        pvd[6] = 1;
        write_volume_id(&mut pvd, &self.volume_id);
        both_u32(&mut pvd, 80, total_sectors as u32);
        both_u16(&mut pvd, 120, 1);
        both_u16(&mut pvd, 124, 1);
        both_u16(&mut pvd, 128, ISO_SECTOR_SIZE as u16);
        pvd[156..156 + primary_root.len()].copy_from_slice(&primary_root);
        write_volume_dates(&mut pvd);
        pvd[881] = 1;
        out.write_all(&pvd)?;
        // Joliet supplementary descriptor.
        let mut svd = pvd;
        svd[0] = 2;
        svd[88..91].copy_from_slice(&[0x25, 0x2F, 0x45]);
        svd[156..156 + 34].fill(0);
        svd[156..156 + joliet_root.len()].copy_from_slice(&joliet_root);
        out.write_all(&svd)?;
        // Terminator.
        let mut term = [0u8; ISO_SECTOR_SIZE];
        term[0] = 0xFF;
        term[1..6].copy_from_slice(b"CD001");
        term[6] = 1;
        out.write_all(&term)?;

        for layout in primary_layouts.iter().chain(&joliet_layouts) {
            write_padded(out, &layout.content)?;
        }
        let mut files = Vec::new();
        collect_files(&self.root, &mut files);
        for data in files {
            write_padded(out, data)?;
        }
        Ok(())
    }
}

fn count_dirs(node: &DirNode) -> usize {
    1 + node.dirs.values().map(count_dirs).sum::<usize>()
}

/// Encodes a directory identifier for one of the two trees.
fn encode_dir_name(name: &str, joliet: bool) -> Vec<u8> {
    if joliet {
        name.encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    } else {
        iso_d_characters(name).into_bytes()
    }
}

/// Encodes a file identifier, version suffix included.
fn encode_file_name(name: &str, joliet: bool) -> Vec<u8> {
    if joliet {
        format!("{};1", name).encode_utf16().flat_map(|u| u.to_be_bytes()).collect()
    } else {
        format!("{};1", iso_d_characters(name)).into_bytes()
    }
}

/// Uppercase, d-characters only.
fn iso_d_characters(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Assigns directory extents depth-first, computing each directory's
/// serialized size from its record lengths alone.
fn assign_dir_lbas(node: &DirNode, joliet: bool, next_lba: &mut u64, out: &mut Vec<u64>) {
    let size = dir_content_size(node, joliet);
    out.push(*next_lba);
    *next_lba += size.div_ceil(ISO_SECTOR_SIZE as u64);
    for child in node.dirs.values() {
        assign_dir_lbas(child, joliet, next_lba, out);
    }
}

fn assign_file_lbas(node: &DirNode, next_lba: &mut u64, out: &mut Vec<u64>) {
    for data in node.files.values() {
        out.push(*next_lba);
        *next_lba += (data.len() as u64).div_ceil(ISO_SECTOR_SIZE as u64).max(1);
    }
    for child in node.dirs.values() {
        assign_file_lbas(child, next_lba, out);
    }
}

/// Length of the record for a name, even-padded.
fn record_len(name_len: usize) -> usize {
    let len = 33 + name_len;
    len + (len & 1)
}

fn dir_content_size(node: &DirNode, joliet: bool) -> u64 {
    let mut size = 0usize;
    let mut add = |len: usize| {
        // Records never straddle sector boundaries; pad to the next sector
        // when one would.
        let within = size % ISO_SECTOR_SIZE;
        if within + len > ISO_SECTOR_SIZE {
            size += ISO_SECTOR_SIZE - within;
        }
        size += len;
    };
    add(34); // self
    add(34); // parent
    for name in node.dirs.keys() {
        add(record_len(encode_dir_name(name, joliet).len()));
    }
    for name in node.files.keys() {
        add(record_len(encode_file_name(name, joliet).len()));
    }
    size as u64
}

fn build_tree_layouts(
    root: &DirNode,
    joliet: bool,
    dir_lbas: &[u64],
    file_lbas: &[u64],
) -> Vec<DirLayout> {
    let mut layouts = Vec::new();
    let mut dir_index = 0usize;
    let mut file_index = 0usize;
    build_dir_layouts(root, joliet, dir_lbas, file_lbas, &mut dir_index, &mut file_index, 0, &mut layouts);
    layouts
}

#[allow(clippy::too_many_arguments)]
fn build_dir_layouts(
    node: &DirNode,
    joliet: bool,
    dir_lbas: &[u64],
    file_lbas: &[u64],
    dir_index: &mut usize,
    file_index: &mut usize,
    parent_index: usize,
    out: &mut Vec<DirLayout>,
) {
    let my_index = *dir_index;
    *dir_index += 1;
    let my_lba = dir_lbas[my_index];
    let my_size = dir_content_size(node, joliet);
    let parent_lba = dir_lbas[parent_index];

    fn push(content: &mut Vec<u8>, record: Vec<u8>) {
        let within = content.len() % ISO_SECTOR_SIZE;
        if within + record.len() > ISO_SECTOR_SIZE {
            content.resize(content.len() + ISO_SECTOR_SIZE - within, 0);
        }
        content.extend_from_slice(&record);
    }

    let mut content = Vec::new();
    push(&mut content, dir_record_bytes(&[0x00], my_lba, my_size, true));
    push(&mut content, dir_record_bytes(&[0x01], parent_lba, 0, true));

    // Child directories claim LBAs in the same DFS order they were
    // assigned in.
    let mut child_index = *dir_index;
    for (name, child) in &node.dirs {
        let child_lba = dir_lbas[child_index];
        let child_size = dir_content_size(child, joliet);
        push(&mut content, dir_record_bytes(&encode_dir_name(name, joliet), child_lba, child_size, true));
        child_index += count_dirs(child);
    }
    for (name, data) in &node.files {
        let lba = file_lbas[*file_index];
        *file_index += 1;
        push(
            &mut content,
            dir_record_bytes(&encode_file_name(name, joliet), lba, data.len() as u64, false),
        );
    }

    out.push(DirLayout { content, lba: my_lba });
    for child in node.dirs.values() {
        build_dir_layouts(child, joliet, dir_lbas, file_lbas, dir_index, file_index, my_index, out);
    }
}

fn dir_record_bytes(name: &[u8], lba: u64, size: u64, is_dir: bool) -> Vec<u8> {
    let mut record = vec![0u8; record_len(name.len())];
    record[0] = record.len() as u8;
    record[2..6].copy_from_slice(&(lba as u32).to_le_bytes());
    record[6..10].copy_from_slice(&(lba as u32).to_be_bytes());
    record[10..14].copy_from_slice(&(size as u32).to_le_bytes());
    record[14..18].copy_from_slice(&(size as u32).to_be_bytes());
    // 7-byte recording date left zeroed.
    record[25] = if is_dir { 0x02 } else { 0x00 };
    record[28..30].copy_from_slice(&1u16.to_le_bytes());
    record[30..32].copy_from_slice(&1u16.to_be_bytes());
    record[32] = name.len() as u8;
    record[33..33 + name.len()].copy_from_slice(name);
    record
}

fn write_volume_id(descriptor: &mut [u8], volume_id: &str) {
    let mut field = [b' '; 32];
    for (i, b) in volume_id.bytes().take(32).enumerate() {
        field[i] = if b.is_ascii_graphic() || b == b' ' { b.to_ascii_uppercase() } else { b'_' };
    }
    descriptor[40..72].copy_from_slice(&field);
}

fn write_volume_dates(descriptor: &mut [u8]) {
    // 17-byte ASCII timestamps; all-zero digits mean "not specified".
    let unspecified = b"0000000000000000\0";
    descriptor[813..830].copy_from_slice(unspecified);
    descriptor[830..847].copy_from_slice(unspecified);
}

fn both_u32(descriptor: &mut [u8], offset: usize, value: u32) {
    descriptor[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    descriptor[offset + 4..offset + 8].copy_from_slice(&value.to_be_bytes());
}

fn both_u16(descriptor: &mut [u8], offset: usize, value: u16) {
    descriptor[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    descriptor[offset + 2..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn write_padded<W: Write>(out: &mut W, data: &[u8]) -> io::Result<()> {
    out.write_all(data)?;
    let rem = data.len() % ISO_SECTOR_SIZE;
    let pad = if data.is_empty() {
        ISO_SECTOR_SIZE
    } else if rem != 0 {
        ISO_SECTOR_SIZE - rem
    } else {
        0
    };
    out.write_all(&vec![0u8; pad])
}

fn collect_files<'a>(node: &'a DirNode, out: &mut Vec<&'a Vec<u8>>) {
    for data in node.files.values() {
        out.push(data);
    }
    for child in node.dirs.values() {
        collect_files(child, out);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::disc::{TrackInfo, TrackMode};

    fn data_stream(image: Vec<u8>) -> DiscDataStream {
        let sectors = (image.len() as u64).div_ceil(ISO_SECTOR_SIZE as u64);
        let track = TrackInfo {
            number: 1,
            session: 1,
            start_sector: 0,
            end_sector: sectors - 1,
            length: sectors,
            sector_size: ISO_SECTOR_SIZE as u32,
            main_data_size: ISO_SECTOR_SIZE as u32,
            mode: TrackMode::Mode1,
            ..Default::default()
        };
        let mut padded = image;
        padded.resize((sectors * ISO_SECTOR_SIZE as u64) as usize, 0);
        DiscDataStream::new(Box::new(Cursor::new(padded)), vec![track])
    }

    #[test]
    fn test_write_read_round_trip() {
        let mut writer = IsoWriter::new("TEST");
        writer.add_file("readme.txt", b"hello world".to_vec());
        writer.add_file("data/a.bin", vec![0xAB; 5000]);
        writer.add_file("data/b.bin", vec![0xCD; 100]);
        let mut image = Vec::new();
        writer.finish(&mut image).unwrap();

        // The Joliet tree preserves the original names.
        let mut stream = data_stream(image);
        let mut entries = read_filesystem(&mut stream, 0).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "data/a.bin");
        assert_eq!(entries[0].size, 5000);
        assert_eq!(entries[1].name, "data/b.bin");
        assert_eq!(entries[1].size, 100);
        assert_eq!(entries[2].name, "readme.txt");
        assert_eq!(entries[2].size, 11);

        // Content survives the trip too.
        let FsStorage::Iso { start_sector } = entries[2].storage else { panic!() };
        let mut buf = vec![0u8; 11];
        stream.read_exact_at(start_sector * ISO_SECTOR_SIZE as u64, &mut buf).unwrap();
        assert_eq!(&buf, b"hello world");

        let FsStorage::Iso { start_sector } = entries[0].storage else { panic!() };
        let mut buf = vec![0u8; 5000];
        stream.read_exact_at(start_sector * ISO_SECTOR_SIZE as u64, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_primary_tree_names() {
        let mut writer = IsoWriter::new("PRIMARY");
        writer.add_file("readme.txt", b"x".to_vec());
        let mut image = Vec::new();
        writer.finish(&mut image).unwrap();

        // Blank the Joliet escape sequence; the reader must fall back to
        // the primary tree with its upper-cased identifiers.
        image[17 * ISO_SECTOR_SIZE + 88..17 * ISO_SECTOR_SIZE + 91].fill(0);
        let mut stream = data_stream(image);
        let entries = read_filesystem(&mut stream, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "README.TXT");
    }

    #[test]
    fn test_base_lba_shift() {
        let mut writer = IsoWriter::new("SHIFTED");
        writer.add_file("file.bin", vec![0x5A; 2048]);
        let mut image = Vec::new();
        writer.finish(&mut image).unwrap();

        // Shift every absolute LBA in the descriptors up by 150 to mimic a
        // track that starts at sector 150.
        let base = 150u64;
        let mut stream = data_stream(shift_image_lbas(image, base as u32));
        let entries = read_filesystem(&mut stream, base).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "file.bin");
    }

    /// Rewrites the root records and both root directory extents with LBAs
    /// shifted by `delta`, leaving the physical layout untouched.
    fn shift_image_lbas(mut image: Vec<u8>, delta: u32) -> Vec<u8> {
        for vd in [16usize, 17] {
            shift_record(&mut image, vd * ISO_SECTOR_SIZE + 156, delta);
        }
        // A single-directory tree puts the primary root at sector 19 and
        // the Joliet root at sector 20.
        for dir in [19usize, 20] {
            let mut offset = dir * ISO_SECTOR_SIZE;
            while image[offset] != 0 {
                let len = image[offset] as usize;
                shift_record(&mut image, offset, delta);
                offset += len;
            }
        }
        image
    }

    fn shift_record(image: &mut [u8], offset: usize, delta: u32) {
        let lba = u32::from_le_bytes(*array_ref!(image, offset + 2, 4)) + delta;
        image[offset + 2..offset + 6].copy_from_slice(&lba.to_le_bytes());
        image[offset + 6..offset + 10].copy_from_slice(&lba.to_be_bytes());
    }

    #[test]
    fn test_no_descriptor_returns_none() {
        let mut stream = data_stream(vec![0u8; 64 * ISO_SECTOR_SIZE]);
        assert!(read_filesystem(&mut stream, 0).is_none());
    }

    #[test]
    fn test_bea01_defers_to_udf() {
        let mut image = vec![0u8; 64 * ISO_SECTOR_SIZE];
        image[16 * ISO_SECTOR_SIZE + 1..16 * ISO_SECTOR_SIZE + 6].copy_from_slice(b"BEA01");
        let mut stream = data_stream(image);
        assert!(read_filesystem(&mut stream, 0).is_none());
    }
}
