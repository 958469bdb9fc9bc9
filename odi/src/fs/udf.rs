//! UDF filesystem reader.
//!
//! Walks the anchor volume descriptor pointer, the volume descriptor
//! sequence, the file set descriptor and the ICB hierarchy. Only the read
//! structures needed for file extraction are parsed; named streams,
//! extended attributes and virtual partitions are out of scope.

use std::{
    collections::HashMap,
    io::{self, Read, Seek, SeekFrom},
    sync::Arc,
};

use crate::{
    array_ref,
    disc::streams::DiscDataStream,
    fs::{decode_utf16be_name, FsEntry, FsStorage},
};

/// The anchor descriptor is recorded at sector 256.
const ANCHOR_SECTOR: u64 = 256;
/// Directory trees deeper than this are treated as corrupt.
const MAX_DEPTH: usize = 32;
const MAX_ENTRIES: usize = 1 << 20;
/// Directory data larger than this is treated as corrupt.
const MAX_DIR_SIZE: u64 = 64 * 1024 * 1024;

// Descriptor tag identifiers.
const TAG_PRIMARY_VOLUME: u16 = 1;
const TAG_ANCHOR: u16 = 2;
const TAG_PARTITION: u16 = 5;
const TAG_LOGICAL_VOLUME: u16 = 6;
const TAG_TERMINATING: u16 = 8;
const TAG_FILE_SET: u16 = 256;
const TAG_FILE_ID: u16 = 257;
const TAG_FILE_ENTRY: u16 = 261;
const TAG_EXTENDED_FILE_ENTRY: u16 = 266;

/// A file's allocation extent, resolved to a byte range in the logical
/// data stream.
#[derive(Debug, Clone)]
pub(crate) struct UdfExtent {
    pub start: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy)]
struct LongAd {
    len: u32,
    pos: u32,
    partition_ref: u16,
}

impl LongAd {
    fn parse(raw: &[u8]) -> LongAd {
        LongAd {
            len: u32::from_le_bytes(*array_ref!(raw, 0, 4)),
            pos: u32::from_le_bytes(*array_ref!(raw, 4, 4)),
            partition_ref: u16::from_le_bytes(*array_ref!(raw, 8, 2)),
        }
    }

    /// Payload length; the top two bits carry the extent type.
    fn byte_len(&self) -> u32 { self.len & 0x3FFF_FFFF }

    fn extent_type(&self) -> u32 { self.len >> 30 }
}

struct UdfPartition {
    number: u16,
    /// Start sector in volume space.
    pos: u32,
}

struct UdfVolume {
    /// log2 of the volume sector size (2048 or 512).
    sec_log: u32,
    block_size: u64,
    partitions: Vec<UdfPartition>,
    /// Partition reference -> partition number, from the LVD's map table.
    partition_maps: Vec<u16>,
    file_set_location: LongAd,
}

impl UdfVolume {
    /// Resolves a long allocation descriptor to a byte offset in the
    /// logical data stream.
    fn resolve(&self, lad: &LongAd) -> Option<u64> {
        let number = *self.partition_maps.get(lad.partition_ref as usize)?;
        let partition = self.partitions.iter().find(|p| p.number == number)?;
        Some(((partition.pos as u64) << self.sec_log) + lad.pos as u64 * self.block_size)
    }
}

/// An ICB's parsed file entry.
#[derive(Clone)]
struct IcbItem {
    is_dir: bool,
    size: u64,
    extents: Vec<UdfExtent>,
    inline: Option<Arc<[u8]>>,
}

/// Verifies a descriptor tag's header checksum; returns the tag identifier.
fn check_tag(buf: &[u8]) -> Option<u16> {
    if buf.len() < 16 {
        return None;
    }
    let mut sum = 0u8;
    for (i, &b) in buf[..16].iter().enumerate() {
        if i != 4 {
            sum = sum.wrapping_add(b);
        }
    }
    if sum != buf[4] {
        return None;
    }
    Some(u16::from_le_bytes(*array_ref!(buf, 0, 2)))
}

/// Reads the UDF directory tree, if the stream carries a UDF volume.
pub(crate) fn read_filesystem(stream: &mut DiscDataStream) -> Option<Vec<FsEntry>> {
    // Most discs use 2048-byte volume sectors; 512 shows up on images of
    // rewritable media.
    for sec_log in [11u32, 9] {
        if let Some(volume) = try_open(stream, sec_log) {
            return walk_root(stream, &volume);
        }
    }
    None
}

fn try_open(stream: &mut DiscDataStream, sec_log: u32) -> Option<UdfVolume> {
    let sector_size = 1u64 << sec_log;
    let mut sector = vec![0u8; sector_size as usize];
    stream.read_exact_at(ANCHOR_SECTOR * sector_size, &mut sector).ok()?;
    if check_tag(&sector)? != TAG_ANCHOR {
        return None;
    }
    let vds_len = u32::from_le_bytes(*array_ref!(sector, 16, 4)) as u64;
    let vds_pos = u32::from_le_bytes(*array_ref!(sector, 20, 4)) as u64;

    let mut partitions = Vec::new();
    let mut logical: Option<(u64, LongAd, Vec<u16>)> = None;

    for i in 0..vds_len / sector_size {
        stream.read_exact_at((vds_pos + i) * sector_size, &mut sector).ok()?;
        let Some(tag) = check_tag(&sector) else { break };
        match tag {
            TAG_PRIMARY_VOLUME => {}
            TAG_PARTITION => {
                partitions.push(UdfPartition {
                    number: u16::from_le_bytes(*array_ref!(sector, 22, 2)),
                    pos: u32::from_le_bytes(*array_ref!(sector, 188, 4)),
                });
            }
            TAG_LOGICAL_VOLUME => {
                let block_size = u32::from_le_bytes(*array_ref!(sector, 212, 4)) as u64;
                if block_size == 0 {
                    return None;
                }
                let fsd = LongAd::parse(&sector[248..264]);
                let num_maps = u32::from_le_bytes(*array_ref!(sector, 268, 4)) as usize;
                let mut maps = Vec::with_capacity(num_maps);
                let mut offset = 440usize;
                for _ in 0..num_maps {
                    let map = sector.get(offset..offset + 6)?;
                    let map_len = map[1] as usize;
                    if map_len < 2 {
                        return None;
                    }
                    maps.push(u16::from_le_bytes(*array_ref!(map, 4, 2)));
                    offset = offset.checked_add(map_len)?;
                }
                logical = Some((block_size, fsd, maps));
            }
            TAG_TERMINATING => break,
            _ => {}
        }
    }

    let (block_size, file_set_location, partition_maps) = logical?;
    if partitions.is_empty() {
        return None;
    }
    Some(UdfVolume { sec_log, block_size, partitions, partition_maps, file_set_location })
}

fn walk_root(stream: &mut DiscDataStream, volume: &UdfVolume) -> Option<Vec<FsEntry>> {
    // File set descriptor holds the root directory ICB.
    let fsd_offset = volume.resolve(&volume.file_set_location)?;
    let mut block = vec![0u8; volume.block_size as usize];
    stream.read_exact_at(fsd_offset, &mut block).ok()?;
    if check_tag(&block)? != TAG_FILE_SET {
        return None;
    }
    let root_icb = LongAd::parse(&block[400..416]);

    let mut entries = Vec::new();
    let mut icb_cache: HashMap<u32, IcbItem> = HashMap::new();
    read_directory(stream, volume, &root_icb, "", &mut entries, &mut icb_cache, 0)?;
    Some(entries)
}

fn read_icb(
    stream: &mut DiscDataStream,
    volume: &UdfVolume,
    icb: &LongAd,
    cache: &mut HashMap<u32, IcbItem>,
) -> Option<IcbItem> {
    if let Some(item) = cache.get(&icb.pos) {
        return Some(item.clone());
    }
    let offset = volume.resolve(icb)?;
    let mut block = vec![0u8; volume.block_size as usize];
    stream.read_exact_at(offset, &mut block).ok()?;
    let item = parse_file_entry(&block, volume, icb)?;
    cache.insert(icb.pos, item.clone());
    Some(item)
}

fn parse_file_entry(block: &[u8], volume: &UdfVolume, icb: &LongAd) -> Option<IcbItem> {
    let tag = check_tag(block)?;
    let extended = match tag {
        TAG_FILE_ENTRY => false,
        TAG_EXTENDED_FILE_ENTRY => true,
        _ => return None,
    };
    let offset = if extended { 40usize } else { 0 };

    // ICB tag at 16: file type at its offset 11.
    let file_type = *block.get(27)?;
    let is_dir = file_type == 4;
    let flags = u16::from_le_bytes(*array_ref!(block.get(34..36)?, 0, 2));
    let alloc_type = flags & 3;
    let size = u64::from_le_bytes(*array_ref!(block.get(56 + offset..64 + offset)?, 0, 8));
    let ext_attr_len =
        u32::from_le_bytes(*array_ref!(block.get(168 + offset..172 + offset)?, 0, 4)) as usize;
    let alloc_desc_len =
        u32::from_le_bytes(*array_ref!(block.get(172 + offset..176 + offset)?, 0, 4)) as usize;
    let alloc_pos = (176 + offset).checked_add(ext_attr_len)?;
    let alloc_area = block.get(alloc_pos..alloc_pos.checked_add(alloc_desc_len)?)?;

    let mut item = IcbItem { is_dir, size, extents: Vec::new(), inline: None };
    match alloc_type {
        // Data embedded directly in the entry.
        3 => {
            let len = (size as usize).min(alloc_area.len());
            item.inline = Some(Arc::from(&alloc_area[..len]));
        }
        // Short allocation descriptors: same partition as the ICB.
        0 => {
            for chunk in alloc_area.chunks_exact(8) {
                let ad = LongAd {
                    len: u32::from_le_bytes(*array_ref!(chunk, 0, 4)),
                    pos: u32::from_le_bytes(*array_ref!(chunk, 4, 4)),
                    partition_ref: icb.partition_ref,
                };
                if ad.len == 0 {
                    break;
                }
                // Unrecorded extents carry no data.
                if ad.extent_type() == 0 {
                    item.extents.push(UdfExtent {
                        start: volume.resolve(&ad)?,
                        len: ad.byte_len() as u64,
                    });
                }
            }
        }
        // Long allocation descriptors.
        1 => {
            for chunk in alloc_area.chunks_exact(16) {
                let ad = LongAd::parse(chunk);
                if ad.len == 0 {
                    break;
                }
                if ad.extent_type() == 0 {
                    item.extents.push(UdfExtent {
                        start: volume.resolve(&ad)?,
                        len: ad.byte_len() as u64,
                    });
                }
            }
        }
        _ => return None,
    }
    Some(item)
}

/// Concatenates an item's data (directories are small enough to slurp).
fn read_item_data(stream: &mut DiscDataStream, item: &IcbItem) -> Option<Vec<u8>> {
    if let Some(inline) = &item.inline {
        return Some(inline.to_vec());
    }
    if item.size > MAX_DIR_SIZE {
        return None;
    }
    let mut data = Vec::with_capacity(item.size as usize);
    for extent in &item.extents {
        let take = extent.len.min(item.size as u64 - data.len() as u64);
        let mut buf = vec![0u8; take as usize];
        stream.read_exact_at(extent.start, &mut buf).ok()?;
        data.append(&mut buf);
        if data.len() as u64 >= item.size {
            break;
        }
    }
    Some(data)
}

#[allow(clippy::too_many_arguments)]
fn read_directory(
    stream: &mut DiscDataStream,
    volume: &UdfVolume,
    icb: &LongAd,
    prefix: &str,
    entries: &mut Vec<FsEntry>,
    cache: &mut HashMap<u32, IcbItem>,
    depth: usize,
) -> Option<()> {
    if depth > MAX_DEPTH {
        return None;
    }
    let dir = read_icb(stream, volume, icb, cache)?;
    if !dir.is_dir {
        return None;
    }
    let data = read_item_data(stream, &dir)?;

    let mut offset = 0usize;
    while offset + 38 <= data.len() {
        let fid = &data[offset..];
        if check_tag(fid)? != TAG_FILE_ID {
            break;
        }
        let characteristics = fid[18];
        let id_len = fid[19] as usize;
        let child_icb = LongAd::parse(fid.get(20..36)?);
        let imp_len = u16::from_le_bytes(*array_ref!(fid, 36, 2)) as usize;
        let total = (38 + imp_len + id_len + 3) & !3;
        let name_raw = fid.get(38 + imp_len..38 + imp_len + id_len)?;
        offset += total;

        // Parent link (0x08) and deleted entries (0x04).
        if characteristics & 0x0C != 0 || name_raw.is_empty() {
            continue;
        }
        let name = decode_fid_name(name_raw);
        if name.is_empty() {
            continue;
        }
        let path = if prefix.is_empty() { name } else { format!("{}/{}", prefix, name) };

        if characteristics & 0x02 != 0 {
            read_directory(stream, volume, &child_icb, &path, entries, cache, depth + 1)?;
        } else {
            if entries.len() >= MAX_ENTRIES {
                return None;
            }
            let item = read_icb(stream, volume, &child_icb, cache)?;
            let storage = match &item.inline {
                Some(data) => FsStorage::Inline { data: data.clone() },
                None => FsStorage::Udf { extents: item.extents.clone() },
            };
            entries.push(FsEntry { name: path, size: item.size, storage });
        }
    }
    Some(())
}

/// OSTA compressed unicode: a compression id byte, then 8-bit or 16-bit
/// characters.
fn decode_fid_name(raw: &[u8]) -> String {
    match raw.split_first() {
        Some((8, rest)) => String::from_utf8_lossy(rest).into_owned(),
        Some((16, rest)) => decode_utf16be_name(rest),
        _ => String::new(),
    }
}

/// Reads a UDF file as the concatenation of its recorded extents. Reads
/// past the recorded extents (sparse or truncated files) come up short.
#[derive(Clone)]
pub(crate) struct UdfFileStream {
    stream: DiscDataStream,
    extents: Vec<UdfExtent>,
    len: u64,
    pos: u64,
}

impl UdfFileStream {
    pub fn new(stream: DiscDataStream, extents: Vec<UdfExtent>, len: u64) -> UdfFileStream {
        UdfFileStream { stream, extents, len, pos: 0 }
    }
}

impl Read for UdfFileStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < out.len() && self.pos < self.len {
            // Locate the extent covering the current position.
            let mut extent_start = 0u64;
            let mut found = None;
            for extent in &self.extents {
                if self.pos < extent_start + extent.len {
                    found = Some((extent.start + (self.pos - extent_start), extent_start + extent.len));
                    break;
                }
                extent_start += extent.len;
            }
            let Some((physical, extent_end)) = found else { break };
            let available = (extent_end - self.pos).min(self.len - self.pos);
            let len = (out.len() - total).min(available as usize);
            self.stream.seek(SeekFrom::Start(physical))?;
            let read = self.stream.read(&mut out[total..total + len])?;
            if read == 0 {
                break;
            }
            self.pos += read as u64;
            total += read;
            if read < len {
                break;
            }
        }
        Ok(total)
    }
}

impl Seek for UdfFileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(p) => p,
            SeekFrom::End(p) => self.len.saturating_add_signed(p),
            SeekFrom::Current(p) => self.pos.saturating_add_signed(p),
        };
        self.pos = pos.min(self.len);
        Ok(self.pos)
    }

    #[inline]
    fn stream_position(&mut self) -> io::Result<u64> { Ok(self.pos) }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::disc::{TrackInfo, TrackMode, ISO_SECTOR_SIZE};

    const SECTOR: usize = 2048;

    fn data_stream(image: Vec<u8>) -> DiscDataStream {
        let sectors = (image.len() as u64).div_ceil(SECTOR as u64);
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
        padded.resize(sectors as usize * SECTOR, 0);
        DiscDataStream::new(Box::new(Cursor::new(padded)), vec![track])
    }

    /// Writes a descriptor tag header (id, version, checksum) at `offset`.
    fn write_tag(image: &mut [u8], offset: usize, id: u16) {
        image[offset..offset + 2].copy_from_slice(&id.to_le_bytes());
        image[offset + 2..offset + 4].copy_from_slice(&2u16.to_le_bytes());
        let mut sum = 0u8;
        for i in 0..16 {
            if i != 4 {
                sum = sum.wrapping_add(image[offset + i]);
            }
        }
        image[offset + 4] = sum;
    }

    /// Builds a minimal single-partition volume with one inline file
    /// "HELLO.TXT" containing `content`.
    fn build_volume(content: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; 320 * SECTOR];
        let part_start = 300u32; // partition start sector

        // Anchor at 256: VDS at sector 280, three sectors long.
        let avdp = 256 * SECTOR;
        image[avdp + 16..avdp + 20].copy_from_slice(&(3 * SECTOR as u32).to_le_bytes());
        image[avdp + 20..avdp + 24].copy_from_slice(&280u32.to_le_bytes());
        write_tag(&mut image, avdp, TAG_ANCHOR);

        // Partition descriptor.
        let pd = 280 * SECTOR;
        image[pd + 22..pd + 24].copy_from_slice(&0u16.to_le_bytes());
        image[pd + 188..pd + 192].copy_from_slice(&part_start.to_le_bytes());
        image[pd + 192..pd + 196].copy_from_slice(&20u32.to_le_bytes());
        write_tag(&mut image, pd, TAG_PARTITION);

        // Logical volume descriptor: FSD at partition block 0.
        let lvd = 281 * SECTOR;
        image[lvd + 212..lvd + 216].copy_from_slice(&(SECTOR as u32).to_le_bytes());
        image[lvd + 248..lvd + 252].copy_from_slice(&(SECTOR as u32).to_le_bytes()); // fsd len
        image[lvd + 252..lvd + 256].copy_from_slice(&0u32.to_le_bytes()); // fsd pos
        image[lvd + 256..lvd + 258].copy_from_slice(&0u16.to_le_bytes()); // fsd ref
        image[lvd + 264..lvd + 268].copy_from_slice(&6u32.to_le_bytes());
        image[lvd + 268..lvd + 272].copy_from_slice(&1u32.to_le_bytes());
        image[lvd + 440] = 1; // type 1 map
        image[lvd + 441] = 6;
        image[lvd + 444..lvd + 446].copy_from_slice(&0u16.to_le_bytes()); // partition 0
        write_tag(&mut image, lvd, TAG_LOGICAL_VOLUME);

        write_tag(&mut image, 282 * SECTOR, TAG_TERMINATING);

        // File set descriptor at partition block 0: root ICB at block 1.
        let fsd = part_start as usize * SECTOR;
        image[fsd + 400..fsd + 404].copy_from_slice(&(SECTOR as u32).to_le_bytes());
        image[fsd + 404..fsd + 408].copy_from_slice(&1u32.to_le_bytes());
        image[fsd + 408..fsd + 410].copy_from_slice(&0u16.to_le_bytes());
        write_tag(&mut image, fsd, TAG_FILE_SET);

        // Root directory file entry at block 1, inline FID list.
        let root = (part_start as usize + 1) * SECTOR;
        image[root + 27] = 4; // directory
        image[root + 34..root + 36].copy_from_slice(&3u16.to_le_bytes()); // inline

        // One FID for HELLO.TXT -> ICB at block 2.
        let name = b"\x08HELLO.TXT";
        let fid_len = (38 + name.len() + 3) & !3;
        let mut fid = vec![0u8; fid_len];
        fid[16..18].copy_from_slice(&1u16.to_le_bytes()); // file version
        fid[18] = 0; // plain file
        fid[19] = name.len() as u8;
        fid[20..24].copy_from_slice(&(SECTOR as u32).to_le_bytes()); // icb len
        fid[24..28].copy_from_slice(&2u32.to_le_bytes()); // icb pos
        fid[28..30].copy_from_slice(&0u16.to_le_bytes()); // icb ref
        fid[36..38].copy_from_slice(&0u16.to_le_bytes()); // imp len
        fid[38..38 + name.len()].copy_from_slice(name);
        write_tag(&mut fid, 0, TAG_FILE_ID);

        image[root + 56..root + 64].copy_from_slice(&(fid.len() as u64).to_le_bytes());
        image[root + 172..root + 176].copy_from_slice(&(fid.len() as u32).to_le_bytes());
        image[root + 176..root + 176 + fid.len()].copy_from_slice(&fid);
        write_tag(&mut image, root, TAG_FILE_ENTRY);

        // The file's entry at block 2, data inline.
        let fe = (part_start as usize + 2) * SECTOR;
        image[fe + 27] = 0;
        image[fe + 34..fe + 36].copy_from_slice(&3u16.to_le_bytes());
        image[fe + 56..fe + 64].copy_from_slice(&(content.len() as u64).to_le_bytes());
        image[fe + 172..fe + 176].copy_from_slice(&(content.len() as u32).to_le_bytes());
        image[fe + 176..fe + 176 + content.len()].copy_from_slice(content);
        write_tag(&mut image, fe, TAG_FILE_ENTRY);

        image
    }

    #[test]
    fn test_minimal_volume_inline_file() {
        let mut stream = data_stream(build_volume(b"hello udf"));
        let entries = read_filesystem(&mut stream).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "HELLO.TXT");
        assert_eq!(entries[0].size, 9);
        let FsStorage::Inline { data } = &entries[0].storage else { panic!() };
        assert_eq!(&data[..], b"hello udf");
    }

    #[test]
    fn test_checksum_rejection() {
        let mut image = build_volume(b"hello udf");
        // Flip a byte inside the anchor tag header; the checksum no longer
        // matches and the volume must be rejected.
        image[256 * SECTOR + 12] ^= 0xFF;
        let mut stream = data_stream(image);
        assert!(read_filesystem(&mut stream).is_none());
    }

    #[test]
    fn test_missing_partition_rejected() {
        let mut image = build_volume(b"hello udf");
        // Retag the partition descriptor as something else (checksum kept
        // valid); the VDS then carries a logical volume without any
        // partition.
        write_tag(&mut image, 280 * SECTOR, 7);
        let mut stream = data_stream(image);
        assert!(read_filesystem(&mut stream).is_none());
    }

    #[test]
    fn test_file_stream_reads_extents() {
        // Two non-adjacent extents of 100 and 50 bytes.
        let mut image = vec![0u8; 4 * SECTOR];
        image[100..200].fill(0xAA);
        image[1000..1050].fill(0xBB);
        let stream = data_stream(image);
        let extents =
            vec![UdfExtent { start: 100, len: 100 }, UdfExtent { start: 1000, len: 50 }];
        let mut file = UdfFileStream::new(stream, extents, 150);
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        assert_eq!(buf.len(), 150);
        assert!(buf[..100].iter().all(|&b| b == 0xAA));
        assert!(buf[100..].iter().all(|&b| b == 0xBB));
    }
}
