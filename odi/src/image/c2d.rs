//! WinOnCD reader (.c2d).

use std::{collections::BTreeMap, mem::size_of, path::Path};

use zerocopy::{
    little_endian::{U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    disc::{DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode},
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    static_assert, Result, ResultContext,
};

const SIGNATURE_ADAPTEC: &[u8; 32] = b"Adaptec CeQuadrat VirtualCD File";
const SIGNATURE_ROXIO: &[u8] = b"Roxio Image File Format 3.0";

#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct C2dHeaderBlock {
    signature: [u8; 32],
    header_size: U16,
    has_upc_ean: U16,
    upc_ean: [u8; 13],
    _unused1: u8,
    num_track_blocks: U16,
    size_cdtext: U32,
    offset_tracks: U32,
    _unused2: U32,
    description: [u8; 128],
    offset_c2ck: U32,
}

static_assert!(size_of::<C2dHeaderBlock>() == 196);

#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct C2dTrackBlock {
    block_size: U32,
    first_sector: U32,
    last_sector: U32,
    image_offset: U64,
    sector_size: U32,
    isrc: [u8; 12],
    flags: u8,
    session: u8,
    point: u8,
    index: u8,
    mode: u8,
    compressed: u8,
    _unused: U16,
}

static_assert!(size_of::<C2dTrackBlock>() == 44);

pub(crate) struct C2dReader;

impl FormatReader for C2dReader {
    fn format(&self) -> ImageFormat { ImageFormat::C2d }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        let Some(header_bytes) = file
            .read_at(0, size_of::<C2dHeaderBlock>())
            .with_context(|| format!("Reading C2D header of {}", path.display()))?
        else {
            return Ok(None);
        };
        let (header, _) = match C2dHeaderBlock::ref_from_prefix(&header_bytes) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };
        if &header.signature != SIGNATURE_ADAPTEC
            && &header.signature[..SIGNATURE_ROXIO.len()] != SIGNATURE_ROXIO
        {
            return Ok(None);
        }
        if (header.header_size.get() as usize) < size_of::<C2dHeaderBlock>() {
            return Ok(None);
        }

        let num_tracks = header.num_track_blocks.get() as usize;
        let tracks_offset = header.offset_tracks.get() as u64;
        let Some(track_bytes) = file
            .read_at(tracks_offset, num_tracks * size_of::<C2dTrackBlock>())
            .with_context(|| format!("Reading C2D track blocks of {}", path.display()))?
        else {
            return Ok(None);
        };

        Ok(build_disc_info(header, &track_bytes, num_tracks, file.len())
            .map(|info| ParsedImage { info, data: file.clone() }))
    }
}

fn build_disc_info(
    header: &C2dHeaderBlock,
    track_bytes: &[u8],
    num_tracks: usize,
    file_size: u64,
) -> Option<DiscInfo> {
    let mut sessions: BTreeMap<u8, Vec<TrackInfo>> = BTreeMap::new();

    for i in 0..num_tracks {
        let offset = i * size_of::<C2dTrackBlock>();
        let (block, _) = C2dTrackBlock::ref_from_prefix(track_bytes.get(offset..)?).ok()?;
        if block.compressed != 0 {
            log::warn!("Skipping compressed track {} in C2D image", block.point);
            continue;
        }
        let first_sector = block.first_sector.get() as u64;
        let last_sector = block.last_sector.get() as u64;
        if last_sector < first_sector {
            return None;
        }

        let mode = match block.mode {
            0x00 | 0xFF => TrackMode::Audio,
            0x01 => TrackMode::Mode1,
            0x02 => TrackMode::Mode2,
            _ => TrackMode::Audio,
        };
        let sector_size = block.sector_size.get();
        let (main_data_size, subchannel_size) = if sector_size == 2448 {
            (2352, 96)
        } else {
            (sector_size, 0)
        };
        let data_offset =
            if mode != TrackMode::Audio && main_data_size > 2048 { 16 } else { 0 };

        let tracks = sessions.entry(block.session.max(1)).or_default();
        // Index blocks beyond index 1 repeat the track; only the index 1
        // block contributes a new track entry.
        if let Some(existing) = tracks.iter_mut().find(|t| t.number == block.point) {
            if block.index == 1 {
                existing.isrc = decode_isrc(&block.isrc);
            } else if block.index >= 2 {
                existing.indices.push(first_sector);
            }
            continue;
        }

        tracks.push(TrackInfo {
            number: block.point,
            session: block.session.max(1),
            start_sector: first_sector,
            end_sector: last_sector,
            length: last_sector - first_sector + 1,
            image_offset: block.image_offset.get(),
            sector_size,
            main_data_size,
            subchannel_size,
            data_offset,
            mode,
            ctl: if mode == TrackMode::Audio { 0x00 } else { 0x04 },
            isrc: if block.index == 1 { decode_isrc(&block.isrc) } else { None },
            flags: block.flags,
            ..Default::default()
        });
    }

    let mut info = DiscInfo { medium: MediumType::Cd, total_size: file_size, ..Default::default() };
    let description = &header.description;
    if description.iter().any(|&b| b != 0) {
        info.title = Some(String::from_utf8_lossy(description).trim_end_matches('\0').to_string());
    }
    let mcn = if header.has_upc_ean.get() != 0 { decode_isrc(&header.upc_ean) } else { None };

    for (number, mut tracks) in sessions {
        tracks.sort_by_key(|t| t.number);
        let session_type = if tracks.iter().all(|t| t.is_audio()) {
            SessionType::Cdda
        } else if tracks.iter().any(|t| t.mode == TrackMode::Mode2) {
            SessionType::CdromXa
        } else {
            SessionType::Cdrom
        };
        info.sessions.push(SessionInfo {
            number,
            session_type,
            mcn: if info.sessions.is_empty() { mcn.clone() } else { None },
            tracks,
            ..Default::default()
        });
    }

    if info.sessions.is_empty() {
        return None;
    }
    Some(info)
}

fn decode_isrc(raw: &[u8]) -> Option<String> {
    if raw.iter().all(|&b| b == 0) {
        return None;
    }
    Some(String::from_utf8_lossy(raw).trim_end_matches('\0').to_string())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::*;

    fn build_c2d(num_sectors: u32, compressed: bool) -> Vec<u8> {
        let header = C2dHeaderBlock {
            signature: *SIGNATURE_ADAPTEC,
            header_size: 196.into(),
            has_upc_ean: 1.into(),
            upc_ean: *b"1234567890123",
            _unused1: 0,
            num_track_blocks: 1.into(),
            size_cdtext: 0.into(),
            offset_tracks: 196.into(),
            _unused2: 0.into(),
            description: [0; 128],
            offset_c2ck: 0.into(),
        };
        let track = C2dTrackBlock {
            block_size: 44.into(),
            first_sector: 0.into(),
            last_sector: (num_sectors - 1).into(),
            image_offset: 240.into(),
            sector_size: 2352.into(),
            isrc: [0; 12],
            flags: 0,
            session: 1,
            point: 1,
            index: 1,
            mode: 1,
            compressed: compressed as u8,
            _unused: 0.into(),
        };
        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(track.as_bytes());
        out.resize(240 + num_sectors as usize * 2352, 0);
        out
    }

    fn temp_file(name: &str, data: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_parse_single_track() {
        let path = temp_file("odi_c2d_single.c2d", &build_c2d(75, false));
        let mut file = ImageFile::new(&path).unwrap();
        let parsed = C2dReader.try_parse(&path, &mut file).unwrap().unwrap();
        let info = parsed.info;
        info.validate().unwrap();
        assert_eq!(info.sessions.len(), 1);
        assert_eq!(info.sessions[0].mcn.as_deref(), Some("1234567890123"));
        let track = &info.sessions[0].tracks[0];
        assert_eq!(track.mode, TrackMode::Mode1);
        assert_eq!(track.length, 75);
        assert_eq!(track.image_offset, 240);
        assert_eq!(track.main_data_size, 2352);
        assert_eq!(track.data_offset, 16);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_compressed_track_skipped() {
        let path = temp_file("odi_c2d_compressed.c2d", &build_c2d(75, true));
        let mut file = ImageFile::new(&path).unwrap();
        // The only track is compressed, so the image yields no layout.
        assert!(C2dReader.try_parse(&path, &mut file).unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_bad_signature() {
        let mut image = build_c2d(10, false);
        image[0] = b'X';
        let path = temp_file("odi_c2d_badsig.c2d", &image);
        let mut file = ImageFile::new(&path).unwrap();
        assert!(C2dReader.try_parse(&path, &mut file).unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_subchannel_sector_size() {
        let mut image = build_c2d(10, false);
        // Patch the track block's sector size to 2448.
        image[196 + 20..196 + 24].copy_from_slice(&2448u32.to_le_bytes());
        image.resize(240 + 10 * 2448, 0);
        let path = temp_file("odi_c2d_sub.c2d", &image);
        let mut file = ImageFile::new(&path).unwrap();
        let parsed = C2dReader.try_parse(&path, &mut file).unwrap().unwrap();
        let track = &parsed.info.sessions[0].tracks[0];
        assert_eq!(track.sector_size, 2448);
        assert_eq!(track.main_data_size, 2352);
        assert_eq!(track.subchannel_size, 96);
        fs::remove_file(&path).ok();
    }
}
