//! Alcohol 120% reader (.mds descriptor + .mdf data file).

use std::{mem::size_of, path::Path};

use zerocopy::{
    little_endian::{I32, U16, U32, U64},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

use crate::{
    disc::{geometry::sector_layout, DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode},
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    static_assert, Result, ResultContext,
};

const MDS_SIGNATURE: &[u8; 16] = b"MEDIA DESCRIPTOR";
/// Descriptor files are tiny; anything larger is not an MDS.
const MAX_MDS_SIZE: u64 = 4 * 1024 * 1024;

#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MdsHeader {
    signature: [u8; 16],
    version_major: u8,
    version_minor: u8,
    medium_type: U16,
    num_sessions: U16,
    _unused1: [u8; 4],
    bca_length: U16,
    _unused2: [u8; 8],
    bca_data_offset: U32,
    _unused3: [u8; 24],
    disc_structures_offset: U32,
    _unused4: [u8; 12],
    sessions_blocks_offset: U32,
    dpm_blocks_offset: U32,
}

static_assert!(size_of::<MdsHeader>() == 88);

#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MdsSessionBlock {
    session_start: I32,
    session_end: I32,
    session_number: U16,
    num_all_blocks: u8,
    num_non_track_blocks: u8,
    first_track: U16,
    last_track: U16,
    _unused: U32,
    tracks_blocks_offset: U32,
}

static_assert!(size_of::<MdsSessionBlock>() == 24);

#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MdsTrackBlock {
    mode: u8,
    subchannel: u8,
    adr_ctl: u8,
    tno: u8,
    point: u8,
    min: u8,
    sec: u8,
    frame: u8,
    zero: u8,
    pmin: u8,
    psec: u8,
    pframe: u8,
    extra_offset: U32,
    sector_size: U16,
    _unused1: [u8; 18],
    start_sector: U32,
    start_offset: U64,
    number_of_files: U32,
    footer_offset: U32,
    _unused2: [u8; 24],
}

static_assert!(size_of::<MdsTrackBlock>() == 80);

/// Present for CD tracks when the track block's extra offset is valid.
#[derive(Clone, Debug, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C)]
struct MdsTrackExtraBlock {
    pregap: U32,
    length: U32,
}

static_assert!(size_of::<MdsTrackExtraBlock>() == 8);

pub(crate) struct MdsReader;

impl FormatReader for MdsReader {
    fn format(&self) -> ImageFormat { ImageFormat::Mds }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let (mds_path, mdf_path) = if ext.eq_ignore_ascii_case("mds") {
            (path.to_path_buf(), path.with_extension("mdf"))
        } else if ext.eq_ignore_ascii_case("mdf") {
            (path.with_extension("mds"), path.to_path_buf())
        } else {
            return Ok(None);
        };
        if !mds_path.is_file() || !mdf_path.is_file() {
            return Ok(None);
        }
        let mds_size = mds_path.metadata().map(|m| m.len()).unwrap_or(0);
        if mds_size < size_of::<MdsHeader>() as u64 || mds_size > MAX_MDS_SIZE {
            return Ok(None);
        }
        let mds = std::fs::read(&mds_path)
            .with_context(|| format!("Failed to read {}", mds_path.display()))?;

        let data = if ext.eq_ignore_ascii_case("mdf") {
            file.clone()
        } else {
            ImageFile::new(&mdf_path)?
        };
        Ok(parse_mds(&mds, data.len()).map(|info| ParsedImage { info, data }))
    }
}

fn parse_mds(mds: &[u8], data_size: u64) -> Option<DiscInfo> {
    let (header, _) = MdsHeader::ref_from_prefix(mds).ok()?;
    if &header.signature != MDS_SIGNATURE || header.version_major != 1 {
        return None;
    }

    let medium_type = header.medium_type.get();
    let medium = match medium_type {
        0x00 => MediumType::Cd,
        0x01 => MediumType::CdR,
        0x02 => MediumType::CdRw,
        0x10 => MediumType::Dvd,
        0x12 => MediumType::DvdR,
        _ => MediumType::Unknown,
    };
    let is_cd = medium_type <= 2;

    let mut info = DiscInfo { medium, total_size: data_size, ..Default::default() };
    let sessions_offset = header.sessions_blocks_offset.get() as usize;

    for i in 0..header.num_sessions.get() as usize {
        let offset = sessions_offset.checked_add(i * size_of::<MdsSessionBlock>())?;
        let (block, _) = MdsSessionBlock::ref_from_prefix(mds.get(offset..)?).ok()?;

        let mut tracks = parse_session_tracks(mds, block, is_cd)?;
        backfill_track_lengths(&mut tracks, block.session_end.get());
        tracks.retain(|t| t.length > 0);
        if tracks.is_empty() {
            continue;
        }

        let session_type = if tracks.iter().all(|t| t.is_audio()) {
            SessionType::Cdda
        } else if tracks.iter().any(|t| matches!(t.mode, TrackMode::Mode2 | TrackMode::Mode2Form1 | TrackMode::Mode2Form2 | TrackMode::Mode2Mixed)) {
            SessionType::CdromXa
        } else {
            SessionType::Cdrom
        };
        info.sessions.push(SessionInfo {
            number: block.session_number.get().max(1) as u8,
            session_type,
            tracks,
            ..Default::default()
        });
    }

    if info.sessions.is_empty() {
        return None;
    }
    Some(info)
}

fn parse_session_tracks(mds: &[u8], session: &MdsSessionBlock, is_cd: bool) -> Option<Vec<TrackInfo>> {
    let mut tracks = Vec::new();
    let base = session.tracks_blocks_offset.get() as usize;

    for i in 0..session.num_all_blocks as usize {
        let offset = base.checked_add(i * size_of::<MdsTrackBlock>())?;
        let (block, _) = MdsTrackBlock::ref_from_prefix(mds.get(offset..)?).ok()?;
        // Non-track blocks (lead-in entries, points A0..C0) and zero-size
        // entries are skipped.
        if block.point < 1 || block.point > 99 || block.sector_size.get() == 0 {
            continue;
        }

        let mode = match block.mode {
            0x00 => TrackMode::Mode2,
            0xA9 => TrackMode::Audio,
            0xAA => TrackMode::Mode1,
            0xAB => TrackMode::Mode2,
            0xAC => TrackMode::Mode2Form1,
            0xAD => TrackMode::Mode2Form2,
            0xEC => TrackMode::Mode2Form1,
            _ => TrackMode::Mode1,
        };

        let mut pregap = 0u32;
        let mut length = 0u64;
        let extra_offset = block.extra_offset.get();
        if is_cd {
            if extra_offset != 0 && extra_offset != u32::MAX {
                let extra = mds.get(extra_offset as usize..).and_then(|tail| {
                    MdsTrackExtraBlock::ref_from_prefix(tail).ok().map(|(b, _)| b)
                })?;
                pregap = extra.pregap.get();
                length = extra.length.get() as u64;
            }
        } else if extra_offset != u32::MAX {
            // For DVD media the field holds the track length directly.
            length = extra_offset as u64;
        }

        let sector_size = block.sector_size.get() as u32;
        let layout = sector_layout(sector_size, mode);
        let start_sector = block.start_sector.get() as u64;
        tracks.push(TrackInfo {
            number: block.point,
            session: session.session_number.get().max(1) as u8,
            start_sector,
            end_sector: if length > 0 { start_sector + length - 1 } else { 0 },
            length,
            image_offset: block.start_offset.get(),
            sector_size,
            main_data_size: layout.main_data_size,
            subchannel_size: layout.subchannel_size,
            data_offset: layout.data_offset,
            mode,
            ctl: (block.adr_ctl >> 4) & 0x0F,
            pregap,
            ..Default::default()
        });
    }
    Some(tracks)
}

/// Fills in lengths the descriptor left at zero, from the next track's
/// start or the session's end sector.
fn backfill_track_lengths(tracks: &mut [TrackInfo], session_end: i32) {
    for i in 0..tracks.len() {
        if tracks[i].length > 0 {
            continue;
        }
        let start = tracks[i].start_sector;
        let end = match tracks.get(i + 1) {
            Some(next) if next.start_sector > start => next.start_sector - 1,
            _ if session_end > 0 && session_end as u64 > start => session_end as u64 - 1,
            _ => continue,
        };
        tracks[i].end_sector = end;
        tracks[i].length = end - start + 1;
    }
}
