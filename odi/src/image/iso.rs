//! Raw ISO / BIN reader.
//!
//! Last-resort probe: no container metadata, so layout is inferred from the
//! file size and the filesystem signature at sector 16. A handful of known
//! sector strides are tried until one lines up.

use std::path::Path;

use crate::{
    disc::{
        geometry::has_sync_pattern,
        DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode,
        RAW_SECTOR_SIZE, SECTORS_PER_SECOND,
    },
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    Result, ResultContext,
};

/// Anything shorter than four seconds of audio cannot be a disc image.
const MIN_SECTORS: u64 = 4 * SECTORS_PER_SECOND;

/// (main data size, data offset) candidates for the signature probe.
const VALID_SECTOR_SIZES: &[(u32, u32)] = &[(2048, 0), (2332, 8), (2336, 8), (2352, 16), (2352, 24)];
/// Subchannel sizes tried for each candidate.
const SUBCHANNEL_SIZES: &[u32] = &[0, 16, 96];

pub(crate) struct IsoReader;

impl FormatReader for IsoReader {
    fn format(&self) -> ImageFormat { ImageFormat::Iso }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        let file_size = file.len();
        if file_size < MIN_SECTORS * 2048 {
            return Ok(None);
        }

        if let Some(info) = probe_nintendo(path, file)? {
            return Ok(Some(ParsedImage { info, data: file.clone() }));
        }

        for &sub in SUBCHANNEL_SIZES {
            for &(main, data_offset) in VALID_SECTOR_SIZES {
                let sector_size = main + sub;
                if file_size % sector_size as u64 != 0 {
                    continue;
                }
                let sig_offset = 16 * sector_size as u64 + data_offset as u64;
                let Some(sig) = file
                    .read_at(sig_offset, 8)
                    .with_context(|| format!("Probing {}", path.display()))?
                else {
                    continue;
                };
                if !check_iso_signature(&sig) {
                    continue;
                }
                let mode = determine_track_mode(file, main, sector_size)?;
                let info = single_track_info(file_size, sector_size, main, sub, data_offset, mode);
                return Ok(Some(ParsedImage { info, data: file.clone() }));
            }
        }

        // No filesystem signature; accept raw CD audio when the size lines
        // up with full 2352-byte sectors.
        if file_size % RAW_SECTOR_SIZE as u64 == 0
            && file_size >= MIN_SECTORS * RAW_SECTOR_SIZE as u64
        {
            let info =
                single_track_info(file_size, RAW_SECTOR_SIZE as u32, RAW_SECTOR_SIZE as u32, 0, 0, TrackMode::Audio);
            return Ok(Some(ParsedImage { info, data: file.clone() }));
        }
        Ok(None)
    }
}

/// GameCube and Wii discs are plain 2048-byte images with magic words in
/// the first sector instead of an ISO9660 descriptor.
fn probe_nintendo(path: &Path, file: &mut ImageFile) -> Result<Option<DiscInfo>> {
    if file.len() % 2048 != 0 {
        return Ok(None);
    }
    let Some(head) = file
        .read_at(0, 0x20)
        .with_context(|| format!("Probing {}", path.display()))?
    else {
        return Ok(None);
    };
    let gamecube = head[0x1C..0x20] == [0xC2, 0x33, 0x9F, 0x3D];
    let wii = head[0x18..0x1C] == [0x5D, 0x1C, 0x9E, 0xA3];
    if !gamecube && !wii {
        return Ok(None);
    }
    Ok(Some(single_track_info(file.len(), 2048, 2048, 0, 0, TrackMode::Mode1)))
}

fn check_iso_signature(sig: &[u8]) -> bool {
    // Volume descriptor: either the identifier at the very start, or a
    // descriptor-type byte followed by "CD001" (ISO9660) or "BEA01" (UDF
    // bridge) as stored on disc.
    sig.starts_with(b"CD001")
        || (sig[0] <= 2 && (&sig[1..6] == b"CD001" || &sig[1..6] == b"BEA01"))
}

fn determine_track_mode(file: &mut ImageFile, main: u32, sector_size: u32) -> Result<TrackMode> {
    if main != 2352 {
        return Ok(match main {
            2048 => TrackMode::Mode1,
            2332 | 2336 => TrackMode::Mode2Mixed,
            _ => TrackMode::Mode1,
        });
    }
    // Raw sectors carry their own mode byte; trust sector 16's header.
    match file.read_at(16 * sector_size as u64, 16).context("Reading sector header")? {
        Some(header) if has_sync_pattern(&header) => Ok(match header[15] {
            0 => TrackMode::Audio,
            1 => TrackMode::Mode1,
            2 => TrackMode::Mode2Mixed,
            _ => TrackMode::Mode1,
        }),
        Some(_) => Ok(TrackMode::Audio),
        None => Ok(TrackMode::Mode1),
    }
}

fn single_track_info(
    file_size: u64,
    sector_size: u32,
    main_data_size: u32,
    subchannel_size: u32,
    data_offset: u32,
    mode: TrackMode,
) -> DiscInfo {
    let num_sectors = file_size / sector_size as u64;
    let is_audio = mode == TrackMode::Audio;
    let track = TrackInfo {
        number: 1,
        session: 1,
        start_sector: 0,
        end_sector: num_sectors - 1,
        length: num_sectors,
        image_offset: 0,
        sector_size,
        main_data_size,
        subchannel_size,
        data_offset: if is_audio { 0 } else { data_offset },
        mode,
        ctl: if is_audio { 0x00 } else { 0x04 },
        ..Default::default()
    };
    DiscInfo {
        medium: MediumType::Cd,
        sessions: vec![SessionInfo {
            number: 1,
            session_type: if is_audio { SessionType::Cdda } else { SessionType::Cdrom },
            tracks: vec![track],
            ..Default::default()
        }],
        total_size: file_size,
        ..Default::default()
    }
}
