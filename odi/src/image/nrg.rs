//! Nero Burning ROM reader (.nrg).
//!
//! NRG metadata lives in a chunk list at the end of the file, located by a
//! trailer: "NER5" (64-bit offsets) or the older "NERO" (32-bit). All
//! multi-byte integers in the chunk area are big-endian.

use std::path::Path;

use crate::{
    array_ref,
    disc::{DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode},
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    Result, ResultContext,
};

/// The chunk area is metadata only; refuse to slurp anything larger.
const MAX_CHUNK_AREA: u64 = 16 * 1024 * 1024;

struct NrgChunk {
    id: [u8; 4],
    /// Offset of the chunk payload within the chunk area buffer.
    offset: usize,
    length: usize,
}

pub(crate) struct NrgReader;

impl FormatReader for NrgReader {
    fn format(&self) -> ImageFormat { ImageFormat::Nrg }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        let file_size = file.len();
        if file_size < 12 {
            return Ok(None);
        }
        // New-style trailer first: "NER5" + u64 offset in the last 12 bytes.
        let trailer = file
            .read_at(file_size - 12, 12)
            .with_context(|| format!("Reading NRG trailer of {}", path.display()))?;
        let Some(trailer) = trailer else { return Ok(None) };
        let chunk_offset = if &trailer[0..4] == b"NER5" {
            u64::from_be_bytes(*array_ref!(trailer, 4, 8))
        } else if &trailer[4..8] == b"NERO" {
            u32::from_be_bytes(*array_ref!(trailer, 8, 4)) as u64
        } else {
            return Ok(None);
        };
        if chunk_offset >= file_size || file_size - chunk_offset > MAX_CHUNK_AREA {
            return Ok(None);
        }

        let area_len = (file_size - chunk_offset) as usize;
        let Some(area) = file
            .read_at(chunk_offset, area_len)
            .with_context(|| format!("Reading NRG chunk area of {}", path.display()))?
        else {
            return Ok(None);
        };
        Ok(parse_chunks(&area)
            .and_then(|chunks| build_disc_info(&area, &chunks, file_size))
            .map(|info| ParsedImage { info, data: file.clone() }))
    }
}

/// Walks the chunk list: 4-byte id, u32 length, payload. Stops at "END!".
fn parse_chunks(area: &[u8]) -> Option<Vec<NrgChunk>> {
    let mut chunks = Vec::new();
    let mut offset = 0usize;
    while offset + 8 <= area.len() {
        let id = *array_ref!(area, offset, 4);
        if &id == b"END!" {
            return Some(chunks);
        }
        let length = u32::from_be_bytes(*array_ref!(area, offset + 4, 4)) as usize;
        offset = offset.checked_add(8)?;
        if offset.checked_add(length)? > area.len() {
            return None;
        }
        chunks.push(NrgChunk { id, offset, length });
        offset += length;
    }
    None
}

fn build_disc_info(area: &[u8], chunks: &[NrgChunk], file_size: u64) -> Option<DiscInfo> {
    let mut info = DiscInfo { medium: MediumType::Cd, total_size: file_size, ..Default::default() };

    if let Some(mtyp) = chunks.iter().find(|c| &c.id == b"MTYP") {
        if mtyp.length >= 4 {
            let value = u32::from_be_bytes(*array_ref!(area, mtyp.offset, 4));
            info.medium = decode_medium_type(value);
        }
    }

    // Disc-at-once sessions; DAOI carries 32-bit offsets, DAOX 64-bit.
    for chunk in chunks.iter().filter(|c| &c.id == b"DAOI" || &c.id == b"DAOX") {
        let new_format = &chunk.id == b"DAOX";
        let session_number = info.sessions.len() as u8 + 1;
        let session = parse_dao_session(area, chunk, new_format, session_number)?;
        if !session.tracks.is_empty() {
            info.sessions.push(session);
        }
    }
    // Track-at-once session chunks.
    for chunk in chunks.iter().filter(|c| &c.id == b"ETNF" || &c.id == b"ETN2") {
        let new_format = &chunk.id == b"ETN2";
        let session_number = info.sessions.len() as u8 + 1;
        let session = parse_tao_session(area, chunk, new_format, session_number)?;
        if !session.tracks.is_empty() {
            info.sessions.push(session);
        }
    }

    if info.sessions.is_empty() {
        return None;
    }
    Some(info)
}

fn decode_medium_type(value: u32) -> MediumType {
    if value & 0x401 != 0 {
        MediumType::Cd
    } else if value & 0x21C != 0 {
        MediumType::Dvd
    } else if value & 0x700000 != 0 {
        MediumType::Bd
    } else {
        MediumType::Cd
    }
}

fn parse_dao_session(
    area: &[u8],
    chunk: &NrgChunk,
    new_format: bool,
    session_number: u8,
) -> Option<SessionInfo> {
    // Header: u32 chunk size, 13-byte MCN, filler, session type, counts.
    const HEADER_SIZE: usize = 22;
    if chunk.length < HEADER_SIZE {
        return None;
    }
    let header = &area[chunk.offset..chunk.offset + HEADER_SIZE];
    let mcn_raw = &header[4..17];
    let mcn = if mcn_raw.iter().any(|&b| b != 0) {
        Some(String::from_utf8_lossy(mcn_raw).trim_end_matches('\0').to_string())
    } else {
        None
    };
    let first_track = header[20];

    let entry_size = if new_format { 42 } else { 30 };
    let num_tracks = (chunk.length - HEADER_SIZE) / entry_size;
    let mut session = SessionInfo { number: session_number, mcn, ..Default::default() };

    for i in 0..num_tracks {
        let entry_offset = chunk.offset + HEADER_SIZE + i * entry_size;
        let entry = area.get(entry_offset..entry_offset + entry_size)?;

        let isrc_raw = &entry[0..12];
        let isrc = if isrc_raw.iter().any(|&b| b != 0) {
            Some(String::from_utf8_lossy(isrc_raw).trim_end_matches('\0').to_string())
        } else {
            None
        };
        let sector_size = u16::from_be_bytes(*array_ref!(entry, 12, 2)) as u32;
        if sector_size == 0 {
            return None;
        }
        let mode = decode_track_mode(entry[14]);

        let (image_offset, end_byte) = if new_format {
            (
                u64::from_be_bytes(*array_ref!(entry, 26, 8)),
                u64::from_be_bytes(*array_ref!(entry, 34, 8)),
            )
        } else {
            (
                u32::from_be_bytes(*array_ref!(entry, 22, 4)) as u64,
                u32::from_be_bytes(*array_ref!(entry, 26, 4)) as u64,
            )
        };
        if end_byte < image_offset {
            return None;
        }
        // Byte offsets divided by the stride give the track's sector range.
        let start_sector = image_offset / sector_size as u64;
        let end_exclusive = end_byte / sector_size as u64;
        if end_exclusive <= start_sector {
            continue;
        }
        let length = end_exclusive - start_sector;

        let (main_data_size, subchannel_size, data_offset) = decode_sector_components(sector_size, mode);
        let base_number = if first_track == 0 { 1 } else { first_track };
        session.tracks.push(TrackInfo {
            number: base_number.saturating_add(i as u8),
            session: session_number,
            start_sector,
            end_sector: end_exclusive - 1,
            length,
            image_offset,
            sector_size,
            main_data_size,
            subchannel_size,
            data_offset,
            mode,
            ctl: if mode == TrackMode::Audio { 0x00 } else { 0x04 },
            isrc,
            ..Default::default()
        });
    }

    session.session_type = session_type_for(&session.tracks);
    Some(session)
}

fn parse_tao_session(
    area: &[u8],
    chunk: &NrgChunk,
    new_format: bool,
    session_number: u8,
) -> Option<SessionInfo> {
    let entry_size = if new_format { 32 } else { 20 };
    let num_tracks = chunk.length / entry_size;
    let mut session = SessionInfo { number: session_number, ..Default::default() };

    for i in 0..num_tracks {
        let entry_offset = chunk.offset + i * entry_size;
        let entry = area.get(entry_offset..entry_offset + entry_size)?;

        let (image_offset, size_bytes, mode_code, start_sector) = if new_format {
            (
                u64::from_be_bytes(*array_ref!(entry, 0, 8)),
                u64::from_be_bytes(*array_ref!(entry, 8, 8)),
                entry[19],
                u32::from_be_bytes(*array_ref!(entry, 20, 4)) as u64,
            )
        } else {
            (
                u32::from_be_bytes(*array_ref!(entry, 0, 4)) as u64,
                u32::from_be_bytes(*array_ref!(entry, 4, 4)) as u64,
                entry[11],
                u32::from_be_bytes(*array_ref!(entry, 12, 4)) as u64,
            )
        };
        let mode = decode_track_mode(mode_code);
        let sector_size = decode_sector_size(mode_code);
        let (main_data_size, subchannel_size, data_offset) = decode_sector_components(sector_size, mode);
        // Sizes are byte counts; the stored length rounds down to whole
        // sectors when the image is truncated.
        let length = size_bytes / main_data_size as u64;
        if length == 0 {
            continue;
        }

        session.tracks.push(TrackInfo {
            number: i as u8 + 1,
            session: session_number,
            start_sector,
            end_sector: start_sector + length - 1,
            length,
            image_offset,
            sector_size,
            main_data_size,
            subchannel_size,
            data_offset,
            mode,
            ctl: if mode == TrackMode::Audio { 0x00 } else { 0x04 },
            ..Default::default()
        });
    }

    session.session_type = session_type_for(&session.tracks);
    Some(session)
}

fn session_type_for(tracks: &[TrackInfo]) -> SessionType {
    if !tracks.is_empty() && tracks.iter().all(|t| t.is_audio()) {
        SessionType::Cdda
    } else if tracks.iter().any(|t| {
        matches!(
            t.mode,
            TrackMode::Mode2 | TrackMode::Mode2Form1 | TrackMode::Mode2Form2 | TrackMode::Mode2Mixed
        )
    }) {
        SessionType::CdromXa
    } else {
        SessionType::Cdrom
    }
}

fn decode_track_mode(code: u8) -> TrackMode {
    match code {
        0x00 | 0x05 | 0x0F => TrackMode::Mode1,
        0x02 => TrackMode::Mode2Form1,
        0x03 => TrackMode::Mode2Form2,
        0x06 | 0x11 => TrackMode::Mode2Mixed,
        0x07 | 0x10 => TrackMode::Audio,
        _ => TrackMode::Audio,
    }
}

/// Sector stride implied by a TAO mode code.
fn decode_sector_size(code: u8) -> u32 {
    match code {
        0x00 | 0x02 => 2048,
        0x03 => 2324,
        0x05 | 0x07 => 2352,
        0x06 => 2336,
        0x0F | 0x10 | 0x11 => 2448,
        _ => 2352,
    }
}

fn decode_sector_components(sector_size: u32, mode: TrackMode) -> (u32, u32, u32) {
    match mode {
        TrackMode::Mode1 => match sector_size {
            2048 => (2048, 0, 0),
            2352 => (2352, 0, 16),
            2448 => (2352, 96, 16),
            _ => (sector_size, 0, 0),
        },
        TrackMode::Audio => (2352.min(sector_size), sector_size.saturating_sub(2352), 0),
        _ => match sector_size {
            2048 | 2324 | 2336 => (sector_size, 0, 0),
            2448 => (2352, 96, 16),
            _ => (sector_size, 0, 16),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use super::*;

    /// Builds a NER5 image: `track_bytes` of payload followed by a DAOX
    /// chunk describing one track, END!, and the 12-byte trailer.
    fn build_ner5_audio(num_sectors: u64) -> Vec<u8> {
        let data_len = num_sectors * 2352;
        let mut out = vec![0u8; data_len as usize];
        let chunk_offset = out.len() as u64;

        // DAOX chunk: 22-byte header + one 42-byte track entry.
        out.extend_from_slice(b"DAOX");
        out.extend_from_slice(&(22u32 + 42).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // chunk size field
        out.extend_from_slice(&[0u8; 13]); // mcn
        out.push(0); // filler
        out.push(0); // session type
        out.push(1); // num sessions
        out.push(1); // first track
        out.push(1); // last track
        let mut entry = [0u8; 42];
        entry[12..14].copy_from_slice(&2352u16.to_be_bytes());
        entry[14] = 0x07; // audio
        entry[26..34].copy_from_slice(&0u64.to_be_bytes()); // start offset
        entry[34..42].copy_from_slice(&data_len.to_be_bytes()); // end offset
        out.extend_from_slice(&entry);

        out.extend_from_slice(b"END!");
        out.extend_from_slice(b"NER5");
        out.extend_from_slice(&chunk_offset.to_be_bytes());
        out
    }

    fn temp_file(name: &str, data: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn test_ner5_dao_audio() {
        let path = temp_file("odi_nrg_dao.nrg", &build_ner5_audio(75));
        let mut file = ImageFile::new(&path).unwrap();
        let parsed = NrgReader.try_parse(&path, &mut file).unwrap().unwrap();
        let info = parsed.info;
        info.validate().unwrap();
        assert_eq!(info.sessions.len(), 1);
        assert_eq!(info.sessions[0].session_type, SessionType::Cdda);
        let track = &info.sessions[0].tracks[0];
        assert_eq!(track.mode, TrackMode::Audio);
        assert_eq!(track.sector_size, 2352);
        assert_eq!(track.subchannel_size, 0);
        assert_eq!(track.data_offset, 0);
        assert_eq!(track.image_offset, 0);
        assert_eq!(track.length, 75);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_missing_trailer() {
        let path = temp_file("odi_nrg_none.nrg", &[0u8; 4096]);
        let mut file = ImageFile::new(&path).unwrap();
        assert!(NrgReader.try_parse(&path, &mut file).unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_rejects_unterminated_chunk_list() {
        let mut image = build_ner5_audio(10);
        // Corrupt the END! marker; the chunk walk must fail instead of
        // running off the buffer.
        let pos = image.len() - 16;
        image[pos..pos + 4].copy_from_slice(b"XXXX");
        let path = temp_file("odi_nrg_noend.nrg", &image);
        let mut file = ImageFile::new(&path).unwrap();
        assert!(NrgReader.try_parse(&path, &mut file).unwrap().is_none());
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_medium_type_decode() {
        assert_eq!(decode_medium_type(0x1), MediumType::Cd);
        assert_eq!(decode_medium_type(0x1C), MediumType::Dvd);
        assert_eq!(decode_medium_type(0x200), MediumType::Dvd);
        assert_eq!(decode_medium_type(0x100000), MediumType::Bd);
    }
}
