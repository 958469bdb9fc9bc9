//! DiscJuggler reader (.cdi).
//!
//! The track descriptor sits at the end of the file; its length is the
//! little-endian u32 in the file's last four bytes. Every read below is
//! bounds-checked, and any overrun abandons the whole parse.

use std::path::Path;

use crate::{
    array_ref,
    disc::{DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode},
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    Result, ResultContext,
};

/// Sanity cap on the descriptor area.
const MAX_DESCRIPTOR_SIZE: u64 = 8 * 1024 * 1024;

/// Bounds-checked reader over the descriptor bytes.
struct Descriptor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Descriptor<'a> {
    fn new(data: &'a [u8]) -> Self { Descriptor { data, pos: 0 } }

    fn skip(&mut self, count: usize) -> Option<()> {
        let end = self.pos.checked_add(count)?;
        if end > self.data.len() {
            return None;
        }
        self.pos = end;
        Some(())
    }

    fn bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(count)?;
        let slice = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> { self.bytes(1).map(|b| b[0]) }

    fn u16(&mut self) -> Option<u16> {
        self.bytes(2).map(|b| u16::from_le_bytes(*array_ref!(b, 0, 2)))
    }

    fn u32(&mut self) -> Option<u32> {
        self.bytes(4).map(|b| u32::from_le_bytes(*array_ref!(b, 0, 4)))
    }
}

pub(crate) struct CdiReader;

impl FormatReader for CdiReader {
    fn format(&self) -> ImageFormat { ImageFormat::Cdi }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        if !path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("cdi"))
        {
            return Ok(None);
        }
        let file_size = file.len();
        if file_size < 8 {
            return Ok(None);
        }
        let Some(tail) = file
            .read_at(file_size - 4, 4)
            .with_context(|| format!("Reading CDI descriptor length of {}", path.display()))?
        else {
            return Ok(None);
        };
        let descriptor_length = u32::from_le_bytes(*array_ref!(tail, 0, 4)) as u64;
        if descriptor_length == 0
            || descriptor_length > file_size
            || descriptor_length > MAX_DESCRIPTOR_SIZE
        {
            return Ok(None);
        }
        // The length field counts itself; descriptor data is everything
        // before those last four bytes.
        let data_len = (descriptor_length - 4) as usize;
        let Some(descriptor) = file
            .read_at(file_size - descriptor_length, data_len)
            .with_context(|| format!("Reading CDI descriptor of {}", path.display()))?
        else {
            return Ok(None);
        };
        Ok(parse_descriptor(&descriptor, file_size)
            .map(|info| ParsedImage { info, data: file.clone() }))
    }
}

fn parse_descriptor(data: &[u8], file_size: u64) -> Option<DiscInfo> {
    let mut desc = Descriptor::new(data);
    let mut info = DiscInfo { medium: MediumType::Cd, total_size: file_size, ..Default::default() };
    let mut image_offset = 0u64;

    let num_sessions = desc.u8()?;
    for i in 0..=num_sessions {
        if let Some(session) = parse_session(&mut desc, i as u8 + 1, &mut image_offset)? {
            info.sessions.push(session);
        }
    }

    // Disc descriptor follows the sessions; it carries the volume id and
    // the media catalog number.
    desc.skip(16)?;
    let filename_len = desc.u8()? as usize;
    desc.skip(filename_len + 31)?;
    desc.skip(4)?;
    let volume_id_len = desc.u8()? as usize;
    let volume_id = desc.bytes(volume_id_len)?;
    if !volume_id.is_empty() {
        info.volume_id = Some(String::from_utf8_lossy(volume_id).trim().to_string());
    }
    desc.skip(9)?;
    let mcn = desc.bytes(13)?;
    let mcn_valid = desc.u32()? != 0;
    if mcn_valid {
        if let Some(session) = info.sessions.first_mut() {
            session.mcn = Some(String::from_utf8_lossy(mcn).trim_end_matches('\0').to_string());
        }
    }

    if info.sessions.is_empty() {
        return None;
    }
    Some(info)
}

/// Parses one session descriptor. Returns `Ok(None)`-style inner None via
/// `Option<Option<..>>` flattening: outer None aborts the parse, inner None
/// means an empty session.
#[allow(clippy::option_option)]
fn parse_session(
    desc: &mut Descriptor,
    session_number: u8,
    image_offset: &mut u64,
) -> Option<Option<SessionInfo>> {
    let header = desc.bytes(15)?;
    let num_tracks = header[1];
    if num_tracks == 0 {
        return Some(None);
    }

    let mut session = SessionInfo { number: session_number, ..Default::default() };
    for track_number in 1..=num_tracks {
        let track = parse_track(desc, session_number, track_number, image_offset)?;
        session.tracks.push(track);
    }
    session.session_type = if session.tracks.iter().all(|t| t.is_audio()) {
        SessionType::Cdda
    } else if session.tracks.iter().any(|t| t.mode == TrackMode::Mode2Mixed) {
        SessionType::CdromXa
    } else {
        SessionType::Cdrom
    };
    Some(Some(session))
}

fn parse_track(
    desc: &mut Descriptor,
    session_number: u8,
    track_number: u8,
    image_offset: &mut u64,
) -> Option<TrackInfo> {
    desc.skip(16)?;
    let filename_len = desc.u8()? as usize;
    desc.skip(filename_len + 31)?;

    let num_indices = desc.u16()? as usize;
    let mut indices = Vec::with_capacity(num_indices);
    for _ in 0..num_indices {
        indices.push(desc.u32()?);
    }

    let num_cdtext_blocks = desc.u32()?;
    for _ in 0..num_cdtext_blocks {
        // 18 length-prefixed CD-TEXT fields per block.
        for _ in 0..18 {
            let field_len = desc.u8()? as usize;
            desc.skip(field_len)?;
        }
    }
    desc.skip(2)?;

    let mode = match desc.u32()? {
        0 => TrackMode::Audio,
        1 => TrackMode::Mode1,
        2 => TrackMode::Mode2Mixed,
        _ => TrackMode::Audio,
    };
    desc.skip(4)?;
    desc.skip(4)?; // session number, recorded redundantly
    desc.skip(4)?;
    let start_sector = desc.u32()? as u64;
    desc.skip(4)?;
    let length = desc.u32()? as u64;
    if length == 0 {
        return None;
    }
    desc.skip(16)?;
    let read_mode = desc.u32()?;
    let ctl = desc.u32()? as u8;
    desc.skip(9)?;
    let isrc_raw = desc.bytes(12)?;
    let isrc_valid = desc.u32()? != 0;
    let isrc = if isrc_valid {
        Some(String::from_utf8_lossy(isrc_raw).trim_end_matches('\0').to_string())
    } else {
        None
    };
    desc.skip(99)?;

    // Index entries hold region lengths (index 0 is the pregap); turn the
    // lengths from index 1 onward into absolute INDEX 02+ marker positions.
    let mut index_markers = Vec::new();
    let mut marker = start_sector;
    for &len in indices.iter().skip(1).take(indices.len().saturating_sub(2)) {
        marker += len as u64;
        index_markers.push(marker);
    }

    let is_audio = mode == TrackMode::Audio;
    let (main_data_size, subchannel_size, data_offset, sector_size) = match read_mode {
        0 => (2048, 0, 0, 2048),
        1 => (2336, 0, 0, 2336),
        2 => (2352, 0, if is_audio { 0 } else { 16 }, 2352),
        3 => (2352, 16, if is_audio { 0 } else { 16 }, 2368),
        4 => (2352, 96, if is_audio { 0 } else { 16 }, 2448),
        _ => (2352, 0, 0, 2352),
    };

    let track = TrackInfo {
        number: track_number,
        session: session_number,
        start_sector,
        end_sector: start_sector + length - 1,
        length,
        image_offset: *image_offset,
        sector_size,
        main_data_size,
        subchannel_size,
        data_offset,
        mode,
        ctl,
        isrc,
        pregap: indices.first().copied().unwrap_or(0),
        indices: index_markers,
        ..Default::default()
    };
    *image_offset += sector_size as u64 * length;
    Some(track)
}
