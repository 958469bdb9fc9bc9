//! CloneCD reader (.ccd text sidecar + .img data file).

use std::{
    io::{BufRead, BufReader, Read, SeekFrom},
    path::Path,
};

use itertools::Itertools;

use crate::{
    disc::{
        geometry::sniff_sector_mode, DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo,
        TrackMode, RAW_SECTOR_SIZE,
    },
    image::{FormatReader, ImageFile, ImageFormat, ParsedImage},
    ErrorContext, Result, ResultContext,
};
use std::io::Seek;

/// One `[Entry N]` section of a CCD file. All fields default to zero when
/// a key is absent, matching the permissive text format.
#[derive(Debug, Clone, Default)]
struct CcdEntry {
    session: u8,
    point: u32,
    control: u32,
    psec: u32,
    plba: u64,
    index0: u32,
    index1: u32,
    isrc: Option<String>,
}

#[derive(Debug, Default)]
struct CcdData {
    catalog: Option<String>,
    entries: Vec<CcdEntry>,
}

pub(crate) struct CcdReader;

impl FormatReader for CcdReader {
    fn format(&self) -> ImageFormat { ImageFormat::Ccd }

    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if ext.eq_ignore_ascii_case("img") {
            let ccd_path = path.with_extension("ccd");
            if !ccd_path.is_file() {
                // Bare .img without its sidecar: best-effort raw image
                // heuristic. This accepts any file whose size happens to be
                // a sector-size multiple; kept permissive for compatibility.
                log::debug!("No .ccd sidecar for {}, trying raw image", path.display());
                return parse_raw_image(path, file);
            }
            let info = parse_ccd_image(&ccd_path, file)?;
            Ok(info.map(|info| ParsedImage { info, data: file.clone() }))
        } else if ext.eq_ignore_ascii_case("ccd") {
            let img_path = path.with_extension("img");
            if !img_path.is_file() {
                return Ok(None);
            }
            let mut img = ImageFile::new(&img_path)?;
            let info = parse_ccd_image(path, &mut img)?;
            Ok(info.map(|info| ParsedImage { info, data: img }))
        } else {
            Ok(None)
        }
    }
}

/// Parses the CCD text and builds the layout, sniffing each track's mode
/// from the first physical sector of the paired image file.
fn parse_ccd_image(ccd_path: &Path, img: &mut ImageFile) -> Result<Option<DiscInfo>> {
    let reader = BufReader::new(
        std::fs::File::open(ccd_path)
            .with_context(|| format!("Failed to open {}", ccd_path.display()))?,
    );
    let Some(ccd) = parse_ccd_text(reader)? else {
        return Ok(None);
    };
    Ok(build_disc_info(&ccd, img))
}

/// Parses `[Entry N]`/`[TRACK N]` sections and key=value pairs. Values are
/// decimal, or hex with a `0x` prefix. Unknown keys and sections are ignored.
fn parse_ccd_text<R: BufRead>(reader: R) -> Result<Option<CcdData>> {
    let mut data = CcdData::default();
    // Index of the entry the current section's keys apply to.
    let mut current: Option<usize> = None;

    for line in reader.lines() {
        let line = line.map_err(|e| e.context("Reading CCD file"))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let section = section.trim();
            if let Some(num) = section.strip_prefix("Entry ") {
                if num.trim().parse::<u32>().is_ok() {
                    data.entries.push(CcdEntry::default());
                    current = Some(data.entries.len() - 1);
                }
            } else if let Some(num) = section.strip_prefix("TRACK ") {
                // [TRACK N] keys extend the entry whose Point matches.
                current = num
                    .trim()
                    .parse::<u32>()
                    .ok()
                    .and_then(|n| data.entries.iter().position(|e| e.point == n));
            } else {
                current = None;
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        if key == "CATALOG" {
            data.catalog = Some(value.to_string());
            continue;
        }
        let Some(index) = current else {
            continue;
        };
        let entry = &mut data.entries[index];
        match key {
            "Session" => entry.session = parse_num(value).unwrap_or(0) as u8,
            "Point" => entry.point = parse_num(value).unwrap_or(0) as u32,
            "Control" => entry.control = parse_num(value).unwrap_or(0) as u32,
            "PSec" => entry.psec = parse_num(value).unwrap_or(0) as u32,
            "PLBA" => entry.plba = parse_num(value).unwrap_or(0),
            "INDEX 0" => entry.index0 = parse_num(value).unwrap_or(0) as u32,
            "INDEX 1" => entry.index1 = parse_num(value).unwrap_or(0) as u32,
            "ISRC" => entry.isrc = Some(value.to_string()),
            _ => {}
        }
    }

    if data.entries.is_empty() {
        return Ok(None);
    }
    Ok(Some(data))
}

fn parse_num(value: &str) -> Option<u64> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn build_disc_info(ccd: &CcdData, img: &mut ImageFile) -> Option<DiscInfo> {
    let mut track_entries: Vec<&CcdEntry> =
        ccd.entries.iter().filter(|e| e.point > 0 && e.point < 99).collect();
    track_entries.sort_by_key(|e| (e.session, e.point));
    if track_entries.is_empty() {
        return None;
    }

    let mut info = DiscInfo { medium: MediumType::Cd, ..Default::default() };
    // Image offsets accumulate across session boundaries.
    let mut current_offset = 0u64;

    for (session_num, entries) in &track_entries.iter().group_by(|e| e.session) {
        let entries: Vec<&&CcdEntry> = entries.collect();
        let mut session = SessionInfo {
            number: session_num,
            mcn: ccd.catalog.clone(),
            ..Default::default()
        };

        // Session type comes from the A0 control entry's PSec field.
        let a0 = ccd.entries.iter().find(|e| e.session == session_num && e.point == 0xA0);
        session.session_type = match a0.map(|e| e.psec) {
            Some(0x20) => SessionType::CdromXa,
            _ => SessionType::Cdrom,
        };
        let leadout = ccd.entries.iter().find(|e| e.session == session_num && e.point == 0xA2);

        for (i, entry) in entries.iter().enumerate() {
            let pregap = if entry.index0 > 0 && entry.index1 > 0 {
                // A malformed sheet can record INDEX 0 past INDEX 1.
                entry.index1.checked_sub(entry.index0)?
            } else {
                entry.index1
            };

            // Track length from PLBA deltas: next track entry, or the A2
            // lead-out, less the next track's own pregap.
            let next = entries.get(i + 1).map(|e| **e).or(leadout);
            let length = match next {
                Some(next) => {
                    let next_pregap = if next.index0 > 0 && next.index1 > 0 {
                        next.index1.checked_sub(next.index0)?
                    } else {
                        0
                    };
                    (next.plba + pregap as u64).checked_sub(entry.plba + next_pregap as u64)?
                }
                // No lead-out entry recorded; fall back to the remaining
                // image size. The sheet may claim more sectors than the
                // image holds.
                None => img.len().checked_sub(current_offset)? / RAW_SECTOR_SIZE as u64,
            };
            if length == 0 {
                return None;
            }

            let mode = sniff_track_mode(img, current_offset);
            let track = TrackInfo {
                number: entry.point as u8,
                session: entry.session,
                start_sector: entry.plba,
                end_sector: entry.plba + length - 1,
                length,
                image_offset: current_offset,
                sector_size: RAW_SECTOR_SIZE as u32,
                main_data_size: RAW_SECTOR_SIZE as u32,
                subchannel_size: 0,
                data_offset: if mode == TrackMode::Audio { 0 } else { 16 },
                mode,
                ctl: entry.control as u8,
                isrc: entry.isrc.clone(),
                pregap,
                ..Default::default()
            };
            current_offset += track.length * track.sector_size as u64;
            session.tracks.push(track);
        }

        if !session.tracks.is_empty() {
            info.sessions.push(session);
        }
    }

    info.total_size = img.len();
    if info.sessions.is_empty() {
        return None;
    }
    Some(info)
}

/// Reads the first physical sector of a track and sniffs its mode. Tracks
/// past the end of the image read as audio.
fn sniff_track_mode(img: &mut ImageFile, offset: u64) -> TrackMode {
    match img.read_at(offset, RAW_SECTOR_SIZE) {
        Ok(Some(sector)) => sniff_sector_mode(&sector),
        _ => TrackMode::Audio,
    }
}

/// Raw image fallback for a bare `.img`: accept when the size divides by
/// 2352 or 2448 and synthesize a single session/track layout.
fn parse_raw_image(path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>> {
    let file_size = file.len();
    let sector_size = if file_size > 0 && file_size % 2448 == 0 {
        2448u32
    } else if file_size > 0 && file_size % 2352 == 0 {
        2352u32
    } else {
        return Ok(None);
    };
    let num_sectors = file_size / sector_size as u64;

    file.seek(SeekFrom::Start(0))
        .with_context(|| format!("Seeking {}", path.display()))?;
    let mut first_sector = [0u8; RAW_SECTOR_SIZE];
    file.read_exact(&mut first_sector)
        .with_context(|| format!("Reading first sector of {}", path.display()))?;
    let mode = sniff_sector_mode(&first_sector);

    let track = TrackInfo {
        number: 1,
        session: 1,
        start_sector: 0,
        end_sector: num_sectors - 1,
        length: num_sectors,
        image_offset: 0,
        sector_size,
        main_data_size: RAW_SECTOR_SIZE as u32,
        subchannel_size: sector_size - RAW_SECTOR_SIZE as u32,
        data_offset: if mode == TrackMode::Audio { 0 } else { 16 },
        mode,
        ctl: if mode == TrackMode::Audio { 0x00 } else { 0x04 },
        ..Default::default()
    };
    let session = SessionInfo {
        number: 1,
        session_type: if mode == TrackMode::Audio {
            SessionType::Cdda
        } else {
            SessionType::Cdrom
        },
        tracks: vec![track],
        ..Default::default()
    };
    let info = DiscInfo {
        medium: MediumType::Cd,
        sessions: vec![session],
        total_size: file_size,
        ..Default::default()
    };
    Ok(Some(ParsedImage { info, data: file.clone() }))
}
