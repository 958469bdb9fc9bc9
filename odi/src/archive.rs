//! Archive view of a parsed disc: filesystem files when the data tracks
//! carry one, raw track entries (ISO / CUE+WAV) otherwise.

use std::{
    io,
    io::{Cursor, Read, Seek, SeekFrom},
};

use crate::{
    disc::{
        geometry::Msf,
        streams::{DiscDataStream, DiscStream, WavTrackStream, WAV_HEADER_SIZE},
        DiscInfo, TrackInfo, TrackMode, ISO_SECTOR_SIZE,
    },
    fs,
    fs::{udf::UdfFileStream, FsEntry, FsStorage},
    image::ImageFile,
    Error, Result,
};

/// The backing data of an archive entry.
#[derive(Debug, Clone)]
pub enum EntryData {
    /// Generated CUE sheet text.
    CueSheet(String),
    /// An audio track rendered as WAV, by track number.
    WavTrack(u8),
    /// The concatenated data tracks as a plain 2048-byte-sector image.
    IsoImage,
    /// A file from the disc's filesystem.
    FsFile(FsEntry),
}

/// One extractable entry of a disc archive.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Entry name; filesystem entries keep their `/`-separated path.
    pub name: String,
    /// Entry size in bytes.
    pub size: u64,
    /// What the entry's bytes are backed by.
    pub data: EntryData,
}

/// The archive view of a disc image.
///
/// Built once from the parsed layout; [`DiscArchive::open`] hands out
/// independent read streams, so entries can be extracted in any order.
pub struct DiscArchive {
    info: DiscInfo,
    data: ImageFile,
    entries: Vec<ArchiveEntry>,
}

impl DiscArchive {
    /// Builds the entry list for a disc.
    ///
    /// Data tracks are probed for a UDF or ISO9660 filesystem; when one is
    /// found its files become the entries, otherwise the data tracks are
    /// exposed as a single `.iso`. Audio tracks always contribute a CUE
    /// sheet plus one WAV entry per track, alongside any data entries.
    pub fn new(info: &DiscInfo, data: ImageFile) -> Result<DiscArchive> {
        let stem = data
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("disc")
            .to_string();
        let mut entries = Vec::new();

        let data_tracks = info.data_tracks();
        if !data_tracks.is_empty() {
            let base_lba = data_tracks[0].start_sector;
            let mut stream =
                DiscDataStream::new(Box::new(data.clone()), data_tracks.clone());
            match fs::probe(&mut stream, base_lba) {
                Some(fs_entries) => {
                    for entry in fs_entries {
                        entries.push(ArchiveEntry {
                            name: entry.name.clone(),
                            size: entry.size,
                            data: EntryData::FsFile(entry),
                        });
                    }
                }
                None => {
                    log::debug!("No filesystem found, exposing data tracks as ISO");
                    entries.push(ArchiveEntry {
                        name: format!("{}.iso", stem),
                        size: stream.len(),
                        data: EntryData::IsoImage,
                    });
                }
            }
        }

        if info.has_audio() {
            let cue = generate_cue_sheet(info, &data);
            entries.push(ArchiveEntry {
                name: format!("{}.cue", stem),
                size: cue.len() as u64,
                data: EntryData::CueSheet(cue),
            });
            for track in info.tracks().filter(|t| t.is_audio()) {
                entries.push(ArchiveEntry {
                    name: format!("Track{:02}.wav", track.number),
                    size: track.payload_size() + WAV_HEADER_SIZE as u64,
                    data: EntryData::WavTrack(track.number),
                });
            }
        }

        if entries.is_empty() {
            return Err(Error::DiscFormat("Disc image has no extractable tracks".to_string()));
        }
        Ok(DiscArchive { info: info.clone(), data, entries })
    }

    /// The archive's entries.
    #[inline]
    pub fn entries(&self) -> &[ArchiveEntry] { &self.entries }

    /// The parsed disc layout this archive was built from.
    #[inline]
    pub fn info(&self) -> &DiscInfo { &self.info }

    /// Opens an independent read stream over one entry.
    pub fn open(&self, entry: &ArchiveEntry) -> Result<Box<dyn DiscStream>> {
        match &entry.data {
            EntryData::CueSheet(text) => Ok(Box::new(Cursor::new(text.clone().into_bytes()))),
            EntryData::WavTrack(number) => {
                let track = self
                    .info
                    .tracks()
                    .find(|t| t.is_audio() && t.number == *number)
                    .ok_or_else(|| {
                        Error::DiscFormat(format!("No audio track {} in disc", number))
                    })?;
                Ok(Box::new(WavTrackStream::new(Box::new(self.data.clone()), track)))
            }
            EntryData::IsoImage => Ok(Box::new(self.data_stream())),
            EntryData::FsFile(fs_entry) => match &fs_entry.storage {
                FsStorage::Inline { data } => Ok(Box::new(Cursor::new(data.to_vec()))),
                FsStorage::Iso { start_sector } => Ok(Box::new(FileWindow::new(
                    self.data_stream(),
                    start_sector * ISO_SECTOR_SIZE as u64,
                    fs_entry.size,
                ))),
                FsStorage::Udf { extents } => Ok(Box::new(UdfFileStream::new(
                    self.data_stream(),
                    extents.clone(),
                    fs_entry.size,
                ))),
            },
        }
    }

    fn data_stream(&self) -> DiscDataStream {
        DiscDataStream::new(Box::new(self.data.clone()), self.info.data_tracks())
    }
}

/// Generates a CUE sheet describing the disc layout.
fn generate_cue_sheet(info: &DiscInfo, data: &ImageFile) -> String {
    use std::fmt::Write;

    let file_name = data
        .path()
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("disc.img");

    let mut cue = String::new();
    let _ = writeln!(cue, "REM GENRE Unknown");
    let _ = writeln!(cue, "REM COMMENT \"odi\"");
    if let Some(title) = &info.title {
        let _ = writeln!(cue, "TITLE \"{}\"", title);
    }
    if let Some(mcn) = info.sessions.iter().find_map(|s| s.mcn.as_ref()) {
        let _ = writeln!(cue, "CATALOG {}", mcn);
    }
    let _ = writeln!(cue, "FILE \"{}\" BINARY", file_name);

    for track in info.tracks() {
        let _ = writeln!(cue, "  TRACK {:02} {}", track.number, cue_track_type(track));
        if let Some(title) = &track.title {
            let _ = writeln!(cue, "    TITLE \"{}\"", title);
        }
        if let Some(isrc) = &track.isrc {
            let _ = writeln!(cue, "    ISRC {}", isrc);
        }
        if let Some(flags) = cue_flags(track) {
            let _ = writeln!(cue, "    FLAGS {}", flags);
        }
        write_cue_indices(&mut cue, track);
    }
    cue
}

fn cue_track_type(track: &TrackInfo) -> &'static str {
    match track.mode {
        TrackMode::Audio => "AUDIO",
        TrackMode::Mode1 => {
            if track.main_data_size == 2048 {
                "MODE1/2048"
            } else {
                "MODE1/2352"
            }
        }
        _ => {
            if track.main_data_size == 2048 {
                "MODE2/2048"
            } else {
                "MODE2/2352"
            }
        }
    }
}

fn cue_flags(track: &TrackInfo) -> Option<String> {
    let bits = track.ctl | track.flags;
    let mut flags = Vec::new();
    if bits & 0x01 != 0 {
        flags.push("PRE");
    }
    if bits & 0x04 != 0 {
        // DCP marks data tracks too, but FLAGS only applies to audio.
        if track.is_audio() {
            flags.push("DCP");
        }
    }
    if bits & 0x08 != 0 {
        flags.push("4CH");
    }
    if flags.is_empty() {
        None
    } else {
        Some(flags.join(" "))
    }
}

fn write_cue_indices(cue: &mut String, track: &TrackInfo) {
    use std::fmt::Write;

    if track.pregap > 0 && track.start_sector >= track.pregap as u64 {
        let _ = writeln!(
            cue,
            "    INDEX 00 {}",
            Msf::from_lba(track.start_sector - track.pregap as u64)
        );
    }
    let _ = writeln!(cue, "    INDEX 01 {}", Msf::from_lba(track.start_sector));
    for (i, &position) in track.indices.iter().enumerate() {
        let _ = writeln!(cue, "    INDEX {:02} {}", i + 2, Msf::from_lba(position));
    }
}

/// A fixed byte window into the logical data stream (one contiguous
/// ISO9660 file extent).
#[derive(Clone)]
struct FileWindow {
    stream: DiscDataStream,
    start: u64,
    len: u64,
    pos: u64,
}

impl FileWindow {
    fn new(stream: DiscDataStream, start: u64, len: u64) -> FileWindow {
        FileWindow { stream, start, len, pos: 0 }
    }
}

impl Read for FileWindow {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let len = out.len().min((self.len - self.pos) as usize);
        self.stream.seek(SeekFrom::Start(self.start + self.pos))?;
        let read = self.stream.read(&mut out[..len])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for FileWindow {
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
    use super::*;
    use crate::disc::{MediumType, SessionInfo, SessionType};

    fn audio_track(number: u8, start: u64, len: u64) -> TrackInfo {
        TrackInfo {
            number,
            session: 1,
            start_sector: start,
            end_sector: start + len - 1,
            length: len,
            image_offset: start * 2352,
            sector_size: 2352,
            main_data_size: 2352,
            mode: TrackMode::Audio,
            ..Default::default()
        }
    }

    fn audio_disc() -> DiscInfo {
        DiscInfo {
            medium: MediumType::Cd,
            sessions: vec![SessionInfo {
                number: 1,
                session_type: SessionType::Cdda,
                mcn: Some("1234567890123".to_string()),
                tracks: vec![audio_track(1, 0, 1500), audio_track(2, 1500, 750)],
                ..Default::default()
            }],
            total_size: 2250 * 2352,
            ..Default::default()
        }
    }

    #[test]
    fn test_cue_sheet_layout() {
        let info = audio_disc();
        let path = std::env::temp_dir().join("odi_cue_test.bin");
        std::fs::write(&path, [0u8; 16]).unwrap();
        let data = ImageFile::new(&path).unwrap();
        let cue = generate_cue_sheet(&info, &data);
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = cue.lines().collect();
        assert_eq!(lines[0], "REM GENRE Unknown");
        assert_eq!(lines[1], "REM COMMENT \"odi\"");
        assert_eq!(lines[2], "CATALOG 1234567890123");
        assert_eq!(lines[3], "FILE \"odi_cue_test.bin\" BINARY");
        assert_eq!(lines[4], "  TRACK 01 AUDIO");
        assert_eq!(lines[5], "    INDEX 01 00:00:00");
        assert_eq!(lines[6], "  TRACK 02 AUDIO");
        // 1500 sectors = 20 seconds.
        assert_eq!(lines[7], "    INDEX 01 00:20:00");
        // No REM DATE anywhere.
        assert!(!cue.contains("REM DATE"));
    }

    #[test]
    fn test_cue_pregap_index00() {
        let mut info = audio_disc();
        info.sessions[0].tracks[1].pregap = 150;
        let path = std::env::temp_dir().join("odi_cue_pregap.bin");
        std::fs::write(&path, [0u8; 16]).unwrap();
        let data = ImageFile::new(&path).unwrap();
        let cue = generate_cue_sheet(&info, &data);
        std::fs::remove_file(&path).ok();

        // INDEX 00 precedes INDEX 01 by the pregap (150 sectors = 2 s).
        assert!(cue.contains("    INDEX 00 00:18:00\n    INDEX 01 00:20:00"));
    }

    #[test]
    fn test_cue_track_types() {
        let mut track = audio_track(1, 0, 10);
        assert_eq!(cue_track_type(&track), "AUDIO");
        track.mode = TrackMode::Mode1;
        assert_eq!(cue_track_type(&track), "MODE1/2352");
        track.main_data_size = 2048;
        assert_eq!(cue_track_type(&track), "MODE1/2048");
        track.mode = TrackMode::Mode2Mixed;
        assert_eq!(cue_track_type(&track), "MODE2/2048");
    }

    #[test]
    fn test_audio_archive_entries() {
        let info = audio_disc();
        let path = std::env::temp_dir().join("odi_arch_audio.bin");
        std::fs::write(&path, vec![0u8; 2250 * 2352]).unwrap();
        let data = ImageFile::new(&path).unwrap();
        let archive = DiscArchive::new(&info, data).unwrap();

        let names: Vec<&str> = archive.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["odi_arch_audio.cue", "Track01.wav", "Track02.wav"]);
        assert_eq!(archive.entries()[1].size, 1500 * 2352 + 44);

        let entry = archive.entries()[1].clone();
        let mut reader = archive.open(&entry).unwrap();
        let mut wav = Vec::new();
        reader.read_to_end(&mut wav).unwrap();
        assert_eq!(wav.len() as u64, entry.size);
        assert_eq!(&wav[0..4], b"RIFF");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_filesystem_archive_end_to_end() {
        let mut writer = crate::IsoWriter::new("ARCHIVE");
        writer.add_file("readme.txt", b"disc archive".to_vec());
        // Pad the volume past the prober's minimum image size.
        writer.add_file("big/pad.bin", vec![0x5A; 700_000]);
        let mut image = Vec::new();
        writer.finish(&mut image).unwrap();
        let path = std::env::temp_dir().join("odi_arch_fs.iso");
        std::fs::write(&path, &image).unwrap();

        let disc = crate::DiscImage::new(&path).unwrap();
        assert_eq!(disc.format(), crate::ImageFormat::Iso);
        let archive = disc.open_archive().unwrap();
        let entry =
            archive.entries().iter().find(|e| e.name == "readme.txt").unwrap().clone();
        assert_eq!(entry.size, 12);
        let mut reader = archive.open(&entry).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf, b"disc archive");

        let pad = archive.entries().iter().find(|e| e.name == "big/pad.bin").unwrap().clone();
        assert_eq!(pad.size, 700_000);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_data_disc_iso_fallback() {
        // A data track with no filesystem: the archive exposes one .iso.
        let info = DiscInfo {
            medium: MediumType::Cd,
            sessions: vec![SessionInfo {
                number: 1,
                session_type: SessionType::Cdrom,
                tracks: vec![TrackInfo {
                    number: 1,
                    session: 1,
                    start_sector: 0,
                    end_sector: 399,
                    length: 400,
                    sector_size: 2048,
                    main_data_size: 2048,
                    mode: TrackMode::Mode1,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            total_size: 400 * 2048,
            ..Default::default()
        };
        let path = std::env::temp_dir().join("odi_arch_data.bin");
        std::fs::write(&path, vec![0u8; 400 * 2048]).unwrap();
        let data = ImageFile::new(&path).unwrap();
        let archive = DiscArchive::new(&info, data).unwrap();

        assert_eq!(archive.entries().len(), 1);
        assert_eq!(archive.entries()[0].name, "odi_arch_data.iso");
        assert_eq!(archive.entries()[0].size, 400 * 2048);
        std::fs::remove_file(&path).ok();
    }
}
