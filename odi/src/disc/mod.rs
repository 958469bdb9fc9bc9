//! Disc layout types and related logic.

use std::fmt;

use crate::{Error, Result};

pub(crate) mod geometry;
pub(crate) mod streams;

/// Size in bytes of a cooked (user data) CD-ROM sector.
pub const ISO_SECTOR_SIZE: usize = 2048;

/// Size in bytes of a raw CD sector, excluding subchannel data.
pub const RAW_SECTOR_SIZE: usize = 2352;

/// Sectors per second of CD audio (75 frames).
pub const SECTORS_PER_SECOND: u64 = 75;

/// Physical medium a disc image was mastered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediumType {
    /// CD-ROM (pressed)
    #[default]
    Cd,
    /// CD-R
    CdR,
    /// CD-RW
    CdRw,
    /// DVD-ROM (pressed)
    Dvd,
    /// DVD-R
    DvdR,
    /// Blu-ray
    Bd,
    /// Not stored by the format
    Unknown,
}

impl MediumType {
    /// Whether the medium is any CD variant.
    #[inline]
    pub fn is_cd(&self) -> bool {
        matches!(self, MediumType::Cd | MediumType::CdR | MediumType::CdRw)
    }

    /// Whether the medium is any DVD variant.
    #[inline]
    pub fn is_dvd(&self) -> bool { matches!(self, MediumType::Dvd | MediumType::DvdR) }
}

impl fmt::Display for MediumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediumType::Cd => write!(f, "CD"),
            MediumType::CdR => write!(f, "CD-R"),
            MediumType::CdRw => write!(f, "CD-RW"),
            MediumType::Dvd => write!(f, "DVD"),
            MediumType::DvdR => write!(f, "DVD-R"),
            MediumType::Bd => write!(f, "BD"),
            MediumType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Session type from the disc TOC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionType {
    /// Audio CD (Red Book)
    Cdda,
    /// CD-ROM (Yellow Book)
    #[default]
    Cdrom,
    /// CD-ROM XA
    CdromXa,
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionType::Cdda => write!(f, "CD-DA"),
            SessionType::Cdrom => write!(f, "CD-ROM"),
            SessionType::CdromXa => write!(f, "CD-ROM XA"),
        }
    }
}

/// Data mode of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackMode {
    /// Red Book audio (2352 bytes of PCM per sector)
    Audio,
    /// Mode 1 data (2048 bytes of user data per sector)
    #[default]
    Mode1,
    /// Mode 2 formless data
    Mode2,
    /// Mode 2 Form 1 data (2048 bytes + XA sub-header)
    Mode2Form1,
    /// Mode 2 Form 2 data (2324 bytes + XA sub-header)
    Mode2Form2,
    /// Mode 2 with mixed forms
    Mode2Mixed,
}

impl fmt::Display for TrackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackMode::Audio => write!(f, "Audio"),
            TrackMode::Mode1 => write!(f, "Mode1"),
            TrackMode::Mode2 => write!(f, "Mode2"),
            TrackMode::Mode2Form1 => write!(f, "Mode2 Form1"),
            TrackMode::Mode2Form2 => write!(f, "Mode2 Form2"),
            TrackMode::Mode2Mixed => write!(f, "Mode2 Mixed"),
        }
    }
}

/// A single track within a session.
///
/// The central unit of addressing: the physical byte position of logical
/// sector `s` within a track is
/// `image_offset + (s - start_sector) * sector_size + data_offset`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackInfo {
    /// Track number (1-99, Red Book numbering).
    pub number: u8,
    /// 1-based session number this track belongs to.
    pub session: u8,
    /// First logical sector of the track.
    pub start_sector: u64,
    /// Last logical sector of the track (inclusive).
    pub end_sector: u64,
    /// Track length in sectors. Always `end_sector - start_sector + 1`.
    pub length: u64,
    /// Byte offset into the image file where the track's first sector begins.
    pub image_offset: u64,
    /// Physical sector stride in the image file.
    pub sector_size: u32,
    /// Bytes of user/audio data per sector.
    pub main_data_size: u32,
    /// Trailing subchannel bytes per sector (0, 16 or 96).
    pub subchannel_size: u32,
    /// Bytes to skip within each sector before user data.
    pub data_offset: u32,
    /// Track data mode.
    pub mode: TrackMode,
    /// Red Book control nibble.
    pub ctl: u8,
    /// Extra track flags (format specific, same bit layout as `ctl`).
    pub flags: u8,
    /// International Standard Recording Code, if recorded.
    pub isrc: Option<String>,
    /// Pregap length in sectors.
    pub pregap: u32,
    /// Absolute sector positions of INDEX markers 02 and up, if recorded.
    pub indices: Vec<u64>,
    /// CD-TEXT track title, if recorded.
    pub title: Option<String>,
}

impl TrackInfo {
    /// Whether this is an audio track.
    #[inline]
    pub fn is_audio(&self) -> bool { self.mode == TrackMode::Audio }

    /// Whether the image stores subchannel data for this track.
    #[inline]
    pub fn has_subchannel(&self) -> bool { self.subchannel_size > 0 }

    /// Physical byte offset of logical sector `sector`'s user data.
    ///
    /// `sector` must lie within `start_sector..=end_sector`.
    #[inline]
    pub fn sector_offset(&self, sector: u64) -> u64 {
        self.image_offset
            + (sector - self.start_sector) * self.sector_size as u64
            + self.data_offset as u64
    }

    /// Total user/audio payload size of the track in bytes.
    #[inline]
    pub fn payload_size(&self) -> u64 { self.length * self.main_data_size as u64 }
}

/// A recording session containing one or more tracks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionInfo {
    /// 1-based session number.
    pub number: u8,
    /// Session type from the TOC.
    pub session_type: SessionType,
    /// Media catalog number, if recorded.
    pub mcn: Option<String>,
    /// Tracks, ordered by track number.
    pub tracks: Vec<TrackInfo>,
    /// Lead-out length in sectors, if recorded.
    pub leadout_length: u32,
}

/// Parsed layout of one disc image.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiscInfo {
    /// Physical medium type.
    pub medium: MediumType,
    /// Volume identifier, if recorded by the image format.
    pub volume_id: Option<String>,
    /// Disc title from CD-TEXT, if recorded.
    pub title: Option<String>,
    /// Sessions in session number order. Non-empty for a valid disc.
    pub sessions: Vec<SessionInfo>,
    /// Total image size in bytes, if recorded.
    pub total_size: u64,
}

impl DiscInfo {
    /// Iterates all tracks across all sessions.
    #[inline]
    pub fn tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.sessions.iter().flat_map(|s| s.tracks.iter())
    }

    /// Returns all data tracks ordered by start sector.
    ///
    /// This ordering defines the logical 2048-byte sector space that
    /// filesystem reads operate on.
    pub fn data_tracks(&self) -> Vec<TrackInfo> {
        let mut tracks: Vec<TrackInfo> =
            self.tracks().filter(|t| !t.is_audio()).cloned().collect();
        tracks.sort_by_key(|t| t.start_sector);
        tracks
    }

    /// Whether any session contains an audio track.
    #[inline]
    pub fn has_audio(&self) -> bool { self.tracks().any(|t| t.is_audio()) }

    /// Whether any session contains a data track.
    #[inline]
    pub fn has_data(&self) -> bool { self.tracks().any(|t| !t.is_audio()) }

    /// Validates the session and track invariants.
    ///
    /// A [`DiscInfo`] either fully satisfies its invariants or is discarded
    /// whole; format probing treats a validation failure as "no match".
    pub fn validate(&self) -> Result<()> {
        if self.sessions.is_empty() {
            return Err(Error::DiscFormat("Disc image has no sessions".to_string()));
        }
        for session in &self.sessions {
            if session.tracks.is_empty() {
                return Err(Error::DiscFormat(format!(
                    "Session {} has no tracks",
                    session.number
                )));
            }
            if !session.tracks.windows(2).all(|w| w[0].number < w[1].number) {
                return Err(Error::DiscFormat(format!(
                    "Session {} tracks out of order",
                    session.number
                )));
            }
            for track in &session.tracks {
                if track.number == 0 || track.number > 99 {
                    return Err(Error::DiscFormat(format!(
                        "Invalid track number {}",
                        track.number
                    )));
                }
                if track.length != track.end_sector - track.start_sector + 1 {
                    return Err(Error::DiscFormat(format!(
                        "Track {} length {} does not match sector range {}..={}",
                        track.number, track.length, track.start_sector, track.end_sector
                    )));
                }
                if track.sector_size != track.main_data_size + track.subchannel_size {
                    return Err(Error::DiscFormat(format!(
                        "Track {} sector size {} != main {} + subchannel {}",
                        track.number, track.sector_size, track.main_data_size,
                        track.subchannel_size
                    )));
                }
                if track.data_offset >= track.main_data_size {
                    return Err(Error::DiscFormat(format!(
                        "Track {} data offset {} exceeds main data size {}",
                        track.number, track.data_offset, track.main_data_size
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_track(number: u8, start: u64, len: u64) -> TrackInfo {
        TrackInfo {
            number,
            session: 1,
            start_sector: start,
            end_sector: start + len - 1,
            length: len,
            image_offset: start * 2352,
            sector_size: 2352,
            main_data_size: 2352,
            subchannel_size: 0,
            data_offset: 0,
            mode: TrackMode::Audio,
            ..Default::default()
        }
    }

    #[test]
    fn test_sector_offset() {
        let track = TrackInfo {
            start_sector: 150,
            end_sector: 299,
            length: 150,
            image_offset: 352800,
            sector_size: 2352,
            main_data_size: 2352,
            data_offset: 16,
            ..Default::default()
        };
        // First sector of the track starts at the image offset.
        assert_eq!(track.sector_offset(150), 352800 + 16);
        assert_eq!(track.sector_offset(151), 352800 + 2352 + 16);
    }

    #[test]
    fn test_validate_ordering() {
        let mut info = DiscInfo {
            sessions: vec![SessionInfo {
                number: 1,
                tracks: vec![test_track(1, 0, 100), test_track(2, 100, 50)],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(info.validate().is_ok());
        info.sessions[0].tracks.swap(0, 1);
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_validate_geometry() {
        let mut info = DiscInfo {
            sessions: vec![SessionInfo {
                number: 1,
                tracks: vec![test_track(1, 0, 100)],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(info.validate().is_ok());
        info.sessions[0].tracks[0].length = 99;
        assert!(info.validate().is_err());
        info.sessions[0].tracks[0].length = 100;
        info.sessions[0].tracks[0].subchannel_size = 96;
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_empty_session_rejected() {
        let info = DiscInfo {
            sessions: vec![SessionInfo { number: 1, ..Default::default() }],
            ..Default::default()
        };
        assert!(info.validate().is_err());
    }
}
