//! Sector layout tables and first-sector mode sniffing.

use std::fmt;

use crate::disc::TrackMode;

/// Byte layout of one physical sector in an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorLayout {
    /// Physical sector stride in bytes.
    pub sector_size: u32,
    /// Bytes of user/audio data per sector.
    pub main_data_size: u32,
    /// Trailing subchannel bytes per sector.
    pub subchannel_size: u32,
    /// Bytes to skip within each sector before user data.
    pub data_offset: u32,
}

/// Derives the sector layout for a declared sector size and track mode.
///
/// Unrecognized sizes fall back to `(size, 0, 0)` rather than failing;
/// callers must treat that as "unknown layout, best effort".
pub fn sector_layout(sector_size: u32, mode: TrackMode) -> SectorLayout {
    let (main_data_size, subchannel_size) = match sector_size {
        2448 => (2352, 96),
        2368 => (2352, 16),
        2352 => (2352, 0),
        2336 => (2336, 0),
        2332 => (2332, 0),
        2056 => (2048, 8),
        2048 => (2048, 0),
        other => (other, 0),
    };
    let data_offset = if mode == TrackMode::Audio {
        0
    } else {
        match main_data_size {
            2352 => 16,
            2336 | 2332 => 8,
            _ => 0,
        }
    };
    SectorLayout { sector_size, main_data_size, subchannel_size, data_offset }
}

/// Checks for the 12-byte raw sector sync pattern `00 FF*10 00`.
#[inline]
pub fn has_sync_pattern(sector: &[u8]) -> bool {
    sector.len() >= 12
        && sector[0] == 0x00
        && sector[11] == 0x00
        && sector[1..11].iter().all(|&b| b == 0xFF)
}

/// Mode 2 XA sub-header signature found at bytes 16..24 of a raw sector.
const XA_SUBHEADER: [u8; 8] = [0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x08, 0x00];

/// Determines the track mode by inspecting a raw 2352-byte sector.
///
/// No sync pattern means audio. For Mode 2 sectors the XA sub-header
/// signature distinguishes mixed-form XA data from formless Mode 2.
pub fn sniff_sector_mode(sector: &[u8]) -> TrackMode {
    if sector.len() < 16 || !has_sync_pattern(sector) {
        return TrackMode::Audio;
    }
    match sector[15] {
        1 => TrackMode::Mode1,
        2 => {
            if sector.len() >= 24 && sector[16..24] == XA_SUBHEADER {
                TrackMode::Mode2Mixed
            } else {
                TrackMode::Mode2
            }
        }
        _ => TrackMode::Audio,
    }
}

/// A minute/second/frame sector address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Msf {
    /// Minutes.
    pub m: u8,
    /// Seconds (0-59).
    pub s: u8,
    /// Frames (0-74).
    pub f: u8,
}

impl Msf {
    /// Converts a file-relative sector address to MSF (no lead-in offset).
    #[inline]
    pub fn from_lba(lba: u64) -> Msf {
        Msf { m: (lba / 75 / 60) as u8, s: ((lba / 75) % 60) as u8, f: (lba % 75) as u8 }
    }
}

impl fmt::Display for Msf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.m, self.s, self.f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_layout_table() {
        // Every known size splits into main + subchannel exactly.
        for size in [2048u32, 2056, 2332, 2336, 2352, 2368, 2448] {
            for mode in [TrackMode::Audio, TrackMode::Mode1, TrackMode::Mode2Mixed] {
                let layout = sector_layout(size, mode);
                assert_eq!(layout.main_data_size + layout.subchannel_size, size);
                assert!(layout.data_offset < layout.main_data_size);
                if mode == TrackMode::Audio {
                    assert_eq!(layout.data_offset, 0);
                }
            }
        }
    }

    #[test]
    fn test_sector_layout_values() {
        let layout = sector_layout(2448, TrackMode::Mode1);
        assert_eq!(layout.main_data_size, 2352);
        assert_eq!(layout.subchannel_size, 96);
        assert_eq!(layout.data_offset, 16);

        let layout = sector_layout(2336, TrackMode::Mode2Mixed);
        assert_eq!(layout.main_data_size, 2336);
        assert_eq!(layout.data_offset, 8);

        let layout = sector_layout(2056, TrackMode::Mode1);
        assert_eq!(layout.main_data_size, 2048);
        assert_eq!(layout.subchannel_size, 8);
        assert_eq!(layout.data_offset, 0);

        let layout = sector_layout(2352, TrackMode::Audio);
        assert_eq!(layout.data_offset, 0);
    }

    #[test]
    fn test_sector_layout_fallback() {
        let layout = sector_layout(2330, TrackMode::Mode1);
        assert_eq!(layout.main_data_size, 2330);
        assert_eq!(layout.subchannel_size, 0);
        assert_eq!(layout.data_offset, 0);
    }

    fn sync_sector(mode: u8) -> [u8; 2352] {
        let mut sector = [0u8; 2352];
        sector[1..11].fill(0xFF);
        sector[15] = mode;
        sector
    }

    #[test]
    fn test_sniff_mode1() {
        assert_eq!(sniff_sector_mode(&sync_sector(1)), TrackMode::Mode1);
    }

    #[test]
    fn test_sniff_mode2_xa() {
        let mut sector = sync_sector(2);
        assert_eq!(sniff_sector_mode(&sector), TrackMode::Mode2);
        sector[16..24].copy_from_slice(&XA_SUBHEADER);
        assert_eq!(sniff_sector_mode(&sector), TrackMode::Mode2Mixed);
    }

    #[test]
    fn test_sniff_no_sync() {
        let sector = [0x55u8; 2352];
        assert_eq!(sniff_sector_mode(&sector), TrackMode::Audio);
        // Sync but unknown mode byte is treated as audio as well.
        assert_eq!(sniff_sector_mode(&sync_sector(7)), TrackMode::Audio);
    }

    #[test]
    fn test_msf_display() {
        assert_eq!(Msf::from_lba(0).to_string(), "00:00:00");
        assert_eq!(Msf::from_lba(75).to_string(), "00:01:00");
        assert_eq!(Msf::from_lba(4500 + 74).to_string(), "01:00:74");
    }
}
