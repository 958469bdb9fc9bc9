//! Sector-addressed read streams over disc images.

use std::{
    io,
    io::{Read, Seek, SeekFrom},
};

use dyn_clone::DynClone;

use crate::{
    disc::{TrackInfo, ISO_SECTOR_SIZE},
    util::div_rem,
};

/// Required trait bounds for reading disc images.
pub trait DiscStream: Read + Seek + DynClone + Send + Sync {}

impl<T> DiscStream for T where T: Read + Seek + DynClone + Send + Sync + ?Sized {}

dyn_clone::clone_trait_object!(DiscStream);

/// Reads the user/audio payload of a single track as a contiguous stream.
///
/// Logical payload byte `p` maps to physical byte
/// `image_offset + (p / main) * sector_size + data_offset + (p % main)`,
/// skipping sync/header and subchannel bytes of every sector.
#[derive(Clone)]
pub struct TrackStream {
    stream: Box<dyn DiscStream>,
    image_offset: u64,
    sector_size: u64,
    main_data_size: u64,
    data_offset: u64,
    len: u64,
    pos: u64,
}

impl TrackStream {
    /// Creates a payload stream over `track` within the image `stream`.
    pub fn new(stream: Box<dyn DiscStream>, track: &TrackInfo) -> TrackStream {
        TrackStream {
            stream,
            image_offset: track.image_offset,
            sector_size: track.sector_size as u64,
            main_data_size: track.main_data_size as u64,
            data_offset: track.data_offset as u64,
            len: track.payload_size(),
            pos: 0,
        }
    }

    /// Total payload length in bytes.
    #[inline]
    pub fn len(&self) -> u64 { self.len }

    /// Whether the track payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool { self.len == 0 }
}

impl Read for TrackStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < out.len() && self.pos < self.len {
            let (sector, offset) = div_rem(self.pos, self.main_data_size);
            let physical =
                self.image_offset + sector * self.sector_size + self.data_offset + offset;
            let available = (self.main_data_size - offset).min(self.len - self.pos);
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

impl Seek for TrackStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        // Positions clamp to the payload bounds, matching the permissive
        // stream contract of the rest of the read path.
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

/// Presents the ordered data tracks of a disc as one logical run of
/// 2048-byte sectors (the view an ISO9660/UDF filesystem is addressed in).
///
/// Logical sector `n` belongs to the track whose accumulated length range
/// covers `n`; track start sectors in the image metadata do not shift this
/// space.
#[derive(Clone)]
pub struct DiscDataStream {
    stream: Box<dyn DiscStream>,
    tracks: Vec<TrackInfo>,
    len: u64,
    pos: u64,
}

impl DiscDataStream {
    /// Creates a logical data stream over `tracks`, which must be the data
    /// tracks of a disc ordered by start sector.
    pub fn new(stream: Box<dyn DiscStream>, tracks: Vec<TrackInfo>) -> DiscDataStream {
        let len = tracks.iter().map(|t| t.length * ISO_SECTOR_SIZE as u64).sum();
        DiscDataStream { stream, tracks, len, pos: 0 }
    }

    /// Total logical data size in bytes.
    #[inline]
    pub fn len(&self) -> u64 { self.len }

    /// Whether the disc has no data sectors.
    #[inline]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Number of logical 2048-byte sectors.
    #[inline]
    pub fn sector_count(&self) -> u64 { self.len / ISO_SECTOR_SIZE as u64 }

    /// Locates the track covering logical sector `lba`, returning the track
    /// and its first logical sector.
    fn find_track(&self, lba: u64) -> Option<(&TrackInfo, u64)> {
        let mut start = 0u64;
        for track in &self.tracks {
            if lba < start + track.length {
                return Some((track, start));
            }
            start += track.length;
        }
        None
    }

    /// Reads one logical 2048-byte sector.
    pub fn read_sector(&mut self, lba: u64, out: &mut [u8; ISO_SECTOR_SIZE]) -> io::Result<()> {
        self.read_exact_at(lba * ISO_SECTOR_SIZE as u64, out)
    }

    /// Reads `out.len()` bytes at logical position `pos`, failing on EOF.
    pub fn read_exact_at(&mut self, pos: u64, out: &mut [u8]) -> io::Result<()> {
        self.pos = pos.min(self.len);
        let mut filled = 0;
        while filled < out.len() {
            let read = self.read(&mut out[filled..])?;
            if read == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
            filled += read;
        }
        Ok(())
    }
}

impl Read for DiscDataStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        while total < out.len() && self.pos < self.len {
            let (lba, offset) = div_rem(self.pos, ISO_SECTOR_SIZE as u64);
            let Some((track, track_start)) = self.find_track(lba) else {
                break;
            };
            let physical = track.image_offset
                + (lba - track_start) * track.sector_size as u64
                + track.data_offset as u64
                + offset;
            let available = ISO_SECTOR_SIZE as u64 - offset;
            let len = (out.len() - total).min(available as usize).min((self.len - self.pos) as usize);
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

impl Seek for DiscDataStream {
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

/// Length of the synthesized RIFF WAV header.
pub const WAV_HEADER_SIZE: usize = 44;

/// Builds a 44-byte RIFF header describing CD audio (44.1 kHz stereo s16le).
pub(crate) fn wav_header(data_size: u64) -> [u8; WAV_HEADER_SIZE] {
    let mut header = [0u8; WAV_HEADER_SIZE];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&((data_size + 36) as u32).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&2u16.to_le_bytes());
    header[24..28].copy_from_slice(&44100u32.to_le_bytes());
    header[28..32].copy_from_slice(&(44100u32 * 2 * 2).to_le_bytes());
    header[32..34].copy_from_slice(&4u16.to_le_bytes());
    header[34..36].copy_from_slice(&16u16.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&(data_size as u32).to_le_bytes());
    header
}

/// An audio track presented as a WAV file: 44-byte header followed by the
/// raw PCM payload.
#[derive(Clone)]
pub struct WavTrackStream {
    header: [u8; WAV_HEADER_SIZE],
    payload: TrackStream,
    len: u64,
    pos: u64,
}

impl WavTrackStream {
    /// Creates a WAV view of an audio track.
    pub fn new(stream: Box<dyn DiscStream>, track: &TrackInfo) -> WavTrackStream {
        let payload = TrackStream::new(stream, track);
        let len = payload.len() + WAV_HEADER_SIZE as u64;
        WavTrackStream { header: wav_header(payload.len()), payload, len, pos: 0 }
    }

    /// Total stream length including the header.
    #[inline]
    pub fn len(&self) -> u64 { self.len }

    /// Always false; the header alone is 44 bytes.
    #[inline]
    pub fn is_empty(&self) -> bool { false }
}

impl Read for WavTrackStream {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut total = 0;
        if self.pos < WAV_HEADER_SIZE as u64 {
            let offset = self.pos as usize;
            let len = (WAV_HEADER_SIZE - offset).min(out.len());
            out[..len].copy_from_slice(&self.header[offset..offset + len]);
            self.pos += len as u64;
            total += len;
        }
        if total < out.len() && self.pos < self.len {
            self.payload.seek(SeekFrom::Start(self.pos - WAV_HEADER_SIZE as u64))?;
            let read = self.payload.read(&mut out[total..])?;
            self.pos += read as u64;
            total += read;
        }
        Ok(total)
    }
}

impl Seek for WavTrackStream {
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
    use crate::disc::TrackMode;

    // Builds a two-sector raw Mode1 image where each sector's user data
    // area is filled with the sector index.
    fn raw_mode1_image(sectors: u8) -> Vec<u8> {
        let mut image = Vec::new();
        for i in 0..sectors {
            let mut sector = [0u8; 2352];
            sector[1..11].fill(0xFF);
            sector[15] = 1;
            sector[16..2064].fill(i + 1);
            image.extend_from_slice(&sector);
        }
        image
    }

    fn mode1_track(sectors: u8) -> TrackInfo {
        TrackInfo {
            number: 1,
            session: 1,
            start_sector: 0,
            end_sector: sectors as u64 - 1,
            length: sectors as u64,
            image_offset: 0,
            sector_size: 2352,
            main_data_size: 2048,
            subchannel_size: 0,
            data_offset: 16,
            mode: TrackMode::Mode1,
            ..Default::default()
        }
    }

    #[test]
    fn test_track_stream_skips_headers() {
        let image = raw_mode1_image(3);
        let track = mode1_track(3);
        let mut stream = TrackStream::new(Box::new(Cursor::new(image)), &track);
        assert_eq!(stream.len(), 3 * 2048);

        let mut buf = vec![0u8; 2048 * 3];
        stream.read_exact(&mut buf).unwrap();
        assert!(buf[..2048].iter().all(|&b| b == 1));
        assert!(buf[2048..4096].iter().all(|&b| b == 2));
        assert!(buf[4096..].iter().all(|&b| b == 3));
    }

    #[test]
    fn test_track_stream_cross_sector_read() {
        let image = raw_mode1_image(2);
        let track = mode1_track(2);
        let mut stream = TrackStream::new(Box::new(Cursor::new(image)), &track);
        stream.seek(SeekFrom::Start(2040)).unwrap();
        let mut buf = [0u8; 16];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..8], &[1; 8]);
        assert_eq!(&buf[8..], &[2; 8]);
    }

    #[test]
    fn test_data_stream_accumulated_lba() {
        // Two data tracks that are not adjacent in the image file.
        let mut image = raw_mode1_image(2);
        let gap = image.len() as u64 + 1000;
        image.resize(gap as usize, 0);
        let mut sector = [0u8; 2352];
        sector[16..2064].fill(0xEE);
        image.extend_from_slice(&sector);

        let mut track2 = mode1_track(1);
        track2.number = 2;
        track2.start_sector = 100;
        track2.end_sector = 100;
        track2.image_offset = gap;
        let tracks = vec![mode1_track(2), track2];

        let mut stream = DiscDataStream::new(Box::new(Cursor::new(image)), tracks);
        assert_eq!(stream.sector_count(), 3);

        // Logical sector 2 is the second track regardless of its start_sector.
        let mut buf = [0u8; 2048];
        stream.read_sector(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xEE));
        stream.read_sector(1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
    }

    #[test]
    fn test_data_stream_eof() {
        let image = raw_mode1_image(1);
        let tracks = vec![mode1_track(1)];
        let mut stream = DiscDataStream::new(Box::new(Cursor::new(image)), tracks);
        let mut buf = [0u8; 2048];
        assert!(stream.read_sector(1, &mut buf).is_err());
    }

    #[test]
    fn test_wav_stream_header() {
        let mut image = vec![0u8; 2352];
        for (i, b) in image.iter_mut().enumerate() {
            *b = i as u8;
        }
        let track = TrackInfo {
            number: 1,
            start_sector: 0,
            end_sector: 0,
            length: 1,
            sector_size: 2352,
            main_data_size: 2352,
            mode: TrackMode::Audio,
            ..Default::default()
        };
        let mut stream = WavTrackStream::new(Box::new(Cursor::new(image)), &track);
        assert_eq!(stream.len(), 2352 + 44);

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        assert_eq!(&buf[0..4], b"RIFF");
        assert_eq!(&buf[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([buf[40], buf[41], buf[42], buf[43]]), 2352);
        assert_eq!(buf[44], 0);
        assert_eq!(buf[45], 1);
        assert_eq!(buf.len(), 2396);
    }
}
