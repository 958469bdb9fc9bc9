#![warn(missing_docs, clippy::missing_inline_in_public_items)]
//! Library for reading CD/DVD disc images.
//!
//! A disc image is parsed into a session/track layout, then presented as an
//! archive of entries: files of an ISO9660 or UDF filesystem when one is
//! present, or raw track data (ISO / CUE+WAV) otherwise.
//!
//! Currently supported container formats:
//! - CloneCD (.ccd + .img)
//! - Alcohol 120% (.mds + .mdf)
//! - Nero Burning ROM (.nrg)
//! - WinOnCD (.c2d)
//! - DiscJuggler (.cdi)
//! - Raw ISO / BIN
//!
//! # Examples
//!
//! Opening a disc image and listing its contents:
//!
//! ```no_run
//! let disc = odi::DiscImage::new("path/to/file.mds")
//!     .expect("Failed to open disc image");
//! println!("Format: {}", disc.format());
//! for session in &disc.info().sessions {
//!     for track in &session.tracks {
//!         println!("Track {:02}: {} ({} sectors)", track.number, track.mode, track.length);
//!     }
//! }
//!
//! let archive = disc.open_archive().expect("Failed to build archive");
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.name, entry.size);
//! }
//! ```
//!
//! Extracting a file:
//!
//! ```no_run
//! let disc = odi::DiscImage::new("path/to/file.nrg")
//!     .expect("Failed to open disc image");
//! let archive = disc.open_archive().expect("Failed to build archive");
//! let entry = archive.entries().first().expect("Empty archive").clone();
//! let mut reader = archive.open(&entry).expect("Failed to open entry");
//! let mut out = std::fs::File::create(&entry.name).expect("Failed to create output");
//! std::io::copy(&mut reader, &mut out).expect("Failed to write data");
//! ```

use std::path::Path;

pub use archive::{ArchiveEntry, DiscArchive, EntryData};
pub use disc::{
    geometry::{sector_layout, Msf, SectorLayout},
    streams::{DiscDataStream, DiscStream, TrackStream, WavTrackStream, WAV_HEADER_SIZE},
    DiscInfo, MediumType, SessionInfo, SessionType, TrackInfo, TrackMode, ISO_SECTOR_SIZE,
    RAW_SECTOR_SIZE,
};
pub use fs::{
    iso9660::IsoWriter,
    FsEntry,
};
pub use image::{ImageFile, ImageFormat};

mod archive;
mod disc;
mod fs;
mod image;
mod util;

/// Error types for odi.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error for disc format related issues.
    #[error("disc format error: {0}")]
    DiscFormat(String),
    /// A general I/O error.
    #[error("I/O error: {0}")]
    Io(String, #[source] std::io::Error),
    /// An unknown error.
    #[error("error: {0}")]
    Other(String),
}

impl From<&str> for Error {
    #[inline]
    fn from(s: &str) -> Error { Error::Other(s.to_string()) }
}

impl From<String> for Error {
    #[inline]
    fn from(s: String) -> Error { Error::Other(s) }
}

/// Helper result type for [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Helper trait for adding context to errors.
pub trait ErrorContext {
    /// Adds context to an error.
    fn context(self, context: impl Into<String>) -> Error;
}

impl ErrorContext for std::io::Error {
    #[inline]
    fn context(self, context: impl Into<String>) -> Error { Error::Io(context.into(), self) }
}

/// Helper trait for adding context to result errors.
pub trait ResultContext<T> {
    /// Adds context to a result error.
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Adds context to a result error using a closure.
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String;
}

impl<T, E> ResultContext<T> for Result<T, E>
where E: ErrorContext
{
    #[inline]
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    #[inline]
    fn with_context<F>(self, f: F) -> Result<T>
    where F: FnOnce() -> String {
        self.map_err(|e| e.context(f()))
    }
}

/// An open, parsed disc image.
///
/// This is the primary entry point for reading disc images.
pub struct DiscImage {
    format: ImageFormat,
    info: DiscInfo,
    data: ImageFile,
}

impl DiscImage {
    /// Opens and parses a disc image from a file path.
    ///
    /// All format readers are probed in priority order; the first reader
    /// whose layout satisfies the disc invariants wins.
    #[inline]
    pub fn new<P: AsRef<Path>>(path: P) -> Result<DiscImage> {
        let (format, parsed) = image::open(path.as_ref())?;
        Ok(DiscImage { format, info: parsed.info, data: parsed.data })
    }

    /// Detects the image format from a file path without building an archive.
    ///
    /// Returns `Ok(None)` when no format reader matches.
    #[inline]
    pub fn detect<P: AsRef<Path>>(path: P) -> Result<Option<ImageFormat>> {
        image::detect(path.as_ref())
    }

    /// The detected container format.
    #[inline]
    pub fn format(&self) -> ImageFormat { self.format }

    /// The parsed session/track layout.
    #[inline]
    pub fn info(&self) -> &DiscInfo { &self.info }

    /// The file the track data lives in. For sidecar formats this is not
    /// the file the metadata was parsed from (e.g. `.img` for `.ccd`).
    #[inline]
    pub fn data_file(&self) -> &ImageFile { &self.data }

    /// Builds the archive view of the disc: filesystem entries when the
    /// data tracks carry ISO9660/UDF, raw track entries otherwise.
    #[inline]
    pub fn open_archive(&self) -> Result<DiscArchive> {
        DiscArchive::new(&self.info, self.data.clone())
    }
}
