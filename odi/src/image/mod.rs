//! Disc image container formats and format probing.

use std::{
    fmt,
    io::{Seek, SeekFrom},
    path::Path,
};

use crate::{disc::DiscInfo, Error, Result, ResultContext};

pub(crate) mod c2d;
pub(crate) mod ccd;
pub(crate) mod cdi;
pub(crate) mod file;
pub(crate) mod iso;
pub(crate) mod mds;
pub(crate) mod nrg;

pub use file::ImageFile;

/// Supported disc image container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// CloneCD (.ccd + .img + optional .sub)
    Ccd,
    /// Alcohol 120% (.mds + .mdf)
    Mds,
    /// Nero Burning ROM (.nrg)
    Nrg,
    /// WinOnCD (.c2d)
    C2d,
    /// DiscJuggler (.cdi)
    Cdi,
    /// Raw ISO / BIN image
    Iso,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Ccd => write!(f, "CloneCD"),
            ImageFormat::Mds => write!(f, "Alcohol 120%"),
            ImageFormat::Nrg => write!(f, "Nero"),
            ImageFormat::C2d => write!(f, "WinOnCD"),
            ImageFormat::Cdi => write!(f, "DiscJuggler"),
            ImageFormat::Iso => write!(f, "ISO"),
        }
    }
}

/// A successfully parsed image: the disc layout plus the file its track
/// data lives in (the metadata file and the data file differ for sidecar
/// formats, e.g. `.ccd` + `.img`).
pub(crate) struct ParsedImage {
    pub info: DiscInfo,
    pub data: ImageFile,
}

/// One member of the closed format-reader set.
///
/// `try_parse` returns `Ok(None)` both when the file is not this reader's
/// format and when it matches the signature but is malformed; only genuine
/// I/O failures surface as errors.
pub(crate) trait FormatReader: Sync {
    fn format(&self) -> ImageFormat;
    fn try_parse(&self, path: &Path, file: &mut ImageFile) -> Result<Option<ParsedImage>>;
}

/// Probe order: sidecar and magic-bearing formats first, the raw ISO
/// heuristic last since it matches on file size alone.
const READERS: &[&dyn FormatReader] = &[
    &ccd::CcdReader,
    &mds::MdsReader,
    &nrg::NrgReader,
    &c2d::C2dReader,
    &cdi::CdiReader,
    &iso::IsoReader,
];

/// Probes all format readers in priority order, returning the first match.
pub(crate) fn open(path: &Path) -> Result<(ImageFormat, ParsedImage)> {
    let mut file = ImageFile::new(path)?;
    for reader in READERS {
        file.seek(SeekFrom::Start(0))
            .with_context(|| format!("Seeking {}", path.display()))?;
        let Some(parsed) = reader.try_parse(path, &mut file)? else {
            continue;
        };
        // A layout that fails its own invariants is discarded whole, as if
        // the reader had not matched.
        match parsed.info.validate() {
            Ok(()) => {
                log::debug!("Detected {} image: {}", reader.format(), path.display());
                return Ok((reader.format(), parsed));
            }
            Err(e) => {
                log::warn!("{} layout rejected for {}: {}", reader.format(), path.display(), e);
            }
        }
    }
    Err(Error::DiscFormat(format!("Unknown disc image format: {}", path.display())))
}

/// Identifies the image format without building an archive.
pub(crate) fn detect(path: &Path) -> Result<Option<ImageFormat>> {
    match open(path) {
        Ok((format, _)) => Ok(Some(format)),
        Err(Error::DiscFormat(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
