use std::{
    cmp::min,
    fs::File,
    io,
    io::{BufReader, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use crate::{ErrorContext, Result};

/// A cloneable, lazily opened read stream over an image file.
///
/// Cloning costs nothing until the clone reads; each clone reopens the file
/// on first use, so independent streams never share a file position.
#[derive(Debug)]
pub struct ImageFile {
    path: PathBuf,
    size: u64,
    open_file: Option<BufReader<File>>,
    pos: u64,
}

impl ImageFile {
    /// Opens an image file, failing if it cannot be stat'd.
    pub fn new(path: &Path) -> Result<ImageFile> {
        let metadata = path
            .metadata()
            .map_err(|e| e.context(format!("Failed to stat file {}", path.display())))?;
        Ok(ImageFile { path: path.to_path_buf(), size: metadata.len(), open_file: None, pos: 0 })
    }

    /// The file's path.
    pub fn path(&self) -> &Path { &self.path }

    /// The file's size in bytes.
    pub fn len(&self) -> u64 { self.size }

    /// Whether the file is empty.
    pub fn is_empty(&self) -> bool { self.size == 0 }

    /// Reads exactly `len` bytes at `offset`, or None when the range is out
    /// of bounds. Used by format probes which must not fail hard on
    /// truncated candidates.
    pub fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Option<Vec<u8>>> {
        if offset.checked_add(len as u64).map_or(true, |end| end > self.size) {
            return Ok(None);
        }
        self.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(Some(buf))
    }
}

impl Read for ImageFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.size {
            return Ok(0);
        }
        if self.open_file.is_none() {
            let mut file = BufReader::new(File::open(&self.path)?);
            file.seek(SeekFrom::Start(self.pos))?;
            self.open_file = Some(file);
        }
        let file = self.open_file.as_mut().unwrap();
        let to_read = min(buf.len(), (self.size - self.pos) as usize);
        let read = file.read(&mut buf[..to_read])?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl Seek for ImageFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Start(pos) => pos,
            SeekFrom::Current(offset) => self.pos.saturating_add_signed(offset),
            SeekFrom::End(offset) => self.size.saturating_add_signed(offset),
        };
        if pos != self.pos {
            if let Some(file) = &mut self.open_file {
                file.seek(SeekFrom::Start(pos))?;
            }
            self.pos = pos;
        }
        Ok(self.pos)
    }

    fn stream_position(&mut self) -> io::Result<u64> { Ok(self.pos) }
}

impl Clone for ImageFile {
    fn clone(&self) -> Self {
        Self { path: self.path.clone(), size: self.size, open_file: None, pos: 0 }
    }
}
