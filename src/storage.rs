use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;

/// Random-access storage for one content item.
///
/// Offsets are logical content offsets. Both operations are all-or-nothing
/// from the caller's point of view: a short read or write is an error.
pub trait Backend {
    /// Fills `buf` with the bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Writes all of `data` starting at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        (**self).write_at(offset, data)
    }
}

#[derive(Debug, Error)]
#[error("failed to open {path}: {source}")]
pub struct OpenError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

#[derive(Debug)]
struct FileEntry {
    path: PathBuf,
    file: File,
    length: u64,
    offset: u64,
}

/// A [`Backend`] over one or more files laid end to end, the way a torrent
/// maps its content onto disk. Single-file content is a one-entry layout.
#[derive(Debug)]
pub struct FileStore {
    files: Vec<FileEntry>,
    total_length: u64,
}

impl FileStore {
    /// Opens every file of the layout for reading and writing.
    ///
    /// Files are never created; a missing file is an error.
    pub fn open<P: AsRef<Path>>(layout: &[(P, u64)]) -> Result<Self, OpenError> {
        let mut files = Vec::with_capacity(layout.len());
        let mut current_offset = 0u64;
        for (path, length) in layout {
            let path = path.as_ref().to_path_buf();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|source| OpenError {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), length, offset = current_offset, "opened file");
            files.push(FileEntry {
                path,
                file,
                length: *length,
                offset: current_offset,
            });
            current_offset += length;
        }
        Ok(Self {
            files,
            total_length: current_offset,
        })
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Syncs every file's data to disk.
    pub fn flush(&mut self) -> io::Result<()> {
        for entry in &self.files {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    /// Splits the logical range `[offset, offset + length)` into
    /// `(file index, offset in file, byte count)` runs.
    fn locate(&self, offset: u64, length: u64) -> io::Result<Vec<(usize, u64, u64)>> {
        let in_bounds = offset
            .checked_add(length)
            .is_some_and(|end| end <= self.total_length);
        if !in_bounds {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} exceeds content length {}",
                    offset, length, self.total_length
                ),
            ));
        }

        let mut remaining = length;
        let mut global_offset = offset;
        let mut result = Vec::new();

        for (i, file) in self.files.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let file_end = file.offset + file.length;
            if global_offset >= file_end {
                continue;
            }

            let file_offset = global_offset - file.offset;
            let len = (file_end - global_offset).min(remaining);
            result.push((i, file_offset, len));

            remaining -= len;
            global_offset += len;
        }

        debug_assert!(remaining == 0);
        Ok(result)
    }
}

impl Backend for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut done = 0usize;
        for (file_idx, file_offset, len) in self.locate(offset, buf.len() as u64)? {
            let entry = &mut self.files[file_idx];
            let end = done + len as usize;
            entry
                .file
                .seek(SeekFrom::Start(file_offset))
                .and_then(|_| entry.file.read_exact(&mut buf[done..end]))
                .map_err(|e| with_path(e, &entry.path))?;
            done = end;
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let mut done = 0usize;
        for (file_idx, file_offset, len) in self.locate(offset, data.len() as u64)? {
            let entry = &mut self.files[file_idx];
            let end = done + len as usize;
            entry
                .file
                .seek(SeekFrom::Start(file_offset))
                .and_then(|_| entry.file.write_all(&data[done..end]))
                .map_err(|e| with_path(e, &entry.path))?;
            done = end;
        }
        Ok(())
    }
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}

/// An in-memory [`Backend`]. Reads past the end fail; writes past the end
/// grow the buffer with zeroes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Backend for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of buffer")
            })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let end = start + data.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Passes reads through to the wrapped backend and discards writes.
#[derive(Debug)]
pub struct DryRun<B> {
    inner: B,
    discarded: u64,
}

impl<B> DryRun<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            discarded: 0,
        }
    }

    /// Total bytes that would have been written.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn get_ref(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: Backend> Backend for DryRun<B> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, _offset: u64, data: &[u8]) -> io::Result<()> {
        self.discarded += data.len() as u64;
        Ok(())
    }
}
