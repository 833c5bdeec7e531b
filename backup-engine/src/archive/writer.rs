//! Reopenable append writer.
//!
//! Every chunk opens the archive, appends entries and closes it again.
//! Appending overwrites the central directory and end record at the tail;
//! entry data committed by earlier chunks is never touched.
//!
//! Before the first byte of an append, the committed tail (everything from
//! the central directory start to the end of the file) is saved next to the
//! archive as `<archive>.rollback`. If the process dies mid-append the
//! archive no longer parses; the next open truncates it back to the central
//! directory start and writes the saved tail again, which restores exactly
//! the last closed state. A successful close removes the rollback file.

use crate::{EngineError, Result};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Entries at or above this size need zip64 headers.
const LARGE_FILE_THRESHOLD: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zstd(i64),
    Deflate(i64),
    Stored,
}

impl Compression {
    pub fn from_config(name: &str, level: i64) -> Result<Self> {
        match name {
            "zstd" => Ok(Compression::Zstd(level)),
            "deflate" => Ok(Compression::Deflate(level.clamp(0, 9))),
            "stored" => Ok(Compression::Stored),
            other => Err(EngineError::Config(format!("unknown compression '{}'", other))),
        }
    }
}

/// Result of adding one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added { bytes: u64 },
    /// The name was committed by an earlier open of this archive
    AlreadyPresent,
}

pub struct ArchiveWriter {
    zip: ZipWriter<File>,
    path: PathBuf,
    compression: Compression,
    existing: HashSet<String>,
    added: usize,
}

impl ArchiveWriter {
    /// Open `path` for appending, creating a fresh archive if it does not exist yet
    pub fn open(path: &Path, compression: Compression) -> Result<Self> {
        let reopen = path.metadata().map(|m| m.len() > 0).unwrap_or(false);

        let (zip, existing) = if reopen {
            let archive = match read_archive(path) {
                Ok(archive) => archive,
                Err(e) => {
                    if !restore_rollback(path)? {
                        return Err(e);
                    }
                    read_archive(path)?
                }
            };
            let names = archive.file_names().map(str::to_string).collect::<HashSet<_>>();
            save_rollback(path, archive.central_directory_start())?;
            drop(archive);

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(|e| open_error(path, e))?;
            let zip = ZipWriter::new_append(file).map_err(|e| open_error(path, e))?;
            (zip, names)
        } else {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| open_error(path, e))?;
            }
            remove_file_if_exists(&rollback_path(path)).map_err(|e| open_error(path, e))?;
            let file = File::create(path).map_err(|e| open_error(path, e))?;
            (ZipWriter::new(file), HashSet::new())
        };

        tracing::debug!(
            path = %path.display(),
            existing_entries = existing.len(),
            "Archive opened"
        );

        Ok(Self {
            zip,
            path: path.to_path_buf(),
            compression,
            existing,
            added: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove an archive together with its rollback file
    pub fn discard(path: &Path) -> io::Result<()> {
        remove_file_if_exists(path)?;
        remove_file_if_exists(&rollback_path(path))
    }

    pub fn contains(&self, archive_path: &str) -> bool {
        self.existing.contains(archive_path)
    }

    /// Entries added since this handle was opened
    pub fn added(&self) -> usize {
        self.added
    }

    fn file_options(&self, size_hint: u64) -> SimpleFileOptions {
        let options = SimpleFileOptions::default().large_file(size_hint >= LARGE_FILE_THRESHOLD);
        match self.compression {
            Compression::Zstd(level) => options
                .compression_method(CompressionMethod::Zstd)
                .compression_level(Some(level)),
            Compression::Deflate(level) => options
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(level)),
            Compression::Stored => options.compression_method(CompressionMethod::Stored),
        }
    }

    /// Stream a file from disk into the archive.
    ///
    /// The file is read at add time, so its current size wins over the
    /// size recorded during enumeration. A read failure discards the
    /// partial entry and leaves the archive usable.
    pub fn add_file(&mut self, disk_path: &Path, archive_path: &str) -> Result<AddOutcome> {
        if self.existing.contains(archive_path) {
            return Ok(AddOutcome::AlreadyPresent);
        }

        let mut source = File::open(disk_path)?;
        let metadata = source.metadata()?;
        let mut options = self.file_options(metadata.len());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            options = options.unix_permissions(metadata.permissions().mode() & 0o7777);
        }

        self.zip.start_file(archive_path, options)?;
        match io::copy(&mut source, &mut self.zip) {
            Ok(bytes) => {
                self.register(archive_path);
                Ok(AddOutcome::Added { bytes })
            }
            Err(e) => {
                self.zip.abort_file()?;
                Err(EngineError::Io(e))
            }
        }
    }

    /// Add an in-memory entry
    pub fn add_bytes(&mut self, archive_path: &str, content: &[u8]) -> Result<AddOutcome> {
        self.add_with(archive_path, |out| {
            out.write_all(content)?;
            Ok(())
        })
    }

    /// Add an entry whose content is produced by `write`. On error the
    /// partial entry is discarded.
    pub fn add_with<F>(&mut self, archive_path: &str, write: F) -> Result<AddOutcome>
    where
        F: FnOnce(&mut dyn Write) -> Result<()>,
    {
        if self.existing.contains(archive_path) {
            return Ok(AddOutcome::AlreadyPresent);
        }

        let options = self.file_options(0).large_file(true);
        self.zip.start_file(archive_path, options)?;

        let mut counter = CountingWriter {
            inner: &mut self.zip,
            bytes: 0,
        };
        match write(&mut counter) {
            Ok(()) => {
                let bytes = counter.bytes;
                self.register(archive_path);
                Ok(AddOutcome::Added { bytes })
            }
            Err(e) => {
                self.zip.abort_file()?;
                Err(e)
            }
        }
    }

    fn register(&mut self, archive_path: &str) {
        self.existing.insert(archive_path.to_string());
        self.added += 1;
    }

    /// Write the central directory and flush to disk. Returns the archive size.
    pub fn close(self) -> Result<u64> {
        let file = self.zip.finish()?;
        file.sync_all()?;
        let size = file.metadata()?.len();
        remove_file_if_exists(&rollback_path(&self.path))?;
        tracing::debug!(path = %self.path.display(), added = self.added, size, "Archive closed");
        Ok(size)
    }
}

fn open_error(path: &Path, e: impl std::fmt::Display) -> EngineError {
    EngineError::ArchiveOpen(format!("{}: {}", path.display(), e))
}

fn read_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| open_error(path, e))?;
    ZipArchive::new(file).map_err(|e| open_error(path, e))
}

pub(crate) fn rollback_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".rollback");
    PathBuf::from(name)
}

fn remove_file_if_exists(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Save the committed tail of `path`: the central directory start as a
/// little-endian u64 followed by every byte from that offset to the end.
fn save_rollback(path: &Path, dir_start: u64) -> Result<()> {
    let mut archive = File::open(path).map_err(|e| open_error(path, e))?;
    archive.seek(SeekFrom::Start(dir_start))?;
    let mut tail = Vec::new();
    archive.read_to_end(&mut tail)?;

    let mut rollback = File::create(rollback_path(path))?;
    rollback.write_all(&dir_start.to_le_bytes())?;
    rollback.write_all(&tail)?;
    rollback.sync_all()?;
    Ok(())
}

/// Undo an interrupted append. Returns false when there is nothing to undo.
fn restore_rollback(path: &Path) -> Result<bool> {
    let saved = match std::fs::read(rollback_path(path)) {
        Ok(saved) => saved,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    let Some((header, tail)) = saved.split_first_chunk::<8>() else {
        return Ok(false);
    };
    let dir_start = u64::from_le_bytes(*header);

    let mut archive = OpenOptions::new().write(true).open(path)?;
    archive.set_len(dir_start)?;
    archive.seek(SeekFrom::Start(dir_start))?;
    archive.write_all(tail)?;
    archive.sync_all()?;

    tracing::warn!(
        path = %path.display(),
        committed_size = dir_start + tail.len() as u64,
        "Rolled archive back to its last closed state"
    );
    Ok(true)
}

struct CountingWriter<'a, W: Write> {
    inner: &'a mut W,
    bytes: u64,
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
