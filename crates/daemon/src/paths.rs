//! Filesystem layout under the daemon's data directory

use std::io;
use std::path::{Path, PathBuf};

/// Well-known locations derived from a single data directory.
///
/// Layout:
/// - `buffer/` rolling transport stream segments (lookback window)
/// - `live/` HLS playlist and segments for live viewing
/// - `events/` extracted clips and thumbnails awaiting upload
/// - `queue.json` durable upload task log
#[derive(Debug, Clone)]
pub struct StoragePaths {
    data_dir: PathBuf,
}

impl StoragePaths {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn buffer_dir(&self) -> PathBuf {
        self.data_dir.join("buffer")
    }

    pub fn live_dir(&self) -> PathBuf {
        self.data_dir.join("live")
    }

    pub fn events_dir(&self) -> PathBuf {
        self.data_dir.join("events")
    }

    pub fn live_playlist(&self) -> PathBuf {
        self.live_dir().join("stream.m3u8")
    }

    pub fn queue_file(&self) -> PathBuf {
        self.data_dir.join("queue.json")
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_directories(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.buffer_dir())?;
        std::fs::create_dir_all(self.live_dir())?;
        std::fs::create_dir_all(self.events_dir())?;
        Ok(())
    }
}

/// Remove every regular file directly inside `dir`, returning the count.
///
/// A missing directory is treated as already clean. Subdirectories are
/// left alone; the pipeline only ever writes flat directories.
pub fn clear_directory(dir: &Path) -> io::Result<usize> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                // Another task deleted it first; that is the goal anyway.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
    }
    Ok(removed)
}
