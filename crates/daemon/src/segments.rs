//! Ordered access to the transport stream ring buffer

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::paths;

/// Extension written by the segment and HLS muxers.
pub const SEGMENT_EXTENSION: &str = "ts";

/// One buffered transport stream chunk.
#[derive(Debug, Clone)]
pub struct Segment {
    pub path: PathBuf,
    pub file_name: String,
    pub modified: SystemTime,
}

impl Segment {
    /// Sequence index parsed from names like `chunk_00042.ts`.
    pub fn sequence(&self) -> Option<u64> {
        let stem = self.file_name.strip_suffix(".ts")?;
        let digits = stem.rsplit('_').next()?;
        digits.parse().ok()
    }
}

/// Read/delete view over one segment directory.
///
/// The write path is exclusively the transcoder process; this store never
/// creates segments.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    dir: PathBuf,
}

impl SegmentStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current segments sorted by file name.
    ///
    /// Zero-padded sequence numbers make name order equal capture order.
    /// Entries that vanish mid-listing are skipped; a missing directory
    /// yields an empty listing.
    pub fn list(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXTENSION) {
                continue;
            }
            let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
                Some(modified) => modified,
                // Deleted between listing and stat; the sweeper got there first.
                None => continue,
            };
            segments.push(Segment {
                file_name: entry.file_name().to_string_lossy().to_string(),
                path: entry.into_path(),
                modified,
            });
        }
        segments
    }

    pub fn count(&self) -> usize {
        self.list().len()
    }

    /// Delete every file in the directory. Missing directory is fine.
    pub fn clear(&self) -> io::Result<usize> {
        paths::clear_directory(&self.dir)
    }
}
