//! Event clip extraction from the rolling segment buffer
//!
//! A trigger freezes a window of buffered segments, concatenates them
//! into a single clip without re-encoding, grabs a thumbnail, and hands
//! the result to the upload queue.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

use crate::clock;
use crate::ffmpeg::{self, clip};
use crate::queue::UploadQueue;
use crate::segments::SegmentStore;

/// Error type for clip extraction
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to stage clip: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcoder exited with {status:?}: {stderr}")]
    CommandFailed {
        status: Option<i32>,
        stderr: String,
    },
    #[error("clip came out empty: {}", .0.display())]
    EmptyOutput(PathBuf),
}

/// A finished clip, already registered with the upload queue.
#[derive(Debug, Clone)]
pub struct ExtractedClip {
    pub id: String,
    pub video_path: PathBuf,
    pub thumbnail_path: Option<PathBuf>,
    pub segment_count: usize,
    pub created_at_unix_ms: u64,
}

/// Pick the segment window for a clip.
///
/// The newest segment is excluded because the muxer may still be
/// writing it; the window ends at the segment before it. It covers the
/// requested seconds before and after the trigger, counted in whole
/// segments, clamped to what the buffer holds.
///
/// # Returns
///
/// Inclusive `(start, end)` indices into the ordered segment listing,
/// or `None` when the buffer is too shallow (fewer than three
/// segments) or the requested window is zero.
pub fn select_window(
    count: usize,
    before_seconds: u64,
    after_seconds: u64,
    segment_seconds: u64,
) -> Option<(usize, usize)> {
    if count < 3 {
        return None;
    }
    let end = count - 2;

    let seg = segment_seconds.max(1);
    let before_segs = before_seconds.div_ceil(seg) as usize;
    let after_segs = after_seconds.div_ceil(seg) as usize;
    let span = before_segs + after_segs;
    if span == 0 {
        return None;
    }

    let start = (end + 1).saturating_sub(span);
    Some((start, end))
}

/// Extracts event clips. One extraction runs at a time; overlapping
/// triggers are dropped, not queued.
pub struct ClipExtractor {
    store: SegmentStore,
    events_dir: PathBuf,
    segment_seconds: u64,
    thumbnail_offset_seconds: u64,
    queue: UploadQueue,
    program: String,
    busy: AtomicBool,
}

impl ClipExtractor {
    pub fn new(
        store: SegmentStore,
        events_dir: PathBuf,
        segment_seconds: u64,
        thumbnail_offset_seconds: u64,
        queue: UploadQueue,
    ) -> Self {
        Self {
            store,
            events_dir,
            segment_seconds,
            thumbnail_offset_seconds,
            queue,
            program: ffmpeg::FFMPEG_BIN.to_string(),
            busy: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    /// Extract a clip covering the trigger moment.
    ///
    /// Returns `None` when nothing was produced: an extraction already
    /// in flight, a too-shallow buffer, or a failed concat. Failures
    /// are logged here so every caller gets the same treatment.
    pub async fn extract(&self, before_seconds: u64, after_seconds: u64) -> Option<ExtractedClip> {
        if self.busy.swap(true, Ordering::SeqCst) {
            info!("clip extraction already in flight, trigger dropped");
            return None;
        }
        let result = self.extract_inner(before_seconds, after_seconds).await;
        self.busy.store(false, Ordering::SeqCst);

        match result {
            Ok(clip) => clip,
            Err(e) => {
                warn!(error = %e, "clip extraction failed");
                None
            }
        }
    }

    async fn extract_inner(
        &self,
        before_seconds: u64,
        after_seconds: u64,
    ) -> Result<Option<ExtractedClip>, ExtractError> {
        let segments = self.store.list();
        let Some((start, end)) = select_window(
            segments.len(),
            before_seconds,
            after_seconds,
            self.segment_seconds,
        ) else {
            info!(
                buffered = segments.len(),
                "not enough segments for a clip, trigger dropped"
            );
            return Ok(None);
        };
        let window: Vec<PathBuf> = segments[start..=end]
            .iter()
            .map(|s| s.path.clone())
            .collect();

        std::fs::create_dir_all(&self.events_dir)?;
        let created_at = clock::unix_millis();
        let id = format!("event_{created_at}");
        let video_path = self.events_dir.join(format!("{id}.mp4"));
        let list_path = self.events_dir.join(format!("{id}.txt"));

        clip::write_concat_list(&list_path, &window)?;
        let concat = self
            .run_transcoder(&clip::build_concat_args(&list_path, &video_path))
            .await;
        let _ = std::fs::remove_file(&list_path);

        if let Err(e) = concat {
            // No partial clips on disk.
            let _ = std::fs::remove_file(&video_path);
            return Err(e);
        }

        let size = std::fs::metadata(&video_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            let _ = std::fs::remove_file(&video_path);
            return Err(ExtractError::EmptyOutput(video_path));
        }

        // Thumbnail trouble never loses the clip.
        let thumbnail_path = self.events_dir.join(format!("{id}.jpg"));
        let thumbnail_args =
            clip::build_thumbnail_args(&video_path, self.thumbnail_offset_seconds, &thumbnail_path);
        let thumbnail = match self.run_transcoder(&thumbnail_args).await {
            Ok(()) if thumbnail_path.is_file() => Some(thumbnail_path),
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "thumbnail extraction failed");
                let _ = std::fs::remove_file(&thumbnail_path);
                None
            }
        };

        info!(
            clip = %video_path.display(),
            segments = window.len(),
            "event clip saved"
        );

        if let Err(e) = self
            .queue
            .enqueue(video_path.clone(), thumbnail.clone(), created_at)
            .await
        {
            // The clip exists on disk either way; losing the queue entry
            // is the lesser failure and it is visible in the log.
            warn!(error = %e, "clip saved but not queued for upload");
        }

        Ok(Some(ExtractedClip {
            id,
            video_path,
            thumbnail_path: thumbnail,
            segment_count: window.len(),
            created_at_unix_ms: created_at,
        }))
    }

    async fn run_transcoder(&self, args: &[String]) -> Result<(), ExtractError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr
                .lines()
                .filter(|l| !l.trim().is_empty())
                .last()
                .unwrap_or("")
                .to_string();
            return Err(ExtractError::CommandFailed {
                status: output.status.code(),
                stderr: last_line,
            });
        }
        Ok(())
    }
}
