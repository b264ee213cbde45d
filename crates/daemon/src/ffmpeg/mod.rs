//! ffmpeg command construction for the capture pipeline
//!
//! Argument lists are built as plain vectors so they can be inspected in
//! tests; spawn sites turn them into processes.

pub mod clip;
pub mod pipeline;

/// Binary name resolved through PATH.
pub const FFMPEG_BIN: &str = "ffmpeg";
