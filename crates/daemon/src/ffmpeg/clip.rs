//! Builds the clip concatenation and thumbnail commands

use std::io;
use std::path::{Path, PathBuf};

/// Write the concat demuxer list naming each segment in window order.
///
/// Segment names are daemon-generated, so single quotes inside paths are
/// not escaped here.
pub fn write_concat_list(list_path: &Path, segments: &[PathBuf]) -> io::Result<()> {
    let mut content = String::new();
    for path in segments {
        content.push_str(&format!("file '{}'\n", path.display()));
    }
    std::fs::write(list_path, content)
}

/// Lossless concatenation of uniform transport stream chunks into one
/// clip via stream copy; no re-encode happens on this path.
pub fn build_concat_args(list_path: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_path.display().to_string(),
        "-c".to_string(),
        "copy".to_string(),
        output.display().to_string(),
    ]
}

/// Single still frame taken `offset_seconds` into the clip.
pub fn build_thumbnail_args(video: &Path, offset_seconds: u64, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-ss".to_string(),
        offset_seconds.to_string(),
        "-i".to_string(),
        video.display().to_string(),
        "-frames:v".to_string(),
        "1".to_string(),
        output.display().to_string(),
    ]
}
