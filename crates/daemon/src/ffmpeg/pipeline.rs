//! Builds the live transcode command feeding the ring buffer and live playlist

use crate::source::{CaptureSource, SourceError};
use lookout_config::CaptureConfig;
use std::path::Path;

/// Buffered segment name pattern; zero padding keeps lexicographic order
/// equal to capture order.
pub const BUFFER_SEGMENT_PATTERN: &str = "chunk_%05d.ts";

/// Live playlist segment name pattern.
pub const LIVE_SEGMENT_PATTERN: &str = "seg_%05d.ts";

/// Live playlist manifest name.
pub const LIVE_PLAYLIST_NAME: &str = "stream.m3u8";

/// Build the tee muxer output specification.
///
/// One branch writes fixed-duration transport stream chunks into the
/// rolling buffer; the other maintains a bounded HLS playlist for live
/// viewing, deleting segments that fall out of the window.
pub fn tee_output_spec(capture: &CaptureConfig, buffer_dir: &Path, live_dir: &Path) -> String {
    format!(
        "[f=segment:segment_time={}:reset_timestamps=1:segment_format=mpegts]{}|\
         [f=hls:hls_time={}:hls_list_size={}:hls_flags=delete_segments+append_list:hls_segment_filename={}]{}",
        capture.segment_seconds,
        buffer_dir.join(BUFFER_SEGMENT_PATTERN).display(),
        capture.segment_seconds,
        capture.live_window,
        live_dir.join(LIVE_SEGMENT_PATTERN).display(),
        live_dir.join(LIVE_PLAYLIST_NAME).display(),
    )
}

/// Build the full ffmpeg argument list for one stream session.
///
/// Every source is re-encoded to one uniform H.264 profile so that
/// buffered chunks can later be concatenated by stream copy regardless
/// of what the camera delivered.
///
/// # Arguments
/// * `source` - validated capture source
/// * `capture` - segment duration, frame rate, and live window settings
/// * `buffer_dir` - rolling buffer directory
/// * `live_dir` - live playlist directory
///
/// # Returns
/// The argument vector for `ffmpeg`, or a `SourceError` when the source
/// cannot be expressed on this platform.
pub fn build_transcode_args(
    source: &CaptureSource,
    capture: &CaptureConfig,
    buffer_dir: &Path,
    live_dir: &Path,
) -> Result<Vec<String>, SourceError> {
    let mut args = vec!["-y".to_string()];
    args.extend(source.input_args(capture.framerate)?);

    args.extend(
        ["-c:v", "libx264", "-preset", "ultrafast", "-pix_fmt", "yuv420p"]
            .iter()
            .map(|s| s.to_string()),
    );
    args.push("-r".to_string());
    args.push(capture.framerate.to_string());

    args.extend(["-map", "0:v", "-f", "tee"].iter().map(|s| s.to_string()));
    args.push(tee_output_spec(capture, buffer_dir, live_dir));

    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    /// Helper to check if args contain a flag with a specific value
    fn has_flag_with_value(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2)
            .any(|pair| pair[0] == flag && pair[1] == value)
    }

    fn capture(segment_seconds: u64, framerate: u32, live_window: u32) -> CaptureConfig {
        CaptureConfig {
            segment_seconds,
            framerate,
            live_window,
        }
    }

    #[test]
    fn test_transcode_args_for_file_source() {
        let source = CaptureSource::File("/tmp/sample.mp4".into());
        let args = build_transcode_args(
            &source,
            &capture(2, 30, 6),
            Path::new("data/buffer"),
            Path::new("data/live"),
        )
        .expect("file source always builds");

        assert_eq!(
            args,
            vec![
                "-y",
                "-re",
                "-i",
                "/tmp/sample.mp4",
                "-c:v",
                "libx264",
                "-preset",
                "ultrafast",
                "-pix_fmt",
                "yuv420p",
                "-r",
                "30",
                "-map",
                "0:v",
                "-f",
                "tee",
                "[f=segment:segment_time=2:reset_timestamps=1:segment_format=mpegts]data/buffer/chunk_%05d.ts|\
                 [f=hls:hls_time=2:hls_list_size=6:hls_flags=delete_segments+append_list:hls_segment_filename=data/live/seg_%05d.ts]data/live/stream.m3u8",
            ]
        );
    }

    // For any capture settings and source path, the built command SHALL
    // force the uniform encode profile, the configured frame rate, and a
    // tee spec naming both output directories.
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_transcode_command_completeness(
            segment_seconds in 1u64..30,
            framerate in 1u32..120,
            live_window in 1u32..32,
            file_name in "[a-zA-Z0-9_]{1,20}",
        ) {
            let path = format!("/videos/{}.mp4", file_name);
            let source = CaptureSource::File(path.clone());
            let cfg = capture(segment_seconds, framerate, live_window);
            let buffer_dir = PathBuf::from("d/buffer");
            let live_dir = PathBuf::from("d/live");

            let args = build_transcode_args(&source, &cfg, &buffer_dir, &live_dir)
                .expect("file source always builds");

            prop_assert_eq!(&args[0], "-y");
            prop_assert!(has_flag_with_value(&args, "-i", &path));
            prop_assert!(has_flag_with_value(&args, "-c:v", "libx264"));
            prop_assert!(has_flag_with_value(&args, "-preset", "ultrafast"));
            prop_assert!(has_flag_with_value(&args, "-pix_fmt", "yuv420p"));
            prop_assert!(has_flag_with_value(&args, "-r", &framerate.to_string()));
            prop_assert!(has_flag_with_value(&args, "-map", "0:v"));
            prop_assert!(has_flag_with_value(&args, "-f", "tee"));

            let spec = args.last().expect("tee spec is the final argument");
            let segment_time = format!("segment_time={}", segment_seconds);
            let hls_time = format!("hls_time={}", segment_seconds);
            let hls_list_size = format!("hls_list_size={}", live_window);
            prop_assert!(spec.contains(&segment_time));
            prop_assert!(spec.contains(&hls_time));
            prop_assert!(spec.contains(&hls_list_size));
            prop_assert!(spec.contains("reset_timestamps=1"));
            prop_assert!(spec.contains("delete_segments+append_list"));
            prop_assert!(spec.contains("d/buffer"));
            prop_assert!(spec.contains("d/live"));
        }
    }
}
