//! Startup checks for the edge daemon
//!
//! Verifies that ffmpeg is present and recent enough before anything
//! tries to spawn it, so a misconfigured device fails at boot with a
//! clear message instead of on the first trigger.

use std::process::Command;

use thiserror::Error;

use crate::ffmpeg::FFMPEG_BIN;

/// Oldest ffmpeg major version with the segment/hls muxer behavior the
/// pipeline relies on.
pub const MIN_FFMPEG_MAJOR: u32 = 4;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg version requirement not met: {0}")]
    FfmpegVersion(String),
}

/// Parse ffmpeg's banner and extract the major version number.
///
/// Handles the formats ffmpeg builds actually print:
/// - Release: "ffmpeg version 6.1.1 ..."
/// - Git builds: "ffmpeg version n6.1-23-gabcdef ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .trim()
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');

    let major_str = version_str.split(|c| c == '.' || c == '-').next()?;

    major_str.parse().ok()
}

/// Check that ffmpeg runs and meets the version floor.
///
/// # Returns
///
/// The detected major version on success.
pub fn check_ffmpeg_available() -> Result<u32, StartupError> {
    let output = Command::new(FFMPEG_BIN)
        .arg("-version")
        .output()
        .map_err(|e| {
            StartupError::FfmpegUnavailable(format!(
                "failed to run {FFMPEG_BIN} -version; is ffmpeg installed and in PATH? Error: {e}"
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::FfmpegUnavailable(format!(
            "{FFMPEG_BIN} -version exited with {:?}",
            output.status.code()
        )));
    }

    let version_output = String::from_utf8_lossy(&output.stdout);
    let major = parse_ffmpeg_version(&version_output).ok_or_else(|| {
        StartupError::FfmpegVersion(format!(
            "could not parse ffmpeg version from: {}",
            version_output.lines().next().unwrap_or("(empty)")
        ))
    })?;

    if major < MIN_FFMPEG_MAJOR {
        return Err(StartupError::FfmpegVersion(format!(
            "ffmpeg {MIN_FFMPEG_MAJOR}.x or newer required, got {major}"
        )));
    }

    Ok(major)
}

/// Run all startup checks in order.
pub fn run_startup_checks() -> Result<(), StartupError> {
    let major = check_ffmpeg_available()?;
    tracing::info!(major, "ffmpeg available");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// For any release-style banner, the parser extracts the major
        /// version.
        #[test]
        fn prop_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let banner = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&banner), Some(major));
        }

        /// For any git-build banner with an `n` prefix, the parser
        /// extracts the major version.
        #[test]
        fn prop_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let banner = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&banner), Some(major));
        }

        /// Multi-line output parses the same as the first line alone.
        #[test]
        fn prop_version_parsing_multiline(
            major in 1u32..20,
            minor in 0u32..10,
        ) {
            let banner = format!(
                "ffmpeg version {}.{} Copyright (c) 2000-2024\nbuilt with gcc 12.2.0\nconfiguration: --enable-gpl",
                major, minor
            );
            prop_assert_eq!(parse_ffmpeg_version(&banner), Some(major));
        }
    }

    #[test]
    fn test_parse_version_standard() {
        let output = "ffmpeg version 6.1.1 Copyright (c) 2000-2024";
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_version_n_prefixed() {
        let output = "ffmpeg version n4.4.2-0ubuntu0.22.04.1 Copyright (c) 2000-2021";
        assert_eq!(parse_ffmpeg_version(output), Some(4));
    }

    #[test]
    fn test_parse_version_multiline() {
        let output = "ffmpeg version n6.0-5-g1234567 Copyright (c) 2000-2023\nbuilt with gcc 12.2.0\nconfiguration: --enable-gpl";
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_version_invalid() {
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version(""), None);
    }
}
