//! Capture source descriptors and their ffmpeg input arguments

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Error type for capture source validation
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid input type: {0}")]
    UnknownType(String),
    #[error("missing rtsp url")]
    MissingRtspUrl,
    #[error("missing file path")]
    MissingFilePath,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("webcam capture is not supported on this platform")]
    UnsupportedPlatform,
}

/// Where the transcoder reads video from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    /// Local camera device; `/dev/video0` when no device is given.
    Webcam(Option<String>),
    /// Network camera reached over RTSP, forced onto TCP transport.
    Rtsp(String),
    /// Pre-recorded file played back at its native rate.
    File(String),
}

impl CaptureSource {
    /// Builds a validated source from the control surface's
    /// `{type, value}` descriptor.
    pub fn parse(kind: &str, value: Option<&str>) -> Result<Self, SourceError> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match kind {
            "webcam" => Ok(CaptureSource::Webcam(value.map(String::from))),
            "rtsp" => match value {
                Some(url) => Ok(CaptureSource::Rtsp(url.to_string())),
                None => Err(SourceError::MissingRtspUrl),
            },
            "file" => match value {
                Some(path) => {
                    if !Path::new(path).is_file() {
                        return Err(SourceError::FileNotFound(path.to_string()));
                    }
                    Ok(CaptureSource::File(path.to_string()))
                }
                None => Err(SourceError::MissingFilePath),
            },
            other => Err(SourceError::UnknownType(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CaptureSource::Webcam(_) => "webcam",
            CaptureSource::Rtsp(_) => "rtsp",
            CaptureSource::File(_) => "file",
        }
    }

    /// ffmpeg input arguments for this source.
    ///
    /// Webcam capture depends on the platform device framework, so this
    /// can still fail after `parse` succeeded.
    pub fn input_args(&self, framerate: u32) -> Result<Vec<String>, SourceError> {
        match self {
            CaptureSource::Webcam(device) => {
                if cfg!(target_os = "linux") {
                    let device = device.clone().unwrap_or_else(|| "/dev/video0".to_string());
                    Ok(vec![
                        "-f".to_string(),
                        "v4l2".to_string(),
                        "-framerate".to_string(),
                        framerate.to_string(),
                        "-i".to_string(),
                        device,
                    ])
                } else if cfg!(target_os = "macos") {
                    let device = device.clone().unwrap_or_else(|| "0".to_string());
                    Ok(vec![
                        "-f".to_string(),
                        "avfoundation".to_string(),
                        "-framerate".to_string(),
                        framerate.to_string(),
                        "-i".to_string(),
                        device,
                    ])
                } else {
                    Err(SourceError::UnsupportedPlatform)
                }
            }
            CaptureSource::Rtsp(url) => Ok(vec![
                "-rtsp_transport".to_string(),
                "tcp".to_string(),
                "-i".to_string(),
                url.clone(),
            ]),
            CaptureSource::File(path) => Ok(vec![
                "-re".to_string(),
                "-i".to_string(),
                path.clone(),
            ]),
        }
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Webcam(Some(device)) => write!(f, "webcam ({})", device),
            CaptureSource::Webcam(None) => write!(f, "webcam (default)"),
            CaptureSource::Rtsp(url) => write!(f, "rtsp {}", url),
            CaptureSource::File(path) => write!(f, "file {}", path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unknown_type_rejected() {
        let result = CaptureSource::parse("screencast", None);
        assert!(matches!(result, Err(SourceError::UnknownType(_))));
    }

    #[test]
    fn test_parse_rtsp_requires_url() {
        assert!(matches!(
            CaptureSource::parse("rtsp", None),
            Err(SourceError::MissingRtspUrl)
        ));
        assert!(matches!(
            CaptureSource::parse("rtsp", Some("   ")),
            Err(SourceError::MissingRtspUrl)
        ));

        let source = CaptureSource::parse("rtsp", Some("rtsp://cam.local/stream")).unwrap();
        assert_eq!(source, CaptureSource::Rtsp("rtsp://cam.local/stream".into()));
    }

    #[test]
    fn test_parse_file_requires_existing_path() {
        assert!(matches!(
            CaptureSource::parse("file", None),
            Err(SourceError::MissingFilePath)
        ));
        assert!(matches!(
            CaptureSource::parse("file", Some("/no/such/clip.mp4")),
            Err(SourceError::FileNotFound(_))
        ));

        let file = tempfile::NamedTempFile::new().expect("temp file");
        let path = file.path().to_string_lossy().to_string();
        let source = CaptureSource::parse("file", Some(&path)).unwrap();
        assert_eq!(source.kind(), "file");
    }

    #[test]
    fn test_parse_webcam_accepts_optional_device() {
        let source = CaptureSource::parse("webcam", None).unwrap();
        assert_eq!(source, CaptureSource::Webcam(None));

        let source = CaptureSource::parse("webcam", Some("/dev/video2")).unwrap();
        assert_eq!(source, CaptureSource::Webcam(Some("/dev/video2".into())));
    }

    #[test]
    fn test_rtsp_input_args_force_tcp() {
        let source = CaptureSource::Rtsp("rtsp://cam.local/stream".into());
        let args = source.input_args(30).unwrap();
        assert_eq!(
            args,
            vec!["-rtsp_transport", "tcp", "-i", "rtsp://cam.local/stream"]
        );
    }

    #[test]
    fn test_file_input_args_use_native_rate() {
        let source = CaptureSource::File("/tmp/sample.mp4".into());
        let args = source.input_args(30).unwrap();
        assert_eq!(args, vec!["-re", "-i", "/tmp/sample.mp4"]);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_webcam_input_args_default_device() {
        let source = CaptureSource::Webcam(None);
        let args = source.input_args(25).unwrap();
        assert_eq!(
            args,
            vec!["-f", "v4l2", "-framerate", "25", "-i", "/dev/video0"]
        );
    }
}
