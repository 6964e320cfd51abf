//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Media file information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Width in pixels, 0 without video
    pub width: u32,
    /// Height in pixels, 0 without video
    pub height: u32,
    /// Frame rate, 0 without video
    pub fps: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

async fn run_ffprobe(path: &Path) -> MediaResult<FfprobeOutput> {
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed on {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    Ok(serde_json::from_slice(&output.stdout)?)
}

fn parse_info(probe: &FfprobeOutput) -> MediaInfo {
    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Container duration first, then the longest stream.
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref()?.parse::<f64>().ok())
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    let fps = video
        .and_then(|v| v.avg_frame_rate.as_deref().or(v.r_frame_rate.as_deref()))
        .and_then(parse_frame_rate)
        .unwrap_or(0.0);

    MediaInfo {
        duration,
        has_video: video.is_some(),
        has_audio,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        fps,
    }
}

/// Probe any media file.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let probe = run_ffprobe(path.as_ref()).await?;
    Ok(parse_info(&probe))
}

/// Probe a file that must carry a video stream.
pub async fn probe_video(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let info = probe_media(path).await?;
    if !info.has_video {
        return Err(MediaError::InvalidMedia("No video stream found".to_string()));
    }
    Ok(info)
}

/// Duration in seconds; errors when the file has no usable duration.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();
    let info = probe_media(path).await?;
    if info.duration <= 0.0 || !info.duration.is_finite() {
        return Err(MediaError::InvalidMedia(format!(
            "{} has no usable duration",
            path.display()
        )));
    }
    Ok(info.duration)
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_parse_audio_only() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{"format": {"duration": "6.024000"},
                "streams": [{"codec_type": "audio", "duration": "6.024000"}]}"#,
        )
        .unwrap();
        let info = parse_info(&probe);
        assert!(!info.has_video);
        assert!(info.has_audio);
        assert!((info.duration - 6.024).abs() < 1e-6);
    }

    #[test]
    fn test_duration_falls_back_to_streams() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{"format": {},
                "streams": [
                    {"codec_type": "video", "width": 1280, "height": 720,
                     "avg_frame_rate": "24/1", "duration": "10.0"},
                    {"codec_type": "audio", "duration": "10.5"}
                ]}"#,
        )
        .unwrap();
        let info = parse_info(&probe);
        assert!(info.has_video);
        assert_eq!((info.width, info.height), (1280, 720));
        assert!((info.fps - 24.0).abs() < 1e-9);
        assert!((info.duration - 10.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = probe_media("/nonexistent/redub/file.wav").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
