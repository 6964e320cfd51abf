//! FFmpeg progress parsing and progress text rendering.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Width of the text progress bar, in cells.
pub const BAR_WIDTH: usize = 10;

const FILLED: char = '■';
const EMPTY: char = '□';

/// Progress information from FFmpeg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Current FPS
    pub fps: f64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Output time as string (HH:MM:SS.microseconds)
    pub out_time: String,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

impl FfmpegProgress {
    /// Calculate progress percentage given total duration in milliseconds.
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).clamp(0.0, 100.0)
    }

    /// Encoded output so far, in seconds.
    pub fn out_time_secs(&self) -> f64 {
        self.out_time_ms.max(0) as f64 / 1000.0
    }
}

/// Fixed-width bar: `[■■■■□□□□□□] 42.0%`.
pub fn render_bar(percent: f64) -> String {
    let percent = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    let filled = ((percent / 100.0) * BAR_WIDTH as f64).floor() as usize;
    let bar: String = std::iter::repeat(FILLED)
        .take(filled)
        .chain(std::iter::repeat(EMPTY).take(BAR_WIDTH - filled))
        .collect();
    format!("[{}] {:.1}%", bar, percent)
}

/// Compact elapsed time: `45s`, `3m 07s`, `1h 02m 09s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Human byte count with binary units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for candidate in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = candidate;
    }
    format!("{:.1} {}", value, unit)
}

/// Status block shown while a transfer runs.
pub fn transfer_status(
    title: &str,
    percent: f64,
    elapsed: Duration,
    transferred: Option<(u64, Option<u64>)>,
) -> String {
    let mut text = format!("{}\n{}", title, render_bar(percent));
    if let Some((done, total)) = transferred {
        match total {
            Some(total) => text.push_str(&format!("\n{} / {}", format_bytes(done), format_bytes(total))),
            None => text.push_str(&format!("\n{}", format_bytes(done))),
        }
    }
    text.push_str(&format!("\nElapsed: {}", format_elapsed(elapsed)));
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let progress = FfmpegProgress {
            out_time_ms: 5000,
            ..Default::default()
        };

        assert!((progress.percentage(10000) - 50.0).abs() < 0.01);
        assert!((progress.percentage(5000) - 100.0).abs() < 0.01);
        assert_eq!(progress.percentage(0), 0.0);
        assert!((progress.out_time_secs() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_render_bar() {
        assert_eq!(render_bar(0.0), "[□□□□□□□□□□] 0.0%");
        assert_eq!(render_bar(42.0), "[■■■■□□□□□□] 42.0%");
        assert_eq!(render_bar(100.0), "[■■■■■■■■■■] 100.0%");
        assert_eq!(render_bar(250.0), render_bar(100.0));
        assert_eq!(render_bar(f64::NAN), render_bar(0.0));
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_secs(45)), "45s");
        assert_eq!(format_elapsed(Duration::from_secs(187)), "3m 07s");
        assert_eq!(format_elapsed(Duration::from_secs(3729)), "1h 02m 09s");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_transfer_status() {
        let text = transfer_status(
            "Downloading",
            50.0,
            Duration::from_secs(3),
            Some((1024 * 1024, Some(2 * 1024 * 1024))),
        );
        assert!(text.starts_with("Downloading\n[■■■■■□□□□□] 50.0%"));
        assert!(text.contains("1.0 MiB / 2.0 MiB"));
        assert!(text.ends_with("Elapsed: 3s"));
    }
}
