//! Thumbnail extraction for deliveries.

use std::path::Path;

use redub_models::encoding::{THUMBNAIL_SCALE_WIDTH, THUMBNAIL_TIMESTAMP};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;

fn thumbnail_command(video_path: &Path, output_path: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .input_arg("-ss")
        .input_arg(THUMBNAIL_TIMESTAMP)
        .single_frame()
        .video_filter(format!("scale={}:-2", THUMBNAIL_SCALE_WIDTH))
}

/// Grab one frame one second in.
pub async fn generate_thumbnail(
    video_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
) -> MediaResult<()> {
    let cmd = thumbnail_command(video_path.as_ref(), output_path.as_ref());
    FfmpegRunner::new().with_timeout(60).run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_command() {
        let args = thumbnail_command(Path::new("final.mp4"), Path::new("thumb.jpg")).build_args();
        let joined = args.join(" ");
        assert!(joined.contains("-ss 00:00:01 -i final.mp4"));
        assert!(joined.contains("-vframes 1"));
        assert!(joined.contains("scale=320:-2"));
    }
}
