//! Stream-copy merge of batch artifacts (Phase C).

use std::path::{Path, PathBuf};

use tracing::info;

use redub_models::CancelToken;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::fs_utils::remove_if_exists;

/// Concat demuxer manifest for `artifacts`, in order.
pub fn concat_manifest(artifacts: &[PathBuf]) -> String {
    artifacts
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Concatenate `artifacts` into `output` without re-encoding.
///
/// The manifest and every artifact are deleted afterwards, whatever the
/// outcome.
pub async fn merge_artifacts(
    artifacts: &[PathBuf],
    output: &Path,
    manifest_path: &Path,
    cancel: &CancelToken,
) -> MediaResult<()> {
    let result = run_merge(artifacts, output, manifest_path, cancel).await;

    remove_if_exists(manifest_path).await;
    for artifact in artifacts {
        remove_if_exists(artifact).await;
    }
    if result.is_err() {
        remove_if_exists(output).await;
    }

    result
}

async fn run_merge(
    artifacts: &[PathBuf],
    output: &Path,
    manifest_path: &Path,
    cancel: &CancelToken,
) -> MediaResult<()> {
    if artifacts.is_empty() {
        return Err(MediaError::NothingRendered);
    }

    // The demuxer resolves relative entries against the manifest, so use absolute paths.
    let mut absolute = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        absolute.push(tokio::fs::canonicalize(artifact).await?);
    }
    tokio::fs::write(manifest_path, concat_manifest(&absolute)).await?;

    let cmd = FfmpegCommand::new(manifest_path, output)
        .input_args(["-f", "concat", "-safe", "0"])
        .stream_copy()
        .output_args(["-movflags", "+faststart"]);

    FfmpegRunner::new()
        .with_cancel(cancel.clone())
        .run(&cmd)
        .await?;

    info!(parts = artifacts.len(), output = %output.display(), "Merged batches");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_order_and_escaping() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/job/batch_000.mp4"),
            PathBuf::from("/tmp/job/batch_001.mp4"),
            PathBuf::from("/tmp/it's/batch_002.mp4"),
        ]);
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines[0], "file '/tmp/job/batch_000.mp4'");
        assert_eq!(lines[1], "file '/tmp/job/batch_001.mp4'");
        assert_eq!(lines[2], r"file '/tmp/it'\''s/batch_002.mp4'");
    }

    #[tokio::test]
    async fn test_empty_merge_fails_and_cleans_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("concat.txt");
        tokio::fs::write(&manifest, b"stale").await.unwrap();

        let result = merge_artifacts(
            &[],
            &dir.path().join("out.mp4"),
            &manifest,
            &CancelToken::new(),
        )
        .await;

        assert!(matches!(result, Err(MediaError::NothingRendered)));
        assert!(!manifest.exists());
    }

    #[tokio::test]
    async fn test_artifacts_removed_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let batch = dir.path().join("batch_000.mp4");
        tokio::fs::write(&batch, b"not really video").await.unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = merge_artifacts(
            &[batch.clone()],
            &dir.path().join("out.mp4"),
            &dir.path().join("concat.txt"),
            &cancel,
        )
        .await;

        assert!(result.is_err());
        assert!(!batch.exists());
        assert!(!dir.path().join("concat.txt").exists());
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg"]
    async fn test_merge_real_clips() {
        let dir = tempfile::tempdir().unwrap();
        let mut parts = Vec::new();
        for i in 0..2 {
            let path = dir.path().join(format!("batch_{i:03}.mp4"));
            let status = tokio::process::Command::new("ffmpeg")
                .args(["-y", "-v", "error", "-f", "lavfi", "-i", "testsrc=d=1:s=160x120:r=24"])
                .args(["-f", "lavfi", "-i", "sine=d=1", "-shortest"])
                .arg(&path)
                .status()
                .await
                .unwrap();
            assert!(status.success());
            parts.push(path);
        }

        let output = dir.path().join("final.mp4");
        merge_artifacts(&parts, &output, &dir.path().join("concat.txt"), &CancelToken::new())
            .await
            .unwrap();

        let duration = crate::probe::probe_duration(&output).await.unwrap();
        assert!((duration - 2.0).abs() < 0.2);
        assert!(parts.iter().all(|p| !p.exists()));
    }
}
