//! Per-job scratch directory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use redub_models::JobId;

/// Scratch space owned by one job, namespaced by its id.
///
/// [`JobWorkspace::cleanup`] removes it; if the job unwinds first, `Drop`
/// removes it synchronously.
#[derive(Debug)]
pub struct JobWorkspace {
    root: PathBuf,
    armed: bool,
}

impl JobWorkspace {
    /// Create `base/<job id>`, clearing leftovers from an earlier run.
    pub async fn create(base: &Path, job_id: &JobId) -> std::io::Result<Self> {
        let root = base.join(job_id.as_str());
        if tokio::fs::try_exists(&root).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&root).await?;
        }
        tokio::fs::create_dir_all(root.join("audio")).await?;
        tokio::fs::create_dir_all(root.join("out")).await?;
        debug!(root = %root.display(), "Created job workspace");
        Ok(Self { root, armed: true })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Synthesized narration cache.
    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    pub fn input_video(&self) -> PathBuf {
        self.root.join("source.mp4")
    }

    /// Final merged file, kept apart from every scratch file name.
    pub fn output_path(&self, output_name: &str) -> PathBuf {
        self.root.join("out").join(output_name)
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.root.join("thumb.jpg")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("concat_list.txt")
    }

    /// Remove everything the job wrote.
    pub async fn cleanup(mut self) {
        self.armed = false;
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => debug!(root = %self.root.display(), "Removed job workspace"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "Failed to remove job workspace"),
        }
    }
}

impl Drop for JobWorkspace {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_cleanup() {
        let base = tempfile::tempdir().unwrap();
        let id = JobId::from_string("alice_1");
        let ws = JobWorkspace::create(base.path(), &id).await.unwrap();

        assert!(ws.audio_dir().is_dir());
        assert!(ws.root().ends_with("alice_1"));
        tokio::fs::write(ws.input_video(), b"x").await.unwrap();

        let root = ws.root().to_path_buf();
        ws.cleanup().await;
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_output_never_aliases_scratch_files() {
        let base = tempfile::tempdir().unwrap();
        let ws = JobWorkspace::create(base.path(), &JobId::from_string("dave_4"))
            .await
            .unwrap();

        assert!(ws.output_path("x.mp4").parent().unwrap().is_dir());
        assert_ne!(ws.output_path("source.mp4"), ws.input_video());
        assert_ne!(ws.output_path("batch_000.mp4"), ws.root().join("batches").join("batch_000.mp4"));
        assert_ne!(ws.output_path("batch_000.mp4"), ws.root().join("batch_000.mp4"));
    }

    #[tokio::test]
    async fn test_stale_directory_is_cleared() {
        let base = tempfile::tempdir().unwrap();
        let id = JobId::from_string("bob_2");
        let stale = base.path().join("bob_2");
        tokio::fs::create_dir_all(&stale).await.unwrap();
        tokio::fs::write(stale.join("batch_000.mp4"), b"old").await.unwrap();

        let ws = JobWorkspace::create(base.path(), &id).await.unwrap();
        assert!(!ws.root().join("batch_000.mp4").exists());
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let root = {
            let ws = JobWorkspace::create(base.path(), &JobId::from_string("carol_3"))
                .await
                .unwrap();
            ws.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
