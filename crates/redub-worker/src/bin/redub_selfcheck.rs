use std::path::Path;

use redub_media::download::installer::ensure_aria2;
use redub_media::{check_ffmpeg, check_ffprobe};
use redub_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "redub-selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );
    ensure_dir(&config.work_dir).await?;
    ensure_dir(&config.output_dir).await?;
    ensure_dir(&config.inbox_dir).await?;

    check_ffmpeg().map_err(|e| anyhow::anyhow!("ffmpeg not available: {}", e))?;
    check_ffprobe().map_err(|e| anyhow::anyhow!("ffprobe not available: {}", e))?;

    let settings = config.downloader.to_settings();
    match &settings.aria2_binary {
        Some(path) => println!("redub-selfcheck: aria2c pinned at {}", path.display()),
        None => {
            let client = reqwest::Client::new();
            match ensure_aria2(&client, &settings).await {
                Ok(path) => println!("redub-selfcheck: aria2c at {}", path.display()),
                Err(e) => println!("redub-selfcheck: aria2c unavailable ({}), HTTP fallback only", e),
            }
        }
    }

    if config.tts.api_key.is_none() {
        return Err(anyhow::anyhow!("missing required env var SARVAM_API_KEY"));
    }

    println!("redub-selfcheck: ok");
    Ok(())
}

async fn ensure_dir(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path).await?;
    Ok(())
}
