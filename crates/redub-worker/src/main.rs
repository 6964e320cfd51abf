//! Re-dubbing worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use redub_media::{check_ffmpeg, check_ffprobe};
use redub_models::CancelToken;
use redub_queue::PipelineScheduler;
use redub_worker::metrics::install_exporter;
use redub_worker::{
    ConsoleSession, ConsoleTransport, HttpSynthesizer, RedubPipeline, SessionCollector,
    Transport, WorkerConfig,
};

const CONSOLE_SUBMITTER: &str = "console";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,redub=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting redub-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    if let Some(port) = std::env::var("METRICS_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        install_exporter(port).context("failed to start metrics exporter")?;
        info!(port, "Metrics exporter listening");
    }

    if let Err(e) = check_ffmpeg() {
        warn!("FFmpeg check failed, renders will fail: {}", e);
    }
    if let Err(e) = check_ffprobe() {
        warn!("FFprobe check failed, renders will fail: {}", e);
    }
    if config.tts.api_key.is_none() {
        warn!("SARVAM_API_KEY is not set, synthesis requests will be unauthenticated");
    }

    for dir in [&config.work_dir, &config.output_dir, &config.inbox_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("cannot create {}", dir.display()))?;
    }

    let transport: Arc<dyn Transport> = Arc::new(ConsoleTransport::new(&config.output_dir));
    let tts = Arc::new(HttpSynthesizer::new(config.tts.clone()).context("failed to build TTS client")?);
    let pipeline = Arc::new(
        RedubPipeline::new(config.clone(), transport.clone(), tts)
            .context("failed to build job pipeline")?,
    );

    let scheduler = PipelineScheduler::new();
    let shutdown = CancelToken::new();
    let worker = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run_until(pipeline, shutdown).await })
    };

    let mut session = ConsoleSession::new(
        CONSOLE_SUBMITTER,
        SessionCollector::new(&config.inbox_dir),
        scheduler.clone(),
        transport.clone(),
    );
    transport
        .notify(CONSOLE_SUBMITTER, "Send /start to begin a new request.")
        .await
        .ok();

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = session.run(stdin) => {
            if let Err(e) = result {
                error!("Console loop failed: {}", e);
            }
            info!("Input closed, finishing queued jobs");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            let discarded = scheduler.cancel_all();
            info!(discarded, "Cancelled pending work");
        }
    }

    // Let the queue drain (or the cancelled job unwind), then stop the loop.
    while scheduler.is_processing() || scheduler.queue_len() > 0 {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(250)) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Second interrupt, stopping now");
                scheduler.cancel_all();
                break;
            }
        }
    }
    shutdown.cancel();
    worker.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
