//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use redub_models::{CancelToken, EncodingConfig};

use crate::error::{MediaError, MediaResult};
use crate::progress::FfmpegProgress;

const STDERR_TAIL_LINES: usize = 20;

/// One `-i` input with its own leading options.
#[derive(Debug, Clone)]
struct Input {
    args: Vec<String>,
    path: PathBuf,
}

/// An FFmpeg invocation: ordered inputs, output options, one output file.
///
/// Options set through [`input_arg`](Self::input_arg), [`seek`](Self::seek)
/// and [`duration`](Self::duration) bind to the input added last.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<Input>,
    output: PathBuf,
    output_opts: Vec<String>,
    log_level: String,
}

impl FfmpegCommand {
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            inputs: vec![Input {
                args: Vec::new(),
                path: input.as_ref().into(),
            }],
            output: output.as_ref().into(),
            output_opts: Vec::new(),
            log_level: "error".into(),
        }
    }

    fn last_input(&mut self) -> &mut Vec<String> {
        // `new` always creates one input and nothing removes inputs.
        let index = self.inputs.len() - 1;
        &mut self.inputs[index].args
    }

    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.last_input().push(arg.into());
        self
    }

    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.last_input().extend(args.into_iter().map(Into::into));
        self
    }

    /// Append another input. Its index in filter graphs is its position.
    pub fn add_input(mut self, path: impl AsRef<Path>) -> Self {
        self.inputs.push(Input {
            args: Vec::new(),
            path: path.as_ref().into(),
        });
        self
    }

    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_opts.push(arg.into());
        self
    }

    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_opts.extend(args.into_iter().map(Into::into));
        self
    }

    fn output_pair(self, flag: &str, value: impl Into<String>) -> Self {
        self.output_arg(flag).output_arg(value)
    }

    /// Start reading the latest input at `seconds`.
    pub fn seek(self, seconds: f64) -> Self {
        self.input_args(["-ss".to_string(), format!("{:.3}", seconds)])
    }

    /// Read at most `seconds` of the latest input.
    pub fn duration(self, seconds: f64) -> Self {
        self.input_args(["-t".to_string(), format!("{:.3}", seconds)])
    }

    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_pair("-vf", filter)
    }

    pub fn filter_complex(self, graph: impl Into<String>) -> Self {
        self.output_pair("-filter_complex", graph)
    }

    /// Route a stream or filter label into the output.
    pub fn map(self, label: impl Into<String>) -> Self {
        self.output_pair("-map", label)
    }

    pub fn encoding(self, encoding: &EncodingConfig) -> Self {
        self.output_args(encoding.to_ffmpeg_args())
    }

    /// Copy every stream without re-encoding.
    pub fn stream_copy(self) -> Self {
        self.output_pair("-c", "copy")
    }

    pub fn single_frame(self) -> Self {
        self.output_pair("-vframes", "1")
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Full argument vector, without the program name.
    ///
    /// Machine-readable progress goes to stderr (`-progress pipe:2`) so the
    /// runner can follow the encode.
    pub fn build_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-v", self.log_level.as_str(), "-progress", "pipe:2", "-nostats"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        for input in &self.inputs {
            args.extend_from_slice(&input.args);
            args.push("-i".into());
            args.push(input.path.display().to_string());
        }

        args.extend_from_slice(&self.output_opts);
        args.push(self.output.display().to_string());
        args
    }
}

/// Last few non-progress stderr lines, for error reports.
#[derive(Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
}

impl StderrTail {
    fn push(&mut self, line: String) {
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn into_text(self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(Vec::from(self.lines).join("\n"))
        }
    }
}

/// Spawns FFmpeg, follows its progress and enforces cancel/timeout.
#[derive(Debug, Clone, Default)]
pub struct FfmpegRunner {
    cancel: Option<CancelToken>,
    timeout_secs: Option<u64>,
}

impl FfmpegRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill the process as soon as this token is raised.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run `cmd`, calling `on_progress` at the end of every progress block.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, on_progress: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(MediaError::Cancelled);
        }

        let program = check_ffmpeg()?;
        let args = cmd.build_args();
        debug!(args = %args.join(" "), "Spawning ffmpeg");

        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let Some(stderr) = child.stderr.take() else {
            return Err(MediaError::internal("ffmpeg stderr was not piped"));
        };

        let follower = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut block = FfmpegProgress::default();
            let mut tail = StderrTail::default();
            while let Ok(Some(line)) = lines.next_line().await {
                if is_progress_key(&line) {
                    if let Some(snapshot) = parse_progress_line(&line, &mut block) {
                        on_progress(snapshot);
                    }
                } else {
                    tail.push(line);
                }
            }
            tail
        });

        let exit = self.supervise(&mut child).await;
        let diagnostics = follower.await.ok().and_then(StderrTail::into_text);

        exit.map_err(|e| match e {
            MediaError::FfmpegFailed {
                message, exit_code, ..
            } => MediaError::ffmpeg_failed(message, diagnostics, exit_code),
            other => other,
        })
    }

    async fn supervise(&self, child: &mut Child) -> MediaResult<()> {
        let token = self.cancel.clone();
        let on_cancel = async move {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        let limit = self.timeout_secs;
        let on_timeout = async move {
            match limit {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(MediaError::ffmpeg_failed("ffmpeg exited unsuccessfully", None, status.code()))
                }
            }
            _ = on_cancel => {
                info!("Cancellation raised, killing ffmpeg");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            _ = on_timeout => {
                let secs = limit.unwrap_or_default();
                warn!(secs, "ffmpeg exceeded its time limit, killing it");
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

const PROGRESS_KEYS: &[&str] = &[
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
];

fn is_progress_key(line: &str) -> bool {
    match line.trim().split_once('=') {
        Some((key, _)) => PROGRESS_KEYS.contains(&key) || key.starts_with("stream_"),
        None => false,
    }
}

/// Fold one `key=value` line of `-progress` output into `block`.
///
/// A `progress=` line closes the block and yields a snapshot of it.
pub fn parse_progress_line(line: &str, block: &mut FfmpegProgress) -> Option<FfmpegProgress> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();

    match key {
        // Both keys carry microseconds, despite the name.
        "out_time_us" | "out_time_ms" => {
            if let Ok(micros) = value.parse::<i64>() {
                block.out_time_ms = micros / 1000;
            }
        }
        "out_time" => block.out_time = value.to_string(),
        "frame" => block.frame = value.parse().unwrap_or(block.frame),
        "fps" => block.fps = value.parse().unwrap_or(block.fps),
        "speed" => {
            if let Some(speed) = value.strip_suffix('x').and_then(|v| v.trim().parse().ok()) {
                block.speed = speed;
            }
        }
        "progress" => {
            block.is_complete = value == "end";
            return Some(block.clone());
        }
        _ => {}
    }
    None
}

pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_command_layout() {
        let args = FfmpegCommand::new("source.mp4", "batch_000.mp4")
            .seek(10.0)
            .duration(30.0)
            .encoding(&EncodingConfig::default())
            .build_args();
        let joined = args.join(" ");

        assert!(joined.starts_with("-y -v error -progress pipe:2 -nostats"));
        assert!(joined.contains("-ss 10.000 -t 30.000 -i source.mp4"));
        assert!(joined.contains("-c:v libx264"));
        assert_eq!(args.last().map(String::as_str), Some("batch_000.mp4"));
    }

    #[test]
    fn test_input_args_bind_to_their_input() {
        let cmd = FfmpegCommand::new("video.mp4", "out.mp4")
            .seek(5.0)
            .add_input("a.wav")
            .add_input("b.wav")
            .filter_complex("[0:v]null[v]")
            .map("[v]");

        let args = cmd.build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let first_i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < first_i);
        assert_eq!(args[first_i + 1], "video.mp4");
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 3);
        assert_eq!(cmd.input_count(), 3);

        let a = args.iter().position(|x| x == "a.wav").unwrap();
        let b = args.iter().position(|x| x == "b.wav").unwrap();
        let fc = args.iter().position(|x| x == "-filter_complex").unwrap();
        assert!(a < b && b < fc);
    }

    #[test]
    fn test_progress_block_folding() {
        let mut block = FfmpegProgress::default();

        assert!(parse_progress_line("out_time_us=5000000", &mut block).is_none());
        assert_eq!(block.out_time_ms, 5000);

        parse_progress_line("speed=1.5x", &mut block);
        parse_progress_line("speed=N/A", &mut block);
        assert_eq!(block.speed, 1.5);

        let mid = parse_progress_line("progress=continue", &mut block).unwrap();
        assert!(!mid.is_complete);
        assert_eq!(mid.out_time_secs(), 5.0);

        let last = parse_progress_line("progress=end", &mut block).unwrap();
        assert!(last.is_complete);
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let mut tail = StderrTail::default();
        assert!(StderrTail::default().into_text().is_none());
        for i in 0..(STDERR_TAIL_LINES + 5) {
            tail.push(format!("line {}", i));
        }
        tail.push("   ".to_string());
        let text = tail.into_text().unwrap();
        assert_eq!(text.lines().count(), STDERR_TAIL_LINES);
        assert!(text.starts_with("line 5"));
    }

    #[test]
    fn test_progress_key_detection() {
        assert!(is_progress_key("bitrate=  1.2kbits/s"));
        assert!(is_progress_key("stream_1_0_q=28.0"));
        assert!(!is_progress_key("Error opening input file a.wav."));
    }

    #[cfg(unix)]
    fn long_sleep() -> Child {
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_process() {
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let runner = FfmpegRunner::new().with_cancel(token);
        let mut child = long_sleep();
        let started = std::time::Instant::now();

        assert!(matches!(runner.supervise(&mut child).await, Err(MediaError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_running_process() {
        let runner = FfmpegRunner::new().with_timeout(1);
        let mut child = long_sleep();

        assert!(matches!(runner.supervise(&mut child).await, Err(MediaError::Timeout(1))));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_before_spawn() {
        let token = CancelToken::new();
        token.cancel();
        let runner = FfmpegRunner::new().with_cancel(token);
        let cmd = FfmpegCommand::new("missing.mp4", "out.mp4");
        assert!(matches!(runner.run(&cmd).await, Err(MediaError::Cancelled)));
    }
}
