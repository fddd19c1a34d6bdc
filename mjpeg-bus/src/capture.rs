use std::{
    path::PathBuf,
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStderr},
    time::MissedTickBehavior,
};

use crate::{
    command::CaptureCommand,
    demux::{DemuxStats, JPEG_EOI, JPEG_SOI, JpegDemuxer},
    engine::{CaptureSource, EngineState, Shared, TestPattern},
    pattern::{PATTERN_HEIGHT, PATTERN_WIDTH, color_bars},
    redact::mask_in,
};

const READ_CHUNK_SIZE: usize = 32 * 1024;
const KILL_WAIT: Duration = Duration::from_secs(2);
const STDERR_DRAIN_WAIT: Duration = Duration::from_millis(500);
const MAX_STDERR_LINE: usize = 1024;
const DEBUG_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub(crate) struct CaptureOptions {
    pub restart_backoff: Duration,
    pub debug_snapshot: Option<PathBuf>,
}

/// Body of the engine's capture task. Returns once the engine is cancelled.
pub(crate) async fn run(shared: Arc<Shared>, source: CaptureSource, options: CaptureOptions) {
    match &source {
        CaptureSource::Process(command) => supervise(&shared, command, &options).await,
        CaptureSource::TestPattern(pattern) => run_test_pattern(&shared, pattern).await,
    }
}

async fn supervise(shared: &Shared, command: &CaptureCommand, options: &CaptureOptions) {
    let mut mirror = SnapshotMirror::new(options.debug_snapshot.clone());
    let mut attempt: u64 = 0;

    loop {
        if shared.cancel.is_cancelled() {
            break;
        }
        attempt += 1;
        log::info!("capture: starting transcoder (attempt {}): {}", attempt, command);

        match run_process(shared, command, &mut mirror).await {
            Ok(stats) => log::warn!(
                "capture: transcoder output ended after {} frames ({} bytes discarded, {} overflow resets)",
                stats.frames,
                stats.discarded_bytes,
                stats.overflow_resets
            ),
            Err(e) => log::error!("capture: {:#}", e),
        }

        if shared.cancel.is_cancelled() {
            break;
        }
        shared.transition(EngineState::Restarting);
        log::info!("capture: restarting in {:?}", options.restart_backoff);
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(options.restart_backoff) => {}
        }
    }

    log::debug!("capture: supervisor exited after {} attempts", attempt);
}

/// Spawn the transcoder once and pump its stdout through the demuxer until it ends
/// or the engine is cancelled. The child never outlives this call.
async fn run_process(
    shared: &Shared,
    command: &CaptureCommand,
    mirror: &mut SnapshotMirror,
) -> anyhow::Result<DemuxStats> {
    let mut child = tokio::process::Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                anyhow::anyhow!("transcoder {:?} not found, is it installed?", command.program)
            }
            _ => anyhow::anyhow!("failed to spawn {:?}: {}", command.program, e),
        })?;

    let drain = child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(drain_stderr(stderr, command.locator().to_string())));

    let result = pump(shared, &mut child, mirror).await;

    terminate(&mut child).await;
    if let Some(mut drain) = drain {
        if tokio::time::timeout(STDERR_DRAIN_WAIT, &mut drain)
            .await
            .is_err()
        {
            drain.abort();
        }
    }
    result
}

async fn pump(
    shared: &Shared,
    child: &mut Child,
    mirror: &mut SnapshotMirror,
) -> anyhow::Result<DemuxStats> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow::anyhow!("transcoder stdout was not captured"))?;
    shared.transition(EngineState::Running);

    let mut demuxer = JpegDemuxer::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            read = stdout.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => {
                    for frame in demuxer.feed(&chunk[..n]) {
                        match shared.publish(frame.clone()) {
                            Some(1) => log::info!("capture: first frame ({} bytes)", frame.len()),
                            Some(_) => {}
                            None => break,
                        }
                        mirror.offer(&frame);
                    }
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("reading transcoder output: {}", e));
                }
            }
        }
    }
    Ok(demuxer.stats())
}

async fn terminate(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            log::info!("capture: transcoder exited ({})", status);
            return;
        }
        Ok(None) => {}
        Err(e) => log::warn!("capture: polling transcoder status: {}", e),
    }

    if let Err(e) = child.start_kill() {
        log::warn!("capture: killing transcoder: {}", e);
    }
    match tokio::time::timeout(KILL_WAIT, child.wait()).await {
        Ok(Ok(status)) => log::debug!("capture: transcoder terminated ({})", status),
        Ok(Err(e)) => log::warn!("capture: waiting for transcoder: {}", e),
        Err(_) => log::warn!("capture: transcoder did not exit within {:?}", KILL_WAIT),
    }
}

/// Keep the transcoder's stderr pipe empty so it never blocks on it. Lines are only
/// logged, progress lines ending in `\r` included.
async fn drain_stderr(mut stderr: ChildStderr, locator: String) {
    let mut chunk = [0u8; 4096];
    let mut line = Vec::with_capacity(MAX_STDERR_LINE);
    loop {
        let n = match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("capture: stderr closed: {}", e);
                break;
            }
        };
        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                emit_stderr_line(&line, &locator);
                line.clear();
            } else if line.len() < MAX_STDERR_LINE {
                line.push(byte);
            }
        }
    }
    emit_stderr_line(&line, &locator);
}

fn emit_stderr_line(line: &[u8], locator: &str) {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if !text.is_empty() {
        log::debug!("ffmpeg: {}", mask_in(text, locator));
    }
}

async fn run_test_pattern(shared: &Shared, pattern: &TestPattern) {
    let frame = match placeholder(pattern).await {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("capture: no test pattern frame: {:#}", e);
            return;
        }
    };

    let period = Duration::from_secs_f64(1.0 / f64::from(pattern.fps.max(1)));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    log::info!(
        "capture: test pattern at {} fps ({} bytes per frame)",
        pattern.fps.max(1),
        frame.len()
    );

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if shared.publish(frame.clone()).is_none() {
                    break;
                }
            }
        }
    }
}

/// Seeded frame, else the cached snapshot on disk, else generated colour bars.
async fn placeholder(pattern: &TestPattern) -> anyhow::Result<Bytes> {
    if let Some(frame) = &pattern.placeholder {
        return Ok(frame.clone());
    }

    if let Some(path) = &pattern.cache {
        match tokio::fs::read(path).await {
            Ok(data) if looks_like_jpeg(&data) => {
                log::info!("capture: test pattern uses cached frame {}", path.display());
                return Ok(Bytes::from(data));
            }
            Ok(_) => log::warn!(
                "capture: cached frame {} is not a JPEG, ignoring",
                path.display()
            ),
            Err(e) => log::debug!("capture: no cached frame at {}: {}", path.display(), e),
        }
    }

    color_bars(PATTERN_WIDTH, PATTERN_HEIGHT)
}

fn looks_like_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(&JPEG_SOI) && data.ends_with(&JPEG_EOI)
}

/// Writes the last good frame to disk, at most once per interval.
struct SnapshotMirror {
    path: Option<PathBuf>,
    last_write: Option<Instant>,
}

impl SnapshotMirror {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            last_write: None,
        }
    }

    fn offer(&mut self, frame: &Bytes) {
        let Some(path) = &self.path else {
            return;
        };
        if self
            .last_write
            .is_some_and(|t| t.elapsed() < DEBUG_SNAPSHOT_INTERVAL)
        {
            return;
        }
        self.last_write = Some(Instant::now());

        let path = path.clone();
        let frame = frame.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::fs::write(&path, &frame).await {
                log::warn!("capture: writing debug snapshot {}: {}", path.display(), e);
            }
        });
    }
}
