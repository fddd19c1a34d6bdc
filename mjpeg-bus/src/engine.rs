use std::{
    path::PathBuf,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    capture::{self, CaptureOptions},
    command::CaptureCommand,
    config::StreamConfig,
    hub::{Frame, FrameHub, FrameSubscriber},
    redact::mask_locator,
};

/// Delay between a transcoder exit and the next spawn.
pub const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// Upper bound on how long `stop()` waits for the capture task.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    /// Built, never started.
    Idle,
    Running,
    /// The transcoder went away and the backoff delay is running.
    Restarting,
    /// Terminal. A stopped engine is replaced, never restarted.
    Stopped,
}

#[derive(Clone, Debug)]
pub enum CaptureSource {
    /// Supervise an external transcoder writing JPEG images to stdout.
    Process(CaptureCommand),
    /// Publish a placeholder frame on a timer, no process involved.
    TestPattern(TestPattern),
}

#[derive(Clone, Debug)]
pub struct TestPattern {
    pub fps: u32,
    /// Frame supplied by the caller; takes precedence over everything else.
    pub placeholder: Option<Bytes>,
    /// Previously mirrored frame to reuse when no placeholder is given.
    pub cache: Option<PathBuf>,
}

/// State shared between the engine handle and its capture task.
///
/// The state flag and every write to the latest-frame slot go through `state`,
/// so a stopped engine can never publish again.
pub(crate) struct Shared {
    state: Mutex<EngineState>,
    pub(crate) hub: FrameHub,
    pub(crate) cancel: CancellationToken,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.lock_state()
    }

    /// Move between Running and Restarting. Has no effect once stopped.
    pub(crate) fn transition(&self, next: EngineState) {
        let mut state = self.lock_state();
        if *state != EngineState::Stopped && *state != next {
            log::debug!("engine: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    /// Publish a frame unless the engine has been stopped.
    pub(crate) fn publish(&self, data: Bytes) -> Option<u64> {
        let state = self.lock_state();
        if *state == EngineState::Stopped || self.cancel.is_cancelled() {
            return None;
        }
        let seq = self.hub.publish(data);
        drop(state);
        Some(seq)
    }
}

/// Capture engine: one source, one latest-frame slot, any number of readers.
pub struct Engine {
    shared: Arc<Shared>,
    source: CaptureSource,
    options: CaptureOptions,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(config: StreamConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let source = if config.is_test_pattern() {
            CaptureSource::TestPattern(TestPattern {
                fps: config.effective_fps(),
                placeholder: None,
                cache: config.debug_snapshot.clone(),
            })
        } else {
            if !config.is_configured() {
                return Err(anyhow::anyhow!("no source configured"));
            }
            CaptureSource::Process(CaptureCommand::from_config(&config)?)
        };

        Ok(Self::from_source(source).with_debug_snapshot(config.debug_snapshot))
    }

    pub fn from_source(source: CaptureSource) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::Idle),
                hub: FrameHub::new(),
                cancel: CancellationToken::new(),
            }),
            source,
            options: CaptureOptions {
                restart_backoff: RESTART_BACKOFF,
                debug_snapshot: None,
            },
            task: Mutex::new(None),
        }
    }

    /// Seed the frame published in test-pattern mode. Ignored for process sources.
    pub fn with_placeholder(mut self, frame: Bytes) -> Self {
        if let CaptureSource::TestPattern(pattern) = &mut self.source {
            pattern.placeholder = Some(frame);
        }
        self
    }

    pub fn with_restart_backoff(mut self, backoff: Duration) -> Self {
        self.options.restart_backoff = backoff;
        self
    }

    /// Mirror the last good frame of a live source to `path`.
    pub fn with_debug_snapshot(mut self, path: Option<PathBuf>) -> Self {
        if matches!(self.source, CaptureSource::Process(_)) {
            self.options.debug_snapshot = path;
        }
        self
    }

    /// Start capturing. Calling it again while running does nothing; a stopped
    /// engine stays stopped.
    ///
    /// Fails only when no tokio runtime is available to run the capture task.
    pub fn start(&self) -> anyhow::Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("engine needs a tokio runtime: {}", e))?;

        let mut state = self.shared.lock_state();
        match *state {
            EngineState::Running | EngineState::Restarting => return Ok(()),
            EngineState::Stopped => {
                log::warn!("engine: ignoring start of stopped engine {}", self.describe());
                return Ok(());
            }
            EngineState::Idle => {}
        }

        log::info!("engine: starting {}", self.describe());
        *state = EngineState::Running;
        let handle = runtime.spawn(capture::run(
            Arc::clone(&self.shared),
            self.source.clone(),
            self.options.clone(),
        ));
        *self.task_slot() = Some(handle);
        Ok(())
    }

    /// Stop capturing, kill the transcoder and wait (bounded) for the capture task.
    /// Safe to call any number of times, also before `start()`.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.lock_state();
            if *state == EngineState::Stopped {
                return;
            }
            *state = EngineState::Stopped;
            self.shared.cancel.cancel();
            self.shared.hub.clear();
        }

        let task = self.task_slot().take();
        if let Some(mut task) = task {
            if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
                log::warn!(
                    "engine: capture task did not finish within {:?}, aborting",
                    STOP_TIMEOUT
                );
                task.abort();
            }
        }
        log::info!("engine: stopped {}", self.describe());
    }

    /// Latest frame, or `None` if nothing has been captured yet.
    pub fn snapshot(&self) -> Option<Frame> {
        self.shared.hub.snapshot()
    }

    /// Reader for a stream consumer. See [`FrameSubscriber::next_frame`].
    pub fn subscribe(&self) -> FrameSubscriber {
        self.shared.hub.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Running or restarting; callers treat both as "frames may still come".
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            EngineState::Running | EngineState::Restarting
        )
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.shared.hub.latest_seq()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.hub.subscriber_count()
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    /// Human readable source with credentials masked.
    pub fn describe(&self) -> String {
        match &self.source {
            CaptureSource::TestPattern(_) => "test pattern".to_string(),
            CaptureSource::Process(command) if command.locator().is_empty() => {
                command.program.clone()
            }
            CaptureSource::Process(command) => mask_locator(command.locator()),
        }
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
