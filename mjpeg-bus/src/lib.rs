//! Capture a camera feed through an external transcoder and fan the resulting JPEG
//! frames out to any number of readers.
//!
//! ```text
//! StreamConfig ─► command ─► transcoder stdout ─► JpegDemuxer ─► FrameHub ─┬─► snapshot()
//!                                 ▲                                         └─► FrameSubscriber × N
//!                                 └── Engine (spawn, restart with backoff, stop)
//! ```

mod capture;
pub mod command;
pub mod config;
pub mod demux;
pub mod engine;
pub mod hub;
pub mod pattern;
pub mod redact;

pub use command::CaptureCommand;
pub use config::{DEFAULT_FPS, StreamConfig, TEST_PATTERN_SOURCE};
pub use demux::JpegDemuxer;
pub use engine::{CaptureSource, Engine, EngineState, TestPattern};
pub use hub::{Frame, FrameHub, FrameSubscriber, NextFrame, STALL_TIMEOUT};
pub use redact::mask_locator;
