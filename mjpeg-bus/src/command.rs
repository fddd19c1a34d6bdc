use std::fmt::{Display, Formatter};

use crate::{
    config::{StreamConfig, non_empty},
    redact::mask_locator,
};

/// Final argument: write the image sequence to stdout.
pub const OUTPUT_SINK: &str = "-";

/// A fully resolved transcoder invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Locator to mask whenever the command or its output is logged.
    locator: String,
}

impl CaptureCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            locator: String::new(),
        }
    }

    /// Command for `config`, see [`build_args`].
    pub fn from_config(config: &StreamConfig) -> anyhow::Result<Self> {
        Ok(Self {
            program: config.ffmpeg_path.clone(),
            args: build_args(config)?,
            locator: config.source.clone(),
        })
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }
}

impl Display for CaptureCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if !self.locator.is_empty() && arg == &self.locator {
                write!(f, " {}", mask_locator(arg))?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Transcoder arguments for `config`: the source pulled over TCP and re-encoded as a
/// JPEG image sequence on stdout.
///
/// Extra arguments are spliced in right before the output sink so they can add to,
/// but never displace, the arguments built here.
pub fn build_args(config: &StreamConfig) -> anyhow::Result<Vec<String>> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-rtsp_transport".into(),
        "tcp".into(),
        "-i".into(),
        config.source.clone(),
        "-an".into(),
    ];

    if let Some(filter) = filter_graph(config) {
        args.push("-vf".into());
        args.push(filter);
    }

    args.push("-r".into());
    args.push(config.effective_fps().to_string());

    if let Some(resolution) = non_empty(&config.resolution) {
        args.push("-s".into());
        args.push(resolution.to_string());
    }
    if let Some(bitrate) = non_empty(&config.bitrate) {
        args.push("-b:v".into());
        args.push(bitrate.to_string());
    }

    args.extend(
        ["-f", "image2pipe", "-vcodec", "mjpeg", "-q:v", "5"]
            .into_iter()
            .map(String::from),
    );
    args.extend(config.extra_arg_tokens()?);
    args.push(OUTPUT_SINK.into());

    Ok(args)
}

/// Orientation filters in fixed order: horizontal flip, vertical flip, rotate.
fn filter_graph(config: &StreamConfig) -> Option<String> {
    let mut filters = Vec::new();
    if config.flip_h {
        filters.push("hflip");
    }
    if config.flip_v {
        filters.push("vflip");
    }
    if config.rotate_90 {
        filters.push("transpose=1");
    }

    if filters.is_empty() {
        None
    } else {
        Some(filters.join(","))
    }
}
