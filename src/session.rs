use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::Stream;
use mjpeg_bus::{Engine, FrameSubscriber, NextFrame, STALL_TIMEOUT};

use crate::multipart;

/// One MJPEG consumer. Pulls frames from the engine and renders them as multipart
/// parts until the engine goes away.
pub struct StreamSession {
    engine: Arc<Engine>,
    subscriber: FrameSubscriber,
    stall_timeout: Duration,
    sent: u64,
}

impl StreamSession {
    pub fn new(engine: Arc<Engine>) -> Self {
        let subscriber = engine.subscribe();
        log::info!(
            "stream: session opened ({} readers)",
            engine.subscriber_count()
        );
        Self {
            engine,
            subscriber,
            stall_timeout: STALL_TIMEOUT,
            sent: 0,
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Next part to send, or `None` once the session should end.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            match self.subscriber.next_frame(self.stall_timeout).await {
                NextFrame::Frame(frame) => {
                    self.sent += 1;
                    return Some(multipart::jpeg_part(frame.data()));
                }
                NextFrame::NoUpdate if self.engine.is_running() => {
                    log::debug!(
                        "stream: no new frame within {:?}, still waiting",
                        self.stall_timeout
                    );
                }
                NextFrame::NoUpdate => {
                    log::info!("stream: engine is not running, closing session");
                    return None;
                }
                NextFrame::Closed => {
                    log::info!("stream: engine closed, session sent {} frames", self.sent);
                    return None;
                }
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::unfold(self, |mut session| async move {
            let part = session.next_part().await?;
            Some((Ok(part), session))
        })
    }
}
