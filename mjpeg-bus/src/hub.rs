use std::{
    fmt::{Display, Formatter},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tokio::sync::watch;

/// How long a stream reader waits for a new frame before reporting a stall.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);

/// One complete JPEG image as published by the capture loop.
#[derive(Clone, Debug)]
pub struct Frame {
    seq: u64,
    data: Bytes,
    captured_at: Instant,
}

impl Frame {
    /// Position in the engine's publish order, starting at 1.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Time since the frame was published.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Frame {{ seq: {}, data: {} }}", self.seq, self.data.len())
    }
}

/// Result of waiting for the next frame.
#[derive(Debug)]
pub enum NextFrame {
    Frame(Frame),
    /// Nothing new arrived within the timeout.
    NoUpdate,
    /// The hub was torn down; no further frames will ever arrive.
    Closed,
}

/// Latest-value broadcast of frames: one writer, any number of readers.
///
/// Readers never queue. A reader that is slower than the producer simply sees
/// the newest frame when it wakes up.
pub struct FrameHub {
    tx: watch::Sender<Option<Frame>>,
}

impl FrameHub {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Replace the current frame and wake every waiting reader.
    pub fn publish(&self, data: Bytes) -> u64 {
        let mut seq = 0;
        self.tx.send_modify(|slot| {
            seq = slot.as_ref().map_or(1, |f| f.seq + 1);
            *slot = Some(Frame {
                seq,
                data,
                captured_at: Instant::now(),
            });
        });
        seq
    }

    /// The current frame, or `None` if nothing has been published yet.
    pub fn snapshot(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }

    pub fn latest_seq(&self) -> Option<u64> {
        self.tx.borrow().as_ref().map(Frame::seq)
    }

    /// Drop the current frame. Readers blocked in [`FrameSubscriber::next_frame`]
    /// wake up with [`NextFrame::Closed`].
    pub fn clear(&self) {
        if self.tx.send_replace(None).is_some() {
            log::debug!("hub: cleared latest frame");
        }
    }

    /// A new reader. If a frame already exists, the first wait returns it at once.
    pub fn subscribe(&self) -> FrameSubscriber {
        let mut rx = self.tx.subscribe();
        if rx.borrow().is_some() {
            rx.mark_changed();
        }
        FrameSubscriber { rx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FrameHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct FrameSubscriber {
    rx: watch::Receiver<Option<Frame>>,
}

impl FrameSubscriber {
    /// Wait until a frame newer than the last one returned here is published.
    pub async fn next_frame(&mut self, timeout: Duration) -> NextFrame {
        match tokio::time::timeout(timeout, self.rx.changed()).await {
            Err(_) => NextFrame::NoUpdate,
            Ok(Err(_)) => NextFrame::Closed,
            Ok(Ok(())) => match self.rx.borrow_and_update().clone() {
                Some(frame) => NextFrame::Frame(frame),
                None => NextFrame::Closed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn jpeg(tag: u8) -> Bytes {
        Bytes::from(vec![0xFF, 0xD8, tag, 0xFF, 0xD9])
    }

    #[test]
    fn test_snapshot_before_and_after_publish() {
        let hub = FrameHub::new();
        assert!(hub.snapshot().is_none());
        assert_eq!(hub.latest_seq(), None);

        assert_eq!(hub.publish(jpeg(1)), 1);
        assert_eq!(hub.publish(jpeg(2)), 2);

        let frame = hub.snapshot().unwrap();
        assert_eq!(frame.seq(), 2);
        assert_eq!(frame.data(), &jpeg(2));
    }

    #[tokio::test]
    async fn test_next_frame_times_out_without_publish() {
        let hub = FrameHub::new();
        let mut sub = hub.subscribe();
        match sub.next_frame(Duration::from_millis(50)).await {
            NextFrame::NoUpdate => {}
            other => panic!("expected NoUpdate, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_late_subscribers_see_current_frame() {
        let hub = FrameHub::new();
        let mut first = hub.subscribe();
        hub.publish(jpeg(7));

        let mut second = hub.subscribe();
        let a = match first.next_frame(Duration::from_secs(1)).await {
            NextFrame::Frame(f) => f,
            other => panic!("expected frame, got {:?}", other),
        };
        let b = match second.next_frame(Duration::from_secs(1)).await {
            NextFrame::Frame(f) => f,
            other => panic!("expected frame, got {:?}", other),
        };
        assert_eq!(a.seq(), b.seq());
        assert_eq!(a.data(), b.data());

        // both have now seen frame 1, the next wait stalls
        assert!(matches!(
            first.next_frame(Duration::from_millis(20)).await,
            NextFrame::NoUpdate
        ));
    }

    #[tokio::test]
    async fn test_slow_reader_gets_latest_only() {
        let hub = FrameHub::new();
        let mut sub = hub.subscribe();
        for i in 0..10 {
            hub.publish(jpeg(i));
        }
        match sub.next_frame(Duration::from_secs(1)).await {
            NextFrame::Frame(f) => {
                assert_eq!(f.seq(), 10);
                assert_eq!(f.data(), &jpeg(9));
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_all_waiters_wake_on_publish() {
        let hub = Arc::new(FrameHub::new());
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let mut sub = hub.subscribe();
            waiters.push(tokio::spawn(async move {
                match sub.next_frame(Duration::from_secs(5)).await {
                    NextFrame::Frame(f) => f.seq(),
                    _ => 0,
                }
            }));
        }
        assert_eq!(hub.subscriber_count(), 4);

        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.publish(jpeg(1));

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), 1);
        }
    }

    #[tokio::test]
    async fn test_clear_closes_waiters() {
        let hub = Arc::new(FrameHub::new());
        hub.publish(jpeg(1));
        let mut sub = hub.subscribe();
        assert!(matches!(
            sub.next_frame(Duration::from_secs(1)).await,
            NextFrame::Frame(_)
        ));

        let waiter = tokio::spawn(async move { sub.next_frame(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        hub.clear();

        assert!(matches!(waiter.await.unwrap(), NextFrame::Closed));
        assert!(hub.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_dropped_hub_closes_waiters() {
        let hub = FrameHub::new();
        let mut sub = hub.subscribe();
        drop(hub);
        assert!(matches!(
            sub.next_frame(Duration::from_secs(1)).await,
            NextFrame::Closed
        ));
    }
}
