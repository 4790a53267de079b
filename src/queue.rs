//! Queues, sentinels and run-state shared between pipeline tasks.
//!
//! Every cross-task hand-off in the pipeline goes through one of the channels
//! built here. Consumers check the [`RunFlag`] on each iteration and stop
//! pulling once it is cleared.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the outbound queue feeding the AI session.
pub const OUTBOUND_CAPACITY: usize = 20;

/// An item on a queue whose logical units are delimited by sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem<T> {
    Data(T),
    /// No more data for the current unit. Does not close the queue.
    EndOfStream,
}

/// A queue item tagged with the interruption epoch it was produced in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub epoch: u64,
    pub item: T,
}

impl<T> Stamped<T> {
    pub fn new(epoch: u64, item: T) -> Self {
        Self { epoch, item }
    }
}

/// Text queued for speech synthesis.
pub type TtsItem = Stamped<StreamItem<String>>;
/// PCM audio queued for the speaker.
pub type PlaybackChunk = Stamped<Vec<u8>>;

/// Shared "running" flag handed to every task at spawn time.
#[derive(Debug, Clone, Default)]
pub struct RunFlag {
    token: CancellationToken,
}

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Clear the flag. Idempotent.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Resolves once [`RunFlag::stop`] has been called.
    pub async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// Interruption generation counter.
///
/// Bumped whenever the user barges in with new input; consumers drop
/// synthesis text and playback audio stamped with an older epoch.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    epoch: Arc<AtomicU64>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Start a new generation and return it.
    pub fn bump(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.current()
    }
}

/// Media type of PCM audio frames.
pub const AUDIO_MIME: &str = "audio/pcm";
/// Media type of image frames.
pub const IMAGE_MIME: &str = "image/jpeg";

/// A single unit of input bound for the AI session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// 16 kHz mono S16LE microphone audio.
    Audio(Vec<u8>),
    /// JPEG encoded camera or screen frame.
    Image(Vec<u8>),
    /// A typed user message.
    Text(String),
}

impl OutboundFrame {
    /// Media type for audio/image frames, `None` for text.
    pub fn mime_type(&self) -> Option<&'static str> {
        match self {
            Self::Audio(_) => Some(AUDIO_MIME),
            Self::Image(_) => Some(IMAGE_MIME),
            Self::Text(_) => None,
        }
    }
}

/// Producer side of the bounded outbound queue.
///
/// Cloned into every producer. When the queue is full producers suspend
/// (or block, for device threads) until the session sender frees a slot.
#[derive(Debug, Clone)]
pub struct OutboundMultiplexer {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundMultiplexer {
    /// Create the multiplexer and the receiving end drained by the session.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue a frame, waiting for space. Returns `false` once the session
    /// side has gone away.
    pub async fn push(&self, frame: OutboundFrame) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Blocking variant for producers running on dedicated OS threads.
    /// Must not be called from inside the async runtime.
    pub fn blocking_push(&self, frame: OutboundFrame) -> bool {
        self.tx.blocking_send(frame).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_backpressure_loses_nothing() {
        let (mux, mut rx) = OutboundMultiplexer::new(OUTBOUND_CAPACITY);
        let total = 137usize;

        let producers: Vec<_> = (0..3)
            .map(|p| {
                let mux = mux.clone();
                tokio::spawn(async move {
                    for i in 0..total {
                        if i % 3 == p {
                            assert!(mux.push(OutboundFrame::Audio(vec![i as u8])).await);
                        }
                    }
                })
            })
            .collect();
        drop(mux);

        let mut received = 0usize;
        while let Some(frame) = rx.recv().await {
            assert_eq!(frame.mime_type(), Some(AUDIO_MIME));
            received += 1;
            if received % 10 == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        for p in producers {
            p.await.unwrap();
        }
        assert_eq!(received, total);
    }

    #[tokio::test]
    async fn test_push_suspends_when_full() {
        let (mux, mut rx) = OutboundMultiplexer::new(2);
        assert!(mux.push(OutboundFrame::Text("a".into())).await);
        assert!(mux.push(OutboundFrame::Text("b".into())).await);

        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            mux.push(OutboundFrame::Text("c".into())),
        )
        .await;
        assert!(blocked.is_err(), "third push should wait for space");

        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("a".into())));
        assert!(mux.push(OutboundFrame::Text("c".into())).await);
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("b".into())));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("c".into())));
    }

    #[test]
    fn test_blocking_push_from_thread() {
        let (mux, mut rx) = OutboundMultiplexer::new(OUTBOUND_CAPACITY);
        let handle = std::thread::spawn(move || {
            for i in 0..50u8 {
                assert!(mux.blocking_push(OutboundFrame::Image(vec![i])));
            }
        });
        let mut seen = Vec::new();
        while let Some(frame) = rx.blocking_recv() {
            if let OutboundFrame::Image(data) = frame {
                seen.push(data[0]);
            }
        }
        handle.join().unwrap();
        assert_eq!(seen, (0..50u8).collect::<Vec<_>>());
    }

    #[test]
    fn test_mime_types() {
        assert_eq!(OutboundFrame::Audio(vec![]).mime_type(), Some("audio/pcm"));
        assert_eq!(OutboundFrame::Image(vec![]).mime_type(), Some("image/jpeg"));
        assert_eq!(OutboundFrame::Text(String::new()).mime_type(), None);
    }

    #[tokio::test]
    async fn test_run_flag() {
        let flag = RunFlag::new();
        let clone = flag.clone();
        assert!(clone.is_running());
        flag.stop();
        flag.stop();
        assert!(!clone.is_running());
        clone.stopped().await;
    }

    #[test]
    fn test_interrupt_epochs() {
        let interrupt = Interrupt::new();
        let before = interrupt.current();
        assert!(!interrupt.is_stale(before));
        let next = interrupt.bump();
        assert_eq!(next, before + 1);
        assert!(interrupt.is_stale(before));
        assert!(!interrupt.is_stale(next));
    }
}
