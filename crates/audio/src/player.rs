//! Priority-scheduled audio output.
//!
//! Clips are queued under `(priority, seq)` keys (lower runs first, `0`
//! is reserved for the critical/immediate path) and a single worker
//! drains the queue onto the output device. Critical work interrupts:
//! it aborts the in-flight clip, sheds every queued non-critical clip,
//! and holds the worker until the critical sequence has played.
//!
//! The output device is owned by a dedicated thread (the rodio
//! `OutputStream` is not `Send`); clips block inside `spawn_blocking`
//! while playing so the supervising loop stays responsive.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::pcm16_to_samples;
use crate::tones::ToneSet;
use echo_domain::BlockReason;

/// Queue priority for the immediate/critical path.
pub const PRIO_CRITICAL: u8 = 0;
/// Queue priority for normal narration.
pub const PRIO_NORMAL: u8 = 1;
/// Queue priority for low narration (sheddable).
pub const PRIO_LOW: u8 = 2;

#[derive(PartialEq, Eq)]
struct QueuedClip {
    prio: u8,
    seq: u64,
    samples: Vec<i16>,
}

impl Ord for QueuedClip {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.prio, self.seq).cmp(&(other.prio, other.seq))
    }
}

impl PartialOrd for QueuedClip {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct Player {
    sample_rate: u32,
    backlog_threshold: usize,
    tones: ToneSet,
    queue: Mutex<BinaryHeap<Reverse<QueuedClip>>>,
    seq: AtomicU64,
    /// Set while critical work owns the device; the worker stops dequeuing.
    hold: AtomicBool,
    notify: Notify,
    /// One clip on the device at a time, across worker and immediate paths.
    gate: tokio::sync::Mutex<()>,
    /// Sink handle for the clip currently on the device, for abort.
    current: Mutex<Option<Arc<rodio::Sink>>>,
    output: Option<rodio::OutputStreamHandle>,
}

impl Player {
    /// Probe the default output device and build the player. A missing
    /// device yields a player whose playback methods are no-ops.
    pub fn new(sample_rate: u32, backlog_threshold: usize) -> Self {
        let output = open_output();
        if output.is_none() {
            tracing::warn!("no audio output device; playback disabled");
        }
        Self {
            sample_rate,
            backlog_threshold,
            tones: ToneSet::generate(sample_rate),
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            hold: AtomicBool::new(false),
            notify: Notify::new(),
            gate: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            output,
        }
    }

    /// A player with no device, regardless of hardware. For tests.
    #[doc(hidden)]
    pub fn without_device(sample_rate: u32, backlog_threshold: usize) -> Self {
        Self {
            sample_rate,
            backlog_threshold,
            tones: ToneSet::generate(sample_rate),
            queue: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            hold: AtomicBool::new(false),
            notify: Notify::new(),
            gate: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            output: None,
        }
    }

    pub fn available(&self) -> bool {
        self.output.is_some()
    }

    /// Number of clips waiting in the queue.
    pub fn depth(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn interrupted(&self) -> bool {
        self.hold.load(Ordering::Acquire)
    }

    /// Whether low-priority work should be shed right now.
    pub fn backlog_full(&self) -> bool {
        self.depth() >= self.backlog_threshold
    }

    /// Queue a PCM16 clip. Critical and normal clips are always accepted;
    /// low clips are shed once the backlog reaches the threshold.
    pub fn enqueue(&self, pcm: &[u8], prio: u8) -> bool {
        if prio == PRIO_LOW && self.backlog_full() {
            tracing::debug!(depth = self.depth(), "backlog full, shedding low clip");
            return false;
        }
        let clip = QueuedClip {
            prio,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            samples: pcm16_to_samples(pcm),
        };
        self.queue.lock().push(Reverse(clip));
        self.notify.notify_one();
        true
    }

    /// Abort in-flight playback, shed queued non-critical clips, and hold
    /// the worker until [`resume`](Self::resume).
    pub fn interrupt(&self) {
        self.hold.store(true, Ordering::Release);
        if let Some(sink) = self.current.lock().as_ref() {
            sink.stop();
        }
        let mut queue = self.queue.lock();
        queue.retain(|Reverse(clip)| clip.prio == PRIO_CRITICAL);
    }

    /// Release the hold taken by [`interrupt`](Self::interrupt).
    pub fn resume(&self) {
        self.hold.store(false, Ordering::Release);
        self.notify.notify_one();
    }

    /// Play a PCM16 clip on the device right now, bypassing the queue.
    /// Only used from critical paths; completes when playback ends.
    pub async fn play_immediate(&self, pcm: &[u8]) {
        self.play_samples(pcm16_to_samples(pcm)).await;
    }

    /// Play the cached alert tone for `reason` (default tone for `None`).
    pub async fn play_alert(&self, reason: Option<BlockReason>) {
        let tone = self.tones.get(reason);
        self.play_samples(tone.as_ref().clone()).await;
    }

    /// Run the queue worker until cancelled. Spawn exactly once.
    pub fn start_worker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let player = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = player.notify.notified() => {}
                }
                while !player.interrupted() {
                    let next = player.queue.lock().pop();
                    let Some(Reverse(clip)) = next else { break };
                    player.play_samples(clip.samples).await;
                }
            }
            tracing::debug!("player worker stopped");
        })
    }

    async fn play_samples(&self, samples: Vec<i16>) {
        let Some(output) = &self.output else { return };
        if samples.is_empty() {
            return;
        }
        let _gate = self.gate.lock().await;
        let sink = match rodio::Sink::try_new(output) {
            Ok(s) => Arc::new(s),
            Err(e) => {
                tracing::warn!(error = %e, "failed to open playback sink");
                return;
            }
        };
        sink.append(rodio::buffer::SamplesBuffer::new(
            1,
            self.sample_rate,
            samples,
        ));
        *self.current.lock() = Some(Arc::clone(&sink));
        let blocking_sink = Arc::clone(&sink);
        let res = tokio::task::spawn_blocking(move || blocking_sink.sleep_until_end()).await;
        if let Err(e) = res {
            tracing::warn!(error = %e, "playback task failed");
        }
        *self.current.lock() = None;
    }
}

/// Open the default output device on a dedicated thread. The thread parks
/// forever holding the (non-`Send`) stream so the handle stays valid.
fn open_output() -> Option<rodio::OutputStreamHandle> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::Builder::new()
        .name("echo-audio-out".into())
        .spawn(move || match rodio::OutputStream::try_default() {
            Ok((_stream, handle)) => {
                let _ = tx.send(Some(handle));
                loop {
                    std::thread::park();
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "output device unavailable");
                let _ = tx.send(None);
            }
        })
        .ok()?;
    rx.recv().ok().flatten()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm(n: usize) -> Vec<u8> {
        vec![0u8; n * 2]
    }

    #[test]
    fn low_clips_shed_at_backlog_threshold() {
        let player = Player::without_device(16_000, 3);
        assert!(player.enqueue(&pcm(10), PRIO_NORMAL));
        assert!(player.enqueue(&pcm(10), PRIO_NORMAL));
        // depth 2 < 3: low accepted
        assert!(player.enqueue(&pcm(10), PRIO_LOW));
        // depth 3: low shed
        assert!(!player.enqueue(&pcm(10), PRIO_LOW));
        // depth 4 after another normal: still shed
        assert!(player.enqueue(&pcm(10), PRIO_NORMAL));
        assert!(!player.enqueue(&pcm(10), PRIO_LOW));
        // normal always accepted
        assert!(player.enqueue(&pcm(10), PRIO_NORMAL));
        assert_eq!(player.depth(), 5);
    }

    #[test]
    fn interrupt_sheds_non_critical_and_holds() {
        let player = Player::without_device(16_000, 3);
        player.enqueue(&pcm(10), PRIO_NORMAL);
        player.enqueue(&pcm(10), PRIO_LOW);
        player.enqueue(&pcm(10), PRIO_CRITICAL);
        assert_eq!(player.depth(), 3);

        player.interrupt();
        assert!(player.interrupted());
        assert_eq!(player.depth(), 1, "only the critical clip survives");

        player.resume();
        assert!(!player.interrupted());
    }

    #[test]
    fn queue_orders_by_priority_then_seq() {
        let player = Player::without_device(16_000, 10);
        player.enqueue(&pcm(1), PRIO_LOW);
        player.enqueue(&pcm(2), PRIO_NORMAL);
        player.enqueue(&pcm(3), PRIO_NORMAL);
        player.enqueue(&pcm(4), PRIO_CRITICAL);

        let mut order = Vec::new();
        while let Some(Reverse(clip)) = player.queue.lock().pop() {
            order.push((clip.prio, clip.samples.len()));
        }
        assert_eq!(order, vec![(0, 4), (1, 2), (1, 3), (2, 1)]);
    }

    #[tokio::test]
    async fn no_device_playback_is_a_noop() {
        let player = Player::without_device(16_000, 3);
        assert!(!player.available());
        player.play_immediate(&pcm(100)).await;
        player.play_alert(Some(BlockReason::Question)).await;
    }

    #[tokio::test]
    async fn worker_drains_queue_without_device() {
        let player = Arc::new(Player::without_device(16_000, 3));
        let cancel = CancellationToken::new();
        let handle = player.start_worker(cancel.clone());

        player.enqueue(&pcm(10), PRIO_NORMAL);
        player.enqueue(&pcm(10), PRIO_NORMAL);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(player.depth(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
