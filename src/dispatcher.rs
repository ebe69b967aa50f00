//! Heart-rate packet dispatch
//!
//! The HR protocol collaborator parses and validates packets on its own
//! thread and hands each [`HrSample`] to [`HrDispatcher::dispatch`]. The
//! dispatcher stores it in the latest-HR slot and republishes it to every
//! registered observer and channel subscriber.

use crate::types::HrSample;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Callback invoked for every dispatched sample
pub type HrObserver = Box<dyn Fn(&HrSample) + Send + Sync>;

/// Contents of the latest-HR slot
#[derive(Debug, Clone, Copy)]
pub struct LatestHr {
    pub sample: HrSample,
    pub received_at: Instant,
}

/// Fan-out point for validated HR samples
#[derive(Default)]
pub struct HrDispatcher {
    latest: RwLock<Option<LatestHr>>,
    observers: RwLock<Vec<HrObserver>>,
    channels: Mutex<Vec<Sender<HrSample>>>,
    packets: AtomicU64,
    channel_drops: AtomicU64,
}

impl HrDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. Observers run on the delivering thread and must
    /// not register further observers from inside the callback.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&HrSample) + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(observer));
    }

    /// Register a bounded channel subscriber.
    ///
    /// A subscriber that falls `capacity` samples behind misses newer
    /// samples rather than stalling delivery.
    pub fn subscribe_channel(&self, capacity: usize) -> Receiver<HrSample> {
        let (tx, rx) = bounded(capacity.max(1));
        self.channels.lock().push(tx);
        rx
    }

    /// Publish one sample from the protocol collaborator
    pub fn dispatch(&self, sample: HrSample) {
        *self.latest.write() = Some(LatestHr {
            sample,
            received_at: Instant::now(),
        });
        let count = self.packets.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            "HR packet #{}: {} bpm, speed {}",
            count, sample.heart_rate, sample.instant_speed
        );

        for observer in self.observers.read().iter() {
            observer(&sample);
        }

        self.channels.lock().retain(|tx| match tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.channel_drops.fetch_add(1, Ordering::Relaxed);
                warn!("HR subscriber is lagging; sample dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    /// Latest sample, if any has arrived
    pub fn latest(&self) -> Option<HrSample> {
        self.latest.read().map(|l| l.sample)
    }

    /// Latest heart rate, if any packet has arrived
    pub fn latest_heart_rate(&self) -> Option<f32> {
        self.latest().map(|s| s.heart_rate)
    }

    /// Time since the last packet, if any has arrived
    pub fn age(&self) -> Option<Duration> {
        self.latest.read().map(|l| l.received_at.elapsed())
    }

    /// Whether HR should be flagged stale under `threshold`.
    ///
    /// With no threshold HR is never stale and the last value is used
    /// indefinitely.
    pub fn is_stale(&self, threshold: Option<Duration>) -> bool {
        match threshold {
            None => false,
            Some(limit) => self.age().map_or(true, |age| age > limit),
        }
    }

    /// Number of packets dispatched so far
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Samples dropped because a channel subscriber was full
    pub fn channel_drops(&self) -> u64 {
        self.channel_drops.load(Ordering::Relaxed)
    }
}
