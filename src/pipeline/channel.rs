//! Bounded per-source frame channel between capture and processing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use ringbuf::traits::{Consumer, Observer, Producer, RingBuffer};
use ringbuf::HeapRb;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::capture::Frame;
use crate::error::{Error, Result};

/// What a full channel does with a new frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Producer waits for a free slot
    Block,
    /// Oldest buffered frame is discarded, push never waits
    #[default]
    DropOldest,
}

/// Outcome of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Stored,
    /// Stored after discarding the oldest frame
    ReplacedOldest,
    /// A blocked push was woken by [`FrameChannel::wake_all`] or cancelled;
    /// the frame was not admitted
    Interrupted,
}

#[derive(Default)]
struct Stats {
    frames_written: AtomicUsize,
    frames_read: AtomicUsize,
    frames_dropped: AtomicUsize,
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ChannelStats {
    pub frames_written: usize,
    pub frames_read: usize,
    pub frames_dropped: usize,
}

struct ChannelState {
    ring: HeapRb<Frame>,
    /// Bumped by `wake_all`; waiters that see it change give up
    wake_epoch: u64,
}

/// Fixed-capacity FIFO of frames. Every operation goes through one mutex;
/// consumers park on `not_empty`, blocked producers on `not_full`.
pub struct FrameChannel {
    source_id: String,
    capacity: usize,
    policy: OverflowPolicy,
    state: Mutex<ChannelState>,
    not_empty: Condvar,
    not_full: Condvar,
    stats: CachePadded<Stats>,
}

impl FrameChannel {
    pub fn new(source_id: impl Into<String>, capacity: usize, policy: OverflowPolicy) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }
        Ok(Self {
            source_id: source_id.into(),
            capacity,
            policy,
            state: Mutex::new(ChannelState {
                ring: HeapRb::new(capacity),
                wake_epoch: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Producer: admit a frame according to the channel's policy.
    pub fn push(&self, frame: Frame) -> Admission {
        self.push_inner(frame, || false)
    }

    /// Like [`push`](Self::push), but a blocked producer also gives up once
    /// `cancel` is set and the channel is woken.
    pub fn push_unless(&self, frame: Frame, cancel: &AtomicBool) -> Admission {
        self.push_inner(frame, || cancel.load(Ordering::Acquire))
    }

    fn push_inner(&self, frame: Frame, cancelled: impl Fn() -> bool) -> Admission {
        let mut state = self.state.lock();
        let admission = match self.policy {
            OverflowPolicy::DropOldest => match state.ring.push_overwrite(frame) {
                Some(dropped) => {
                    trace!("{}: dropped frame {}", self.source_id, dropped.sequence);
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("channel_frames_dropped").increment(1);
                    Admission::ReplacedOldest
                }
                None => Admission::Stored,
            },
            OverflowPolicy::Block => {
                let epoch = state.wake_epoch;
                while state.ring.is_full() {
                    if state.wake_epoch != epoch || cancelled() {
                        return Admission::Interrupted;
                    }
                    self.not_full.wait(&mut state);
                }
                match state.ring.try_push(frame) {
                    Ok(()) => Admission::Stored,
                    Err(_) => return Admission::Interrupted,
                }
            }
        };
        self.stats.frames_written.fetch_add(1, Ordering::Relaxed);
        drop(state);
        self.not_empty.notify_one();
        admission
    }

    /// Consumer: oldest frame, waiting while the channel is empty. Returns
    /// `None` when woken by [`wake_all`](Self::wake_all) with nothing to hand out.
    pub fn pop(&self) -> Option<Frame> {
        self.pop_inner(|| false)
    }

    /// Like [`pop`](Self::pop), but also returns `None` once `cancel` is set.
    /// The flag is checked under the channel lock, so setting it and then
    /// waking the channel can never be missed by a consumer about to wait.
    pub fn pop_unless(&self, cancel: &AtomicBool) -> Option<Frame> {
        self.pop_inner(|| cancel.load(Ordering::Acquire))
    }

    fn pop_inner(&self, cancelled: impl Fn() -> bool) -> Option<Frame> {
        let mut state = self.state.lock();
        let epoch = state.wake_epoch;
        loop {
            if let Some(frame) = state.ring.try_pop() {
                self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
                drop(state);
                self.not_full.notify_one();
                return Some(frame);
            }
            if state.wake_epoch != epoch || cancelled() {
                return None;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Frame> {
        let frame = self.state.lock().ring.try_pop()?;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        self.not_full.notify_one();
        Some(frame)
    }

    pub fn size(&self) -> usize {
        self.state.lock().ring.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().ring.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    /// Discard every buffered frame. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let mut cleared = 0;
        while state.ring.try_pop().is_some() {
            cleared += 1;
        }
        drop(state);
        if cleared > 0 {
            debug!("{}: cleared {cleared} buffered frames", self.source_id);
            self.not_full.notify_all();
        }
        cleared
    }

    /// Release every waiter without delivering a frame.
    pub fn wake_all(&self) {
        let mut state = self.state.lock();
        state.wake_epoch = state.wake_epoch.wrapping_add(1);
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            frames_written: self.stats.frames_written.load(Ordering::Relaxed),
            frames_read: self.stats.frames_read.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Channels of all connected sources, keyed by source identifier.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: Mutex<HashMap<String, Arc<FrameChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel for a newly connected source.
    pub fn add(
        &self,
        source_id: &str,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> Result<Arc<FrameChannel>> {
        let mut channels = self.channels.lock();
        if channels.contains_key(source_id) {
            return Err(Error::DuplicateChannel(source_id.to_string()));
        }
        let channel = Arc::new(FrameChannel::new(source_id, capacity, policy)?);
        channels.insert(source_id.to_string(), Arc::clone(&channel));
        debug!("Registered channel {source_id} (capacity {capacity}, {policy:?})");
        Ok(channel)
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<FrameChannel>> {
        self.channels.lock().get(source_id).cloned()
    }

    /// Drop a source's channel, waking anyone still parked on it.
    pub fn remove(&self, source_id: &str) -> Option<Arc<FrameChannel>> {
        let channel = self.channels.lock().remove(source_id)?;
        channel.wake_all();
        Some(channel)
    }

    /// Wake every waiter on every channel.
    pub fn wake_all(&self) {
        let channels: Vec<_> = self.channels.lock().values().cloned().collect();
        for channel in channels {
            channel.wake_all();
        }
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.channels.lock().contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}
