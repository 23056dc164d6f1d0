//! Channel latch: last-value-wins sample slots shared with the event source.
//!
//! The counting unit reports one count per channel per detection window from
//! its own thread. The acquisition loop only ever wants the most recent value,
//! so each channel has a single slot that a new sample overwrites. Taking a
//! set of channels happens under one lock, so a `take_all` never mixes a value
//! consumed by a previous call with a fresh one.

use crate::error::{AppResult, DaqError};
use crate::experiment::Channel;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

/// One count value.
pub type Sample = i64;

/// Notification from the counting unit.
#[derive(Debug, Clone, PartialEq)]
pub struct CountEvent {
    /// Hardware data channel id
    pub channel: i32,
    /// Number of values carried
    pub count: i32,
    /// Sequence index assigned by the device
    pub index: i32,
    /// Count values, first one is the current window
    pub values: Vec<Sample>,
}

impl CountEvent {
    /// Event carrying a single value.
    pub fn single(channel: Channel, index: i32, value: Sample) -> Self {
        Self {
            channel: channel.hardware_id(),
            count: 1,
            index,
            values: vec![value],
        }
    }
}

/// Per-channel single-slot sample store.
#[derive(Debug)]
pub struct ChannelLatch {
    slots: Mutex<HashMap<Channel, Sample>>,
    accepted: HashSet<Channel>,
    published: Notify,
    poll_interval: Duration,
}

impl ChannelLatch {
    /// Latch accepting samples for `channels`.
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            accepted: channels.into_iter().collect(),
            published: Notify::new(),
            poll_interval: Duration::from_millis(10),
        }
    }

    /// Longest sleep between re-checks while waiting in [`take_all`](Self::take_all).
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Channel, Sample>> {
        // A panic while holding the lock cannot leave a slot half-written.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `channel` is one this latch stores.
    pub fn accepts(&self, channel: Channel) -> bool {
        self.accepted.contains(&channel)
    }

    /// Overwrite the slot for `channel`.
    ///
    /// Returns `false` and drops the value when the channel is not configured.
    pub fn publish(&self, channel: Channel, value: Sample) -> bool {
        if !self.accepts(channel) {
            return false;
        }
        self.slots().insert(channel, value);
        self.published.notify_waiters();
        true
    }

    /// Binding point for the event source.
    ///
    /// Events without a value, or for channels outside the configured set,
    /// are ignored.
    pub fn on_event(&self, event: &CountEvent) -> bool {
        if event.count < 1 {
            trace!(channel = event.channel, count = event.count, "Dropping empty event");
            return false;
        }
        let Some(&value) = event.values.first() else {
            return false;
        };
        match Channel::from_hardware_id(event.channel) {
            Some(channel) => self.publish(channel, value),
            None => false,
        }
    }

    /// Take the current value of `channel`, leaving the slot empty.
    pub fn take(&self, channel: Channel) -> Option<Sample> {
        self.slots().remove(&channel)
    }

    /// Take all of `channels` at once if every slot is filled.
    ///
    /// Values are returned in the order of `channels`. Nothing is taken when
    /// any slot is empty.
    pub fn try_take_all(&self, channels: &[Channel]) -> Option<Vec<Sample>> {
        let mut slots = self.slots();
        if !channels.iter().all(|c| slots.contains_key(c)) {
            return None;
        }
        channels.iter().map(|c| slots.remove(c)).collect()
    }

    /// Wait until every channel holds a sample, then take them together.
    ///
    /// Waits at most `max_wait`; on expiry nothing is taken and
    /// [`DaqError::LatchTimeout`] names the channels still empty.
    pub async fn take_all(&self, channels: &[Channel], max_wait: Duration) -> AppResult<Vec<Sample>> {
        let start = Instant::now();
        let deadline = start + max_wait;
        loop {
            // Register interest before checking so a publish in between still wakes us.
            let published = self.published.notified();
            if let Some(values) = self.try_take_all(channels) {
                return Ok(values);
            }

            let now = Instant::now();
            if now >= deadline {
                let slots = self.slots();
                let missing: Vec<&str> = channels
                    .iter()
                    .filter(|c| !slots.contains_key(c))
                    .map(|c| c.name())
                    .collect();
                debug!(missing = ?missing, "Latch wait expired");
                return Err(DaqError::LatchTimeout {
                    channels: missing.join(", "),
                    waited: now - start,
                });
            }

            let wait = self.poll_interval.min(deadline - now);
            let _ = tokio::time::timeout(wait, published).await;
        }
    }

    /// Drop every pending sample.
    pub fn clear(&self) {
        self.slots().clear();
    }
}
