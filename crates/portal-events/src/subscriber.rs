//! One real-time consumer registration and its backpressure bookkeeping
//!.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use portal_types::{Channel, Event, EventFilter, UserId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default bounded outbound channel capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;
/// Default eviction threshold.
pub const DEFAULT_MAX_DROPS: u32 = 256;
/// Window over which drops accumulate before the counter resets; the source
/// doesn't pin an exact value, so this follows the same order of magnitude
/// as the eviction threshold's example scenario.
const DROP_WINDOW: Duration = Duration::from_secs(300);

/// A live EventFabric subscriber: owns the sender half of a bounded channel,
/// the channel/filter membership, and the rolling drop counter that decides
/// eviction.
pub struct SubscriberHandle {
    pub id: Uuid,
    pub user_id: UserId,
    channels: Mutex<Vec<Channel>>,
    filter: Mutex<Option<EventFilter>>,
    tx: mpsc::Sender<Event>,
    max_drops: u32,
    drop_count: AtomicU32,
    window_start: Mutex<Instant>,
    pub connected_at: DateTime<Utc>,
}

pub enum SendOutcome {
    Delivered,
    /// Dropped for this subscriber only; `evict` is true if the rolling drop
    /// count just crossed `max_drops` and the caller should tear this
    /// subscriber down.
    Dropped { evict: bool },
}

impl SubscriberHandle {
    pub fn new(
        user_id: UserId,
        channels: Vec<Channel>,
        filter: Option<EventFilter>,
        buffer_capacity: usize,
        max_drops: u32,
    ) -> (std::sync::Arc<Self>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_capacity.max(1));
        let handle = std::sync::Arc::new(Self {
            id: Uuid::new_v4(),
            user_id,
            channels: Mutex::new(channels),
            filter: Mutex::new(filter),
            tx,
            max_drops,
            drop_count: AtomicU32::new(0),
            window_start: Mutex::new(Instant::now()),
            connected_at: Utc::now(),
        });
        (handle, rx)
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.channels.lock().clone()
    }

    pub fn subscribes_to(&self, channel: &Channel) -> bool {
        self.channels.lock().iter().any(|c| c == channel)
    }

    pub fn matches_filter(&self, event: &Event) -> bool {
        match &*self.filter.lock() {
            Some(f) => f.matches(event),
            None => true,
        }
    }

    pub fn update_channels(&self, channels: Vec<Channel>) {
        *self.channels.lock() = channels;
    }

    pub fn update_filter(&self, filter: Option<EventFilter>) {
        *self.filter.lock() = filter;
    }

    /// Non-blocking delivery attempt: the per-subscriber outbound channel
    /// send is always via `try_send`, never blocking.
    pub fn try_deliver(&self, event: Event) -> SendOutcome {
        match self.tx.try_send(event) {
            Ok(()) => SendOutcome::Delivered,
            Err(_) => SendOutcome::Dropped {
                evict: self.record_drop(),
            },
        }
    }

    /// Records a drop within the rolling window; returns `true` once the
    /// window's drop count exceeds `max_drops`.
    fn record_drop(&self) -> bool {
        let mut window_start = self.window_start.lock();
        if window_start.elapsed() > DROP_WINDOW {
            *window_start = Instant::now();
            self.drop_count.store(0, Ordering::SeqCst);
        }
        let count = self.drop_count.fetch_add(1, Ordering::SeqCst) + 1;
        count > self.max_drops
    }

    /// Best-effort terminal send; ignored if the channel is already gone.
    pub fn try_send_terminal(&self, event: Event) {
        let _ = self.tx.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::EventType;
    use serde_json::json;

    #[test]
    fn drops_increment_and_cross_threshold() {
        let (handle, mut rx) = SubscriberHandle::new(UserId::new(), vec![Channel::System], None, 1, 2);
        // First delivery succeeds and fills the buffer of size 1.
        let make_event = || Event::new(EventType::SystemHealth, &Channel::System, json!({}), None);
        assert!(matches!(handle.try_deliver(make_event()), SendOutcome::Delivered));
        // Buffer full now: subsequent sends drop.
        assert!(matches!(
            handle.try_deliver(make_event()),
            SendOutcome::Dropped { evict: false }
        ));
        assert!(matches!(
            handle.try_deliver(make_event()),
            SendOutcome::Dropped { evict: false }
        ));
        let outcome = handle.try_deliver(make_event());
        assert!(matches!(outcome, SendOutcome::Dropped { evict: true }));
        drop(rx.try_recv());
    }
}
