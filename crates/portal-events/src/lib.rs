//! Transport-abstracted delivery of state/progress/log events to many
//! subscribers.
//!
//! The `{id -> subscriber}` map plus `{channel -> set<id>}` back-reference
//! index are both kept behind `DashMap`s rather than one coarse
//! `RwLock<HashMap<..>>`, so unrelated subscribers never contend on the
//! same lock.

pub mod error;
pub mod subscriber;
pub mod transport;

pub use error::{EventFabricError, EventFabricResult};
pub use subscriber::{SubscriberHandle, DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_DROPS};
pub use transport::{
    ConnectionLifecycle, HeartbeatMonitor, OriginPolicy, Transport, TransportLogger,
    TransportMetrics, TracingTransportLogger,
};

use dashmap::{DashMap, DashSet};
use portal_types::{Channel, Event, EventFilter, EventType, UserId};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// One accepted subscription: the caller-facing handle plus the receiver
/// half of the subscriber's bounded outbound channel.
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<Event>,
}

/// EventFabric: in-memory pub/sub fan-out with per-subscriber
/// backpressure and eviction.
pub struct EventFabric {
    subscribers: DashMap<Uuid, Arc<SubscriberHandle>>,
    channel_index: DashMap<String, DashSet<Uuid>>,
    buffer_capacity: usize,
    max_drops: u32,
    pub metrics: Arc<TransportMetrics>,
}

impl Default for EventFabric {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_MAX_DROPS)
    }
}

impl EventFabric {
    pub fn new(buffer_capacity: usize, max_drops: u32) -> Self {
        Self {
            subscribers: DashMap::new(),
            channel_index: DashMap::new(),
            buffer_capacity,
            max_drops,
            metrics: Arc::new(TransportMetrics::default()),
        }
    }

    fn index_subscriber(&self, id: Uuid, channels: &[Channel]) {
        for channel in channels {
            self.channel_index
                .entry(channel.render())
                .or_insert_with(DashSet::new)
                .insert(id);
        }
    }

    fn deindex_subscriber(&self, id: Uuid, channels: &[Channel]) {
        for channel in channels {
            if let Some(set) = self.channel_index.get(&channel.render()) {
                set.remove(&id);
            }
        }
    }

    /// Registers a new subscriber.
    #[instrument(skip(self, filter))]
    pub fn subscribe(
        &self,
        user_id: UserId,
        channels: Vec<Channel>,
        filter: Option<EventFilter>,
    ) -> Subscription {
        let (handle, receiver) = SubscriberHandle::new(
            user_id,
            channels.clone(),
            filter,
            self.buffer_capacity,
            self.max_drops,
        );
        let id = handle.id;
        self.index_subscriber(id, &channels);
        self.subscribers.insert(id, handle);
        debug!(subscriber = %id, channels = channels.len(), "subscribed");
        Subscription { id, receiver }
    }

    /// Removes a subscriber and closes its outbound channel by dropping the
    /// sender: subscribe then unsubscribe closes the outbound channel and
    /// removes the subscriber.
    pub fn unsubscribe(&self, id: Uuid) -> EventFabricResult<()> {
        match self.subscribers.remove(&id) {
            Some((_, handle)) => {
                self.deindex_subscriber(id, &handle.channels());
                Ok(())
            }
            None => Err(EventFabricError::SubscriptionNotFound(id)),
        }
    }

    /// Fans an event out to every subscriber whose channel membership and
    /// filter match. Delivery is per-subscriber best-effort:
    /// a full outbound buffer drops the event for that subscriber only and
    /// may trigger eviction.
    pub fn publish(&self, event: Event) {
        let Some(ids) = self.channel_index.get(&event.channel) else {
            return;
        };
        let ids: Vec<Uuid> = ids.iter().map(|e| *e).collect();
        let mut to_evict = Vec::new();

        for id in ids {
            let Some(handle) = self.subscribers.get(&id) else {
                continue;
            };
            if !handle.matches_filter(&event) {
                continue;
            }
            match handle.try_deliver(event.clone()) {
                subscriber::SendOutcome::Delivered => {}
                subscriber::SendOutcome::Dropped { evict } => {
                    self.metrics.record_buffer_overflow();
                    if evict {
                        to_evict.push(id);
                    }
                }
            }
        }

        for id in to_evict {
            self.evict(id);
        }
    }

    /// Convenience for publishing to a single channel.
    pub fn broadcast(&self, channel: &Channel, event_type: EventType, data: serde_json::Value, source: Option<String>) {
        self.publish(Event::new(event_type, channel, data, source));
    }

    /// Evicts a subscriber that crossed `max_drops` within the rolling
    /// window, sending a terminal `subscription_closed` event first.
    fn evict(&self, id: Uuid) {
        if let Some((_, handle)) = self.subscribers.remove(&id) {
            warn!(subscriber = %id, "evicting subscriber: drop threshold exceeded");
            handle.try_send_terminal(Event::new(
                EventType::SubscriptionClosed,
                &Channel::System,
                json!({"reason": "buffer_overflow", "subscriber_id": id.to_string()}),
                Some("event_fabric".to_string()),
            ));
            self.deindex_subscriber(id, &handle.channels());
            self.metrics.record_disconnection();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn update_subscription(&self, id: Uuid, channels: Vec<Channel>, filter: Option<EventFilter>) -> EventFabricResult<()> {
        let handle = self
            .subscribers
            .get(&id)
            .ok_or(EventFabricError::SubscriptionNotFound(id))?;
        self.deindex_subscriber(id, &handle.channels());
        handle.update_channels(channels.clone());
        handle.update_filter(filter);
        self.index_subscriber(id, &channels);
        Ok(())
    }

    /// One line operational log distinct from any protocol stream; used by
    /// transports that don't own their own per-connection logger.
    pub fn log_operational(&self, message: &str) {
        info!(target: "portal::transport", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_types::ServerName;
    use serde_json::json;

    fn sample_event(channel: &Channel) -> Event {
        Event::new(EventType::ServerStatusChanged, channel, json!({"status": "Running"}), Some("alpha".into()))
    }

    #[test]
    fn publish_delivers_only_to_matching_channel_subscribers() {
        let fabric = EventFabric::default();
        let sub_a = fabric.subscribe(UserId::new(), vec![Channel::Servers], None);
        let sub_b = fabric.subscribe(UserId::new(), vec![Channel::Gateway], None);
        fabric.publish(sample_event(&Channel::Servers));

        let mut rx_a = sub_a.receiver;
        let mut rx_b = sub_b.receiver;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_removes_from_index_and_closes_channel() {
        let fabric = EventFabric::default();
        let sub = fabric.subscribe(UserId::new(), vec![Channel::System], None);
        fabric.unsubscribe(sub.id).unwrap();
        let mut rx = sub.receiver;
        fabric.publish(Event::new(EventType::SystemHealth, &Channel::System, json!({}), None));
        // Closed: recv returns Disconnected once the sender is dropped.
        assert!(rx.try_recv().is_err());
        assert_eq!(fabric.subscriber_count(), 0);
    }

    #[test]
    fn slow_consumer_is_evicted_without_affecting_others() {
        let fabric = EventFabric::new(1, 2);
        let slow = fabric.subscribe(UserId::new(), vec![Channel::Servers], None);
        let fast = fabric.subscribe(UserId::new(), vec![Channel::Servers], None);
        let mut fast_rx = fast.receiver;

        // `fast` drains after every publish, so its buffer never fills;
        // `slow` never drains and accumulates drops past max_drops.
        let mut received = 0;
        for _ in 0..5 {
            fabric.publish(sample_event(&Channel::Servers));
            while fast_rx.try_recv().is_ok() {
                received += 1;
            }
        }

        assert_eq!(fabric.subscriber_count(), 1);
        assert!(received > 0);
        drop(slow.receiver);
    }

    #[test]
    fn filter_narrows_delivery_by_server_name() {
        let fabric = EventFabric::default();
        let filter = EventFilter {
            event_types: None,
            min_level: None,
            server_names: Some(vec![ServerName::new("alpha")]),
        };
        let sub = fabric.subscribe(UserId::new(), vec![Channel::Servers], Some(filter));
        fabric.publish(Event::new(
            EventType::ServerStatusChanged,
            &Channel::Servers,
            json!({}),
            Some("beta".into()),
        ));
        let mut rx = sub.receiver;
        assert!(rx.try_recv().is_err());
        fabric.publish(sample_event(&Channel::Servers));
        assert!(rx.try_recv().is_ok());
    }
}
