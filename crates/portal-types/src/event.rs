//! Event fabric data model.

use crate::ids::{ServerName, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServerStatusChanged,
    ServerMetrics,
    ServerLog,
    GatewayStatusChanged,
    GatewayConnection,
    SystemError,
    SystemHealth,
    BulkProgress,
    SubscriptionClosed,
}

/// A channel name. `Server(name)` renders as `server:<name>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Servers,
    Server(ServerName),
    Gateway,
    Logs,
    Metrics,
    System,
}

impl Channel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "servers" => Some(Channel::Servers),
            "gateway" => Some(Channel::Gateway),
            "logs" => Some(Channel::Logs),
            "metrics" => Some(Channel::Metrics),
            "system" => Some(Channel::System),
            other => other
                .strip_prefix("server:")
                .map(|name| Channel::Server(ServerName::new(name))),
        }
    }

    pub fn render(&self) -> String {
        match self {
            Channel::Servers => "servers".to_string(),
            Channel::Server(name) => format!("server:{name}"),
            Channel::Gateway => "gateway".to_string(),
            Channel::Logs => "logs".to_string(),
            Channel::Metrics => "metrics".to_string(),
            Channel::System => "system".to_string(),
        }
    }
}

/// Optional narrowing applied on top of channel membership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub event_types: Option<Vec<EventType>>,
    pub min_level: Option<String>,
    pub server_names: Option<Vec<ServerName>>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(names) = &self.server_names {
            if let Some(source) = &event.source {
                if !names.iter().any(|n| n.as_str() == source) {
                    return false;
                }
            }
        }
        true
    }
}

/// One real-time consumer registration.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: UserId,
    pub channels: Vec<Channel>,
    pub filter: Option<EventFilter>,
}

impl Subscription {
    pub fn matches_channel(&self, channel: &Channel) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

/// A delivered event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub event_type: EventType,
    pub channel: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub source: Option<String>,
}

impl Event {
    pub fn new(event_type: EventType, channel: &Channel, data: Value, source: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type,
            channel: channel.render(),
            data,
            timestamp: Utc::now(),
            source,
        }
    }
}
