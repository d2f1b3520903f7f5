//! Realtime surface: a WebSocket-shaped duplex (`{action}` in / `{type}`
//! out) and an SSE-shaped one-way stream, both backed by `EventFabric`.
//! The WebSocket handler splits the socket into sender/receiver halves;
//! the SSE handler builds its body with `async_stream::stream!`.

use crate::dto::{parse_csv, RealtimeInbound, RealtimeOutbound, SseQuery};
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use portal_types::{Channel, EventFilter, UserId};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct RealtimeQuery {
    pub user_id: Option<Uuid>,
}

fn resolve_user(query_user: Option<Uuid>) -> UserId {
    query_user.map(UserId).unwrap_or_default()
}

pub async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RealtimeQuery>,
) -> Response {
    let user_id = resolve_user(query.user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let subscription = state.fabric.subscribe(user_id, Vec::new(), None);
    let subscriber_id = subscription.id;
    let mut events = subscription.receiver;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                let frame = RealtimeOutbound::Event { event };
                if send_frame(&mut sender, &frame).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        if !handle_inbound(&text, &state, subscriber_id, &mut sender).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Err(e) = state.fabric.unsubscribe(subscriber_id) {
        debug!(subscriber = %subscriber_id, error = %e, "subscriber already removed");
    }
}

async fn send_frame(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &RealtimeOutbound,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}

/// Applies one inbound frame; returns `false` when the connection should close.
async fn handle_inbound(
    raw: &str,
    state: &AppState,
    subscriber_id: Uuid,
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
) -> bool {
    let inbound: RealtimeInbound = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            let frame = RealtimeOutbound::Error { message: format!("invalid frame: {e}") };
            return send_frame(sender, &frame).await.is_ok();
        }
    };

    match inbound {
        RealtimeInbound::Subscribe { channels, event_types } => {
            let parsed: Vec<Channel> = channels.iter().filter_map(|c| Channel::parse(c)).collect();
            let filter = event_types.map(|types| EventFilter { event_types: Some(types), min_level: None, server_names: None });
            if let Err(e) = state.fabric.update_subscription(subscriber_id, parsed, filter) {
                warn!(subscriber = %subscriber_id, error = %e, "update_subscription failed");
                return false;
            }
            let frame = RealtimeOutbound::Ack { channels };
            send_frame(sender, &frame).await.is_ok()
        }
        RealtimeInbound::Unsubscribe => {
            let _ = state.fabric.update_subscription(subscriber_id, Vec::new(), None);
            let frame = RealtimeOutbound::Ack { channels: Vec::new() };
            send_frame(sender, &frame).await.is_ok()
        }
        RealtimeInbound::Ping => {
            let frame = RealtimeOutbound::Pong;
            send_frame(sender, &frame).await.is_ok()
        }
    }
}

///  SSE query params: `channels,event_types,sources,token`. `token` is
/// accepted but authentication is out of scope; it's reserved for a
/// future auth middleware to consume before this handler runs.
pub async fn sse_stream(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let channels: Vec<Channel> = parse_csv(&query.channels).iter().filter_map(|c| Channel::parse(c)).collect();
    let event_types: Option<Vec<portal_types::EventType>> = {
        let raw = parse_csv(&query.event_types);
        if raw.is_empty() {
            None
        } else {
            serde_json::from_value(serde_json::Value::Array(
                raw.into_iter().map(serde_json::Value::String).collect(),
            ))
            .ok()
        }
    };
    let sources = parse_csv(&query.sources);
    let server_names = if sources.is_empty() {
        None
    } else {
        Some(sources.into_iter().map(portal_types::ServerName::new).collect())
    };

    let filter = if event_types.is_some() || server_names.is_some() {
        Some(EventFilter { event_types, min_level: None, server_names })
    } else {
        None
    };

    let subscription = state.fabric.subscribe(UserId::default(), channels, filter);
    let mut events = subscription.receiver;

    let stream = async_stream::stream! {
        yield Ok(SseEvent::default().event("connected").data(subscription.id.to_string()));
        while let Some(event) = events.recv().await {
            let data = serde_json::to_string(&event).unwrap_or_default();
            yield Ok(SseEvent::default().event("message").data(data));
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
