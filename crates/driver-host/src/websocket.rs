//! WebSocket handler streaming fired flow triggers

use axum::extract::ws::{Message, WebSocket};
use driver_core::trigger_matches;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};

use crate::host::FlowEvent;
use crate::AppState;

/// WebSocket events sent to clients
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsEvent<'a> {
    Connected,
    Trigger {
        #[serde(flatten)]
        event: &'a FlowEvent,
    },
    Subscribed {
        card: &'a str,
    },
    Error {
        message: String,
    },
}

/// Commands accepted from clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsCommand {
    /// Only forward `card` firings whose state matches `args`
    Subscribe {
        card: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Forward everything again
    Unsubscribe,
}

/// Per-connection trigger filter
#[derive(Debug, Default)]
pub struct Subscription {
    filter: Option<(String, serde_json::Value)>,
}

impl Subscription {
    pub fn apply(&mut self, command: WsCommand) {
        self.filter = match command {
            WsCommand::Subscribe { card, args } => Some((card, args)),
            WsCommand::Unsubscribe => None,
        };
    }

    /// Should `event` be forwarded?
    pub fn accepts(&self, event: &FlowEvent) -> bool {
        let Some((card, args)) = &self.filter else {
            return true;
        };
        if *card != event.trigger.card {
            return false;
        }
        match trigger_matches(args, &event.trigger) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::debug!("Subscription args rejected for {}: {}", card, e);
                false
            }
        }
    }
}

fn encode(event: &WsEvent<'_>) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            tracing::warn!("Failed to encode websocket event: {}", e);
            None
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let Some(connected) = encode(&WsEvent::Connected) else {
        return;
    };
    if sender.send(connected).await.is_err() {
        return;
    }

    let sender = Arc::new(tokio::sync::Mutex::new(sender));
    let subscription = Arc::new(Mutex::new(Subscription::default()));

    // Forward fired triggers that pass the subscription filter
    let mut event_rx = state.registry.subscribe();
    let forward_sender = sender.clone();
    let forward_subscription = subscription.clone();
    let send_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event) => {
                    let accepted = forward_subscription
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .accepts(&event);
                    if !accepted {
                        continue;
                    }
                    let Some(message) = encode(&WsEvent::Trigger { event: &event }) else {
                        continue;
                    };
                    if forward_sender.lock().await.send(message).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("WebSocket client lagged, skipped {} triggers", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let reply = match serde_json::from_str::<WsCommand>(&text) {
                    Ok(command) => {
                        let ack = match &command {
                            WsCommand::Subscribe { card, .. } => card.clone(),
                            WsCommand::Unsubscribe => String::new(),
                        };
                        subscription
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .apply(command);
                        encode(&WsEvent::Subscribed { card: &ack })
                    }
                    Err(e) => encode(&WsEvent::Error {
                        message: e.to_string(),
                    }),
                };
                if let Some(reply) = reply {
                    if sender.lock().await.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
}
