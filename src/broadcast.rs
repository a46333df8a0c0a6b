use std::{collections::HashMap, sync::{Arc, Mutex}};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::messages::MessageView;

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    #[serde(rename = "message.created")]
    Created,
    #[serde(rename = "message.edited")]
    Edited,
    #[serde(rename = "message.deleted")]
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub kind: EventKind,
    pub topic: String,
    pub message: MessageView,
}

impl MessageEvent {
    pub fn new(kind: EventKind, message: MessageView) -> Self {
        MessageEvent { kind, topic: topic(message.session_id), message }
    }
}

pub fn topic(session_id: i64) -> String {
    format!("topic/session/{session_id}")
}

/// Per-session fan-out. A topic exists while someone is subscribed to it.
pub struct Broadcaster {
    topics: Mutex<HashMap<i64, broadcast::Sender<Arc<MessageEvent>>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self { topics: Mutex::new(HashMap::new()) }
    }

    pub fn subscribe(&self, session_id: i64) -> broadcast::Receiver<Arc<MessageEvent>> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Returns how many subscribers the event reached.
    pub fn publish(&self, session_id: i64, event: MessageEvent) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = topics.get(&session_id) else {
            return 0;
        };

        match tx.send(Arc::new(event)) {
            Ok(recipients) => {
                debug!(session_id, recipients, "message event published");
                recipients
            }
            Err(_) => {
                topics.remove(&session_id);
                0
            }
        }
    }

    /// Drops the topic once its last subscriber is gone.
    pub fn release(&self, session_id: i64) {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        if topics.get(&session_id).is_some_and(|tx| tx.receiver_count() == 0) {
            topics.remove(&session_id);
        }
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
