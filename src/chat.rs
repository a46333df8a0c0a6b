use std::sync::Arc;

use crate::{
    AppResult,
    broadcast::{Broadcaster, EventKind, MessageEvent},
    locks::KeyedLocks,
    messages::{EditMessageRequest, MessagePage, MessagePipeline, MessageView, SendMessageRequest},
};

/// Message writes plus fan-out. Writes to one session are serialized with
/// their publish, so subscribers see events in commit order.
pub struct ChatService {
    pipeline: MessagePipeline,
    broadcaster: Arc<Broadcaster>,
    session_locks: KeyedLocks<i64>,
}

impl ChatService {
    pub fn new(pipeline: MessagePipeline, broadcaster: Arc<Broadcaster>) -> Self {
        Self { pipeline, broadcaster, session_locks: KeyedLocks::new() }
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub async fn send(&self, session_id: i64, sender_id: i64, request: SendMessageRequest) -> AppResult<MessageView> {
        let _guard = self.session_locks.lock(session_id).await;
        let message = self.pipeline.append_message(session_id, sender_id, request).await?;
        self.broadcaster.publish(session_id, MessageEvent::new(EventKind::Created, message.clone()));
        Ok(message)
    }

    pub async fn edit(&self, message_id: i64, editor_id: i64, request: EditMessageRequest) -> AppResult<MessageView> {
        let session_id = self.pipeline.session_of(message_id).await?;
        let _guard = self.session_locks.lock(session_id).await;
        let message = self.pipeline.edit_message(message_id, editor_id, request).await?;
        self.broadcaster.publish(session_id, MessageEvent::new(EventKind::Edited, message.clone()));
        Ok(message)
    }

    pub async fn delete(&self, message_id: i64, requester_id: i64) -> AppResult<MessageView> {
        let session_id = self.pipeline.session_of(message_id).await?;
        let _guard = self.session_locks.lock(session_id).await;
        let message = self.pipeline.delete_message(message_id, requester_id).await?;
        self.broadcaster.publish(session_id, MessageEvent::new(EventKind::Deleted, message.clone()));
        Ok(message)
    }

    pub async fn history(&self, session_id: i64, before_id: Option<i64>, size: u32) -> AppResult<MessagePage> {
        self.pipeline.page_backward(session_id, before_id, size).await
    }
}
