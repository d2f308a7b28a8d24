//! Bounded message dispatcher.
//!
//! The chat-facing entry point hands each inbound message to a small fixed
//! pool of workers so the delivery callback returns immediately; all real
//! work happens off that callback's execution context. Chat-channel messages
//! pass the dedup guard first; duplicates resolve to `None` without ever
//! reaching the router.

use std::sync::Arc;

use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

use crate::dedup::MessageDeduplicator;
use crate::message::{Channel, ChannelRequest, ChannelResponse};
use crate::routing::Router;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 4;

/// Dispatches inbound messages to a bounded worker pool.
pub struct MessageDispatcher {
    router: Arc<Router>,
    dedup: Arc<MessageDeduplicator>,
    permits: Arc<Semaphore>,
}

impl MessageDispatcher {
    /// Create a dispatcher with the given number of concurrent workers.
    pub fn new(router: Arc<Router>, dedup: Arc<MessageDeduplicator>, workers: usize) -> Self {
        Self {
            router,
            dedup,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Submit a request for processing. Returns immediately with a receiver
    /// that resolves to the response, or `None` when the message was a
    /// suppressed duplicate.
    pub fn dispatch(&self, request: ChannelRequest) -> oneshot::Receiver<Option<ChannelResponse>> {
        let (tx, rx) = oneshot::channel();

        if request.channel == Channel::Chat
            && self
                .dedup
                .is_duplicate(&request.user_id, &request.input_text)
        {
            debug!(user_id = %request.user_id, "duplicate message dropped");
            let _ = tx.send(None);
            return rx;
        }

        let router = self.router.clone();
        let permits = self.permits.clone();
        let execution_id = uuid::Uuid::new_v4().to_string();

        tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            debug!(execution_id = %execution_id, user_id = %request.user_id, "worker picked up message");
            let response = router.route(&request).await;
            let _ = tx.send(Some(response));
        });

        rx
    }

    /// Number of workers currently free.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }
}
