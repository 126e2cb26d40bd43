//! Message channel to the companion device
//!
//! The channel owns delivery: queued messages are stored and forwarded when
//! the companion becomes reachable, at least once and possibly reordered.
//! The coordinator sends each message once and never retries.

use super::messages::SyncMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Transient path only; queued paths never report this
    #[error("Companion device unreachable")]
    Unreachable,

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Channel closed")]
    Closed,
}

#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Store-and-forward queue for small structured messages
    async fn enqueue(&self, message: &SyncMessage) -> Result<(), ChannelError>;

    /// Fire-and-forget low-latency path; dropped when unreachable
    async fn send_transient(&self, message: &SyncMessage) -> Result<(), ChannelError>;

    /// Store-and-forward transfer for large payloads
    async fn transfer(&self, message: &SyncMessage) -> Result<(), ChannelError>;
}

/// In-process channel end, paired with another via [`LoopbackChannel::pair`]
pub struct LoopbackChannel {
    peer: mpsc::Sender<Vec<u8>>,
    reachable: AtomicBool,
    queued: Mutex<VecDeque<Vec<u8>>>,
}

impl LoopbackChannel {
    /// Two connected ends, each with the receiver for its inbound payloads
    pub fn pair(
        capacity: usize,
    ) -> ((LoopbackChannel, mpsc::Receiver<Vec<u8>>), (LoopbackChannel, mpsc::Receiver<Vec<u8>>)) {
        let (a_out, b_in) = mpsc::channel(capacity.max(1));
        let (b_out, a_in) = mpsc::channel(capacity.max(1));
        ((Self::new(a_out), a_in), (Self::new(b_out), b_in))
    }

    fn new(peer: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            peer,
            reachable: AtomicBool::new(true),
            queued: Mutex::new(VecDeque::new()),
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    /// Toggle reachability; becoming reachable flushes the queue
    pub async fn set_reachable(&self, reachable: bool) -> Result<(), ChannelError> {
        self.reachable.store(reachable, Ordering::SeqCst);
        if reachable {
            let mut queued = self.queued.lock().await;
            while let Some(payload) = queued.pop_front() {
                self.peer.send(payload).await.map_err(|_| ChannelError::Closed)?;
            }
        }
        Ok(())
    }

    /// Messages waiting for the companion
    pub async fn queued_len(&self) -> usize {
        self.queued.lock().await.len()
    }

    async fn store_and_forward(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        let payload = message.to_payload()?;
        // Held across send so flushes and new messages keep their order
        let mut queued = self.queued.lock().await;
        if self.is_reachable() && queued.is_empty() {
            self.peer.send(payload).await.map_err(|_| ChannelError::Closed)
        } else {
            debug!(memory_id = message.memory_id(), "Companion unreachable, message queued");
            queued.push_back(payload);
            Ok(())
        }
    }
}

#[async_trait]
impl MessageChannel for LoopbackChannel {
    async fn enqueue(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        self.store_and_forward(message).await
    }

    async fn send_transient(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        if !self.is_reachable() {
            return Err(ChannelError::Unreachable);
        }
        let payload = message.to_payload()?;
        self.peer.send(payload).await.map_err(|_| ChannelError::Closed)
    }

    async fn transfer(&self, message: &SyncMessage) -> Result<(), ChannelError> {
        self.store_and_forward(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delete(id: &str) -> SyncMessage {
        SyncMessage::Delete {
            memory_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_pair_delivers_both_ways() {
        let ((a, mut a_rx), (b, mut b_rx)) = LoopbackChannel::pair(8);

        a.enqueue(&delete("to-b")).await.unwrap();
        b.enqueue(&delete("to-a")).await.unwrap();

        let at_b = SyncMessage::from_payload(&b_rx.recv().await.unwrap()).unwrap();
        let at_a = SyncMessage::from_payload(&a_rx.recv().await.unwrap()).unwrap();
        assert_eq!(at_b.memory_id(), "to-b");
        assert_eq!(at_a.memory_id(), "to-a");
    }

    #[tokio::test]
    async fn test_queue_flushes_when_reachable() {
        let ((a, _a_rx), (_b, mut b_rx)) = LoopbackChannel::pair(8);
        a.set_reachable(false).await.unwrap();

        a.enqueue(&delete("one")).await.unwrap();
        a.transfer(&delete("two")).await.unwrap();
        assert_eq!(a.queued_len().await, 2);
        assert!(b_rx.try_recv().is_err());

        a.set_reachable(true).await.unwrap();
        let first = SyncMessage::from_payload(&b_rx.recv().await.unwrap()).unwrap();
        let second = SyncMessage::from_payload(&b_rx.recv().await.unwrap()).unwrap();
        assert_eq!(first.memory_id(), "one");
        assert_eq!(second.memory_id(), "two");
        assert_eq!(a.queued_len().await, 0);
    }

    #[tokio::test]
    async fn test_transient_fails_when_unreachable() {
        let ((a, _a_rx), (_b, mut b_rx)) = LoopbackChannel::pair(8);
        a.set_reachable(false).await.unwrap();

        let message = SyncMessage::PlaybackRequest {
            memory_id: "m".to_string(),
        };
        assert!(matches!(a.send_transient(&message).await, Err(ChannelError::Unreachable)));
        assert_eq!(a.queued_len().await, 0);
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_peer() {
        let ((a, _a_rx), (_b, b_rx)) = LoopbackChannel::pair(8);
        drop(b_rx);
        assert!(matches!(a.enqueue(&delete("x")).await, Err(ChannelError::Closed)));
    }
}
