//! Bounded broadcast sink for inbound records.
//!
//! Every inbound record, whatever its classification, is offered to this
//! sink after the user message handler has seen it. The consumer drives it
//! with async pull ([`MessageReceiver::recv`]) or the blocking
//! [`MessageIterator`]; both are adapters over the same queue.
//!
//! Consumers that fall behind are handled by the configured
//! [`OverflowPolicy`]. The default is `Block`: the inbound worker waits,
//! which backpressures the whole inbound path.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

use crate::envelope::InboundRecord;

/// What to do when the consumer lags and the buffer is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for the consumer; backpressures the inbound worker
    #[default]
    Block,
    /// Drop the record being offered
    DropNewest,
    /// Drop the oldest buffered record to make room
    DropOldest,
}

struct SinkShared {
    queue: Mutex<VecDeque<InboundRecord>>,
    capacity: usize,
    policy: OverflowPolicy,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
}

/// Producer half, owned by the inbound worker
#[derive(Clone)]
pub struct MessageSink {
    shared: Arc<SinkShared>,
}

/// Consumer half, handed out once per session
pub struct MessageReceiver {
    shared: Arc<SinkShared>,
}

impl std::fmt::Debug for MessageReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReceiver").finish()
    }
}

/// Create a sink/receiver pair with the given capacity and policy.
pub fn channel(capacity: usize, policy: OverflowPolicy) -> (MessageSink, MessageReceiver) {
    let shared = Arc::new(SinkShared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity: capacity.max(1),
        policy,
        closed: AtomicBool::new(false),
        not_empty: Notify::new(),
        not_full: Notify::new(),
    });
    (
        MessageSink {
            shared: shared.clone(),
        },
        MessageReceiver { shared },
    )
}

impl MessageSink {
    /// Offer a record to the sink.
    ///
    /// Returns `false` when the sink is closed or the record was dropped by
    /// a non-blocking overflow policy.
    pub async fn publish(&self, record: InboundRecord) -> bool {
        loop {
            {
                let mut queue = self.shared.queue.lock().expect("sink poisoned");
                if self.shared.closed.load(Ordering::SeqCst) {
                    return false;
                }
                if queue.len() < self.shared.capacity {
                    queue.push_back(record);
                    self.shared.not_empty.notify_one();
                    return true;
                }
                match self.shared.policy {
                    OverflowPolicy::DropNewest => {
                        debug!("sink full, dropping newest record");
                        return false;
                    }
                    OverflowPolicy::DropOldest => {
                        debug!("sink full, dropping oldest record");
                        queue.pop_front();
                        queue.push_back(record);
                        self.shared.not_empty.notify_one();
                        return true;
                    }
                    OverflowPolicy::Block => {}
                }
            }
            // Block: wait for the consumer to make room, then retry
            self.shared.not_full.notified().await;
        }
    }

    /// Close the sink; pending records stay readable, then `recv` ends.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.not_empty.notify_waiters();
        self.shared.not_full.notify_waiters();
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl MessageReceiver {
    /// Receive the next record; `None` once the sink is closed and drained.
    pub async fn recv(&mut self) -> Option<InboundRecord> {
        loop {
            {
                let mut queue = self.shared.queue.lock().expect("sink poisoned");
                if let Some(record) = queue.pop_front() {
                    self.shared.not_full.notify_one();
                    return Some(record);
                }
                if self.shared.closed.load(Ordering::SeqCst) {
                    return None;
                }
            }
            self.shared.not_empty.notified().await;
        }
    }

    /// Turn this receiver into a blocking iterator.
    ///
    /// The iterator parks the calling thread on each `next()`; call it from
    /// a plain thread, never from inside the async runtime.
    pub fn into_iterator(self, handle: tokio::runtime::Handle) -> MessageIterator {
        MessageIterator {
            receiver: self,
            handle,
        }
    }
}

/// Blocking iterator adapter over the sink
pub struct MessageIterator {
    receiver: MessageReceiver,
    handle: tokio::runtime::Handle,
}

impl Iterator for MessageIterator {
    type Item = InboundRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.handle.clone().block_on(self.receiver.recv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn record(n: u64) -> InboundRecord {
        InboundRecord::Regular(json!({"type": "assistant", "n": n}))
    }

    fn record_n(r: &InboundRecord) -> u64 {
        match r {
            InboundRecord::Regular(v) => v["n"].as_u64().unwrap(),
            other => panic!("unexpected record: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_then_recv_in_order() {
        let (sink, mut rx) = channel(8, OverflowPolicy::Block);
        assert!(sink.publish(record(1)).await);
        assert!(sink.publish(record(2)).await);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 1);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_recv_ends_after_close_and_drain() {
        let (sink, mut rx) = channel(8, OverflowPolicy::Block);
        sink.publish(record(1)).await;
        sink.close();
        assert!(sink.is_closed());
        assert_eq!(record_n(&rx.recv().await.unwrap()), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_after_close_refused() {
        let (sink, _rx) = channel(8, OverflowPolicy::Block);
        sink.close();
        assert!(!sink.publish(record(1)).await);
    }

    #[tokio::test]
    async fn test_drop_newest_on_overflow() {
        let (sink, mut rx) = channel(2, OverflowPolicy::DropNewest);
        assert!(sink.publish(record(1)).await);
        assert!(sink.publish(record(2)).await);
        assert!(!sink.publish(record(3)).await);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 1);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_drop_oldest_on_overflow() {
        let (sink, mut rx) = channel(2, OverflowPolicy::DropOldest);
        assert!(sink.publish(record(1)).await);
        assert!(sink.publish(record(2)).await);
        assert!(sink.publish(record(3)).await);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 2);
        assert_eq!(record_n(&rx.recv().await.unwrap()), 3);
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_consumer() {
        let (sink, mut rx) = channel(1, OverflowPolicy::Block);
        assert!(sink.publish(record(1)).await);

        let producer = tokio::spawn({
            let sink = sink.clone();
            async move { sink.publish(record(2)).await }
        });

        // Give the producer a chance to park on the full queue
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(record_n(&rx.recv().await.unwrap()), 1);
        assert!(producer.await.unwrap());
        assert_eq!(record_n(&rx.recv().await.unwrap()), 2);
    }

    #[tokio::test]
    async fn test_close_unblocks_waiting_consumer() {
        let (sink, mut rx) = channel(1, OverflowPolicy::Block);
        let consumer = tokio::spawn(async move { rx.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        sink.close();
        assert!(consumer.await.unwrap().is_none());
    }
}
