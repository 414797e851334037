//! Per-peer change event queues.
//!
//! Responsibilities:
//! - One bounded MPMC queue per subscribed peer node id.
//! - Drop-oldest on overflow; publishing never blocks.
//! - Listener counting with a reconnect grace: a queue outlives its last
//!   subscriber and is only reclaimed by the periodic purge sweep, so a
//!   peer that reconnects within the purge interval reattaches to its
//!   buffered events.
//!
//! Concurrency model:
//! - `queues` lock guards the set of queues (add/remove).
//! - Fan-out clones the queue handles out of the lock, so publish holds the
//!   set lock only long enough to snapshot the subscriber list.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::events::ChangeEvent;

/// One peer's bounded event queue.
struct PeerQueue {
    tx: flume::Sender<ChangeEvent>,
    rx: flume::Receiver<ChangeEvent>,
    /// Number of live subscriptions draining this queue.
    listeners: AtomicUsize,
    /// Set by a sweep that found the queue idle; a queue still idle on the
    /// next sweep is removed.
    idle_marked: AtomicBool,
}

impl PeerQueue {
    fn new(depth: usize) -> Self {
        let (tx, rx) = flume::bounded(depth);
        Self {
            tx,
            rx,
            listeners: AtomicUsize::new(0),
            idle_marked: AtomicBool::new(false),
        }
    }

    /// Non-blocking enqueue; a full queue sheds its oldest event.
    fn push_drop_oldest(&self, event: ChangeEvent) {
        let mut ev = event;
        loop {
            match self.tx.try_send(ev) {
                Ok(()) => return,
                Err(flume::TrySendError::Full(back)) => {
                    // The manager holds `rx` for exactly this reason.
                    debug!("peer queue full, shedding oldest event");
                    let _ = self.rx.try_recv();
                    ev = back;
                }
                Err(flume::TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

/// Owner of every peer queue on a node.
pub struct PeerQueueManager {
    queues: RwLock<HashMap<String, Arc<PeerQueue>>>,
    depth: usize,
}

impl PeerQueueManager {
    /// Create a manager whose queues hold at most `depth` events.
    #[must_use]
    pub fn new(depth: usize) -> Self {
        assert!(depth > 0, "queue depth must be non-zero");
        Self {
            queues: RwLock::new(HashMap::new()),
            depth,
        }
    }

    /// Subscribe to `node_id`'s queue, allocating it on first subscription.
    /// Dropping the returned handle decrements the listener count but keeps
    /// the queue (and its buffered events) for the reconnect grace window.
    pub fn subscribe(&self, node_id: &str) -> QueueSubscription {
        let key = node_id.to_ascii_lowercase();
        let queue = {
            let mut queues = self.queues.write();
            Arc::clone(
                queues
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(PeerQueue::new(self.depth))),
            )
        };
        queue.listeners.fetch_add(1, Ordering::SeqCst);
        queue.idle_marked.store(false, Ordering::SeqCst);
        debug!(peer = %key, "peer subscribed to change queue");
        QueueSubscription { queue, node_id: key }
    }

    /// Fan one event out to every queue. Never blocks.
    pub fn publish_one(&self, event: &ChangeEvent) {
        let targets: Vec<Arc<PeerQueue>> = self.queues.read().values().cloned().collect();
        for queue in targets {
            queue.push_drop_oldest(event.clone());
        }
    }

    /// Fan a batch out to every queue. Never blocks. Within a single queue
    /// the batch lands in order; no ordering is promised across queues.
    pub fn publish_many(&self, events: &[ChangeEvent]) {
        if events.is_empty() {
            return;
        }
        let targets: Vec<Arc<PeerQueue>> = self.queues.read().values().cloned().collect();
        trace!(events = events.len(), queues = targets.len(), "fan-out");
        for queue in targets {
            for event in events {
                queue.push_drop_oldest(event.clone());
            }
        }
    }

    /// Two-phase idle sweep: queues with zero listeners are marked on the
    /// first pass and removed (events discarded) when still idle on the
    /// next. Call every `queue_purge_interval`.
    pub fn purge_idle(&self) {
        let mut queues = self.queues.write();
        queues.retain(|node_id, queue| {
            if queue.listeners.load(Ordering::SeqCst) > 0 {
                queue.idle_marked.store(false, Ordering::SeqCst);
                return true;
            }
            if queue.idle_marked.swap(true, Ordering::SeqCst) {
                debug!(peer = %node_id, "purging idle change queue");
                false
            } else {
                true
            }
        });
    }

    /// Number of live queues (including idle ones awaiting purge).
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.queues.read().len()
    }
}

/// Handle to one peer's queue. Multiple subscriptions (one per connection)
/// may drain the same queue; each event is delivered to exactly one of
/// them.
pub struct QueueSubscription {
    queue: Arc<PeerQueue>,
    node_id: String,
}

impl QueueSubscription {
    /// Wait for the next change event. Resolves to `None` only if the
    /// manager itself was dropped.
    pub async fn dequeue(&self) -> Option<ChangeEvent> {
        self.queue.rx.recv_async().await.ok()
    }

    /// Take an event only if one is already buffered.
    pub fn try_dequeue(&self) -> Option<ChangeEvent> {
        self.queue.rx.try_recv().ok()
    }

    /// Buffered event count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.rx.is_empty()
    }

    /// The (normalized) peer node id this subscription drains.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

impl Drop for QueueSubscription {
    fn drop(&mut self) {
        self.queue.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(depth: usize) -> Arc<PeerQueueManager> {
        Arc::new(PeerQueueManager::new(depth))
    }

    #[test]
    fn test_publish_before_subscribe_is_dropped() {
        let mgr = manager(8);
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        let sub = mgr.subscribe("peer-1");
        assert!(sub.try_dequeue().is_none());
    }

    #[test]
    fn test_fifo_within_one_queue() {
        let mgr = manager(8);
        let sub = mgr.subscribe("peer-1");
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        mgr.publish_one(&ChangeEvent::modified("bbbb"));
        assert_eq!(&*sub.try_dequeue().unwrap().current_id, "aaaa");
        assert_eq!(&*sub.try_dequeue().unwrap().current_id, "bbbb");
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mgr = manager(2);
        let sub = mgr.subscribe("peer-1");
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        mgr.publish_one(&ChangeEvent::modified("bbbb"));
        mgr.publish_one(&ChangeEvent::modified("cccc"));
        assert_eq!(&*sub.try_dequeue().unwrap().current_id, "bbbb");
        assert_eq!(&*sub.try_dequeue().unwrap().current_id, "cccc");
        assert!(sub.try_dequeue().is_none());
    }

    #[test]
    fn test_fan_out_reaches_every_peer() {
        let mgr = manager(8);
        let sub_a = mgr.subscribe("peer-a");
        let sub_b = mgr.subscribe("peer-b");
        mgr.publish_many(&[ChangeEvent::modified("aaaa"), ChangeEvent::deleted("bbbb")]);
        assert_eq!(sub_a.len(), 2);
        assert_eq!(sub_b.len(), 2);
    }

    #[test]
    fn test_event_consumed_by_exactly_one_subscription() {
        let mgr = manager(8);
        let sub_1 = mgr.subscribe("peer-a");
        let sub_2 = mgr.subscribe("peer-a");
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        let got_1 = sub_1.try_dequeue().is_some();
        let got_2 = sub_2.try_dequeue().is_some();
        assert!(got_1 ^ got_2, "one and only one subscription sees the event");
    }

    #[test]
    fn test_node_id_equality_is_case_insensitive() {
        let mgr = manager(8);
        let sub_upper = mgr.subscribe("Peer-A");
        let sub_lower = mgr.subscribe("peer-a");
        assert_eq!(mgr.queue_count(), 1);
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        assert!(sub_upper.try_dequeue().is_some() || sub_lower.try_dequeue().is_some());
    }

    #[test]
    fn test_reattach_keeps_buffered_events() {
        let mgr = manager(8);
        let sub = mgr.subscribe("peer-1");
        drop(sub);
        // Events published while no subscriber is attached stay buffered.
        mgr.publish_one(&ChangeEvent::modified("aaaa"));
        let sub = mgr.subscribe("peer-1");
        assert_eq!(&*sub.try_dequeue().unwrap().current_id, "aaaa");
    }

    #[test]
    fn test_purge_is_two_phase() {
        let mgr = manager(8);
        let sub = mgr.subscribe("peer-1");
        drop(sub);
        assert_eq!(mgr.queue_count(), 1);

        // First sweep only marks the idle queue.
        mgr.purge_idle();
        assert_eq!(mgr.queue_count(), 1);

        // Second sweep removes it.
        mgr.purge_idle();
        assert_eq!(mgr.queue_count(), 0);
    }

    #[test]
    fn test_resubscribe_clears_idle_mark() {
        let mgr = manager(8);
        drop(mgr.subscribe("peer-1"));
        mgr.purge_idle(); // marks idle

        let _sub = mgr.subscribe("peer-1"); // reattach clears the mark
        mgr.purge_idle();
        drop(_sub);
        mgr.purge_idle(); // marks again
        assert_eq!(mgr.queue_count(), 1);
        mgr.purge_idle();
        assert_eq!(mgr.queue_count(), 0);
    }

    #[tokio::test]
    async fn test_async_dequeue_wakes_on_publish() {
        let mgr = manager(8);
        let sub = mgr.subscribe("peer-1");
        let mgr_clone = Arc::clone(&mgr);
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            mgr_clone.publish_one(&ChangeEvent::deleted("aaaa"));
        });
        let ev = sub.dequeue().await.unwrap();
        assert!(ev.deleted);
        publisher.await.unwrap();
    }
}
