// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Event broadcaster for canonical session events.
//!
//! Every subscriber owns an independent bounded queue. Publishing never
//! blocks: when a queue is full its oldest event is discarded and the
//! subscriber's next `recv` first yields a `Failure` event with
//! [`ErrorCode::EventsDropped`] naming how many were lost.

pub mod filter;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};
use zapline_core::{CanonicalEvent, ConnectionId, ErrorCode, EventKind, TenantId};

pub use filter::SubscriptionFilter;

/// Publish/subscribe hub. Cloneable; all clones share subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    subscribers: DashMap<u64, Arc<SubscriberQueue>>,
    next_id: AtomicU64,
    capacity: usize,
}

struct SubscriberQueue {
    filter: SubscriptionFilter,
    state: Mutex<QueueState>,
    notify: Notify,
    closed: AtomicBool,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Arc<CanonicalEvent>>,
    dropped: u64,
    /// Connection and tenant of the first event lost since the last notice.
    dropped_origin: Option<(ConnectionId, Option<TenantId>)>,
}

impl SubscriberQueue {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // A panic while holding the lock cannot leave the queue half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true when an older event had to be discarded.
    fn push(&self, event: Arc<CanonicalEvent>, capacity: usize) -> bool {
        let overflowed = {
            let mut state = self.lock();
            let overflowed = if state.events.len() >= capacity {
                if let Some(lost) = state.events.pop_front() {
                    state.dropped += 1;
                    if state.dropped_origin.is_none() {
                        state.dropped_origin =
                            Some((lost.connection_id.clone(), lost.tenant_id.clone()));
                    }
                }
                true
            } else {
                false
            };
            state.events.push_back(event);
            overflowed
        };
        self.notify.notify_one();
        overflowed
    }

    fn pop(&self) -> Option<Arc<CanonicalEvent>> {
        let mut state = self.lock();
        if state.dropped > 0 {
            let count = std::mem::take(&mut state.dropped);
            let (connection_id, tenant_id) = state
                .dropped_origin
                .take()
                .unwrap_or_else(|| (ConnectionId::from(""), None));
            return Some(Arc::new(CanonicalEvent::new(
                connection_id,
                tenant_id,
                EventKind::Failure {
                    code: ErrorCode::EventsDropped,
                    message: format!("{count} event(s) dropped: subscriber queue full"),
                },
            )));
        }
        state.events.pop_front()
    }
}

impl EventBus {
    /// Create a bus whose subscribers each buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: DashMap::new(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a subscriber for events matching `filter`.
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue {
            filter,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        self.inner.subscribers.insert(id, Arc::clone(&queue));
        debug!(subscriber_id = id, filter = ?queue.filter, "subscriber registered");
        self.report_subscribers();

        Subscription {
            cancel: CancelHandle {
                id,
                queue,
                bus: Arc::downgrade(&self.inner),
            },
        }
    }

    /// Deliver `event` to every matching subscriber without blocking.
    ///
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: CanonicalEvent) -> usize {
        let event = Arc::new(event);
        let mut delivered = 0;
        let mut dropped = 0u64;

        for entry in self.inner.subscribers.iter() {
            let queue = entry.value();
            if queue.closed.load(Ordering::Acquire) || !queue.filter.matches(&event) {
                continue;
            }
            if queue.push(Arc::clone(&event), self.inner.capacity) {
                dropped += 1;
                warn!(
                    subscriber_id = *entry.key(),
                    connection_id = %event.connection_id,
                    "subscriber queue full, dropped oldest event"
                );
            }
            delivered += 1;
        }

        #[cfg(feature = "prometheus")]
        {
            zapline_prometheus::record_event_published();
            if dropped > 0 {
                zapline_prometheus::record_events_dropped(dropped);
            }
        }
        #[cfg(not(feature = "prometheus"))]
        let _ = dropped;

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    fn report_subscribers(&self) {
        #[cfg(feature = "prometheus")]
        zapline_prometheus::set_subscribers(self.inner.subscribers.len());
    }
}

/// A registered subscriber. Dropping it cancels the subscription.
pub struct Subscription {
    cancel: CancelHandle,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once cancelled.
    pub async fn recv(&self) -> Option<Arc<CanonicalEvent>> {
        let queue = &self.cancel.queue;
        loop {
            let notified = queue.notify.notified();
            if queue.closed.load(Ordering::Acquire) {
                return None;
            }
            if let Some(event) = queue.pop() {
                return Some(event);
            }
            notified.await;
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&self) -> Option<Arc<CanonicalEvent>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.cancel.queue.pop()
    }

    pub fn filter(&self) -> &SubscriptionFilter {
        &self.cancel.queue.filter
    }

    /// A handle that can cancel this subscription from anywhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Cancels a subscription. Safe to call repeatedly and from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    id: u64,
    queue: Arc<SubscriberQueue>,
    bus: Weak<BusInner>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.queue.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
            #[cfg(feature = "prometheus")]
            zapline_prometheus::set_subscribers(bus.subscribers.len());
        }
        self.queue.notify.notify_one();
        debug!(subscriber_id = self.id, "subscriber cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.queue.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zapline_core::ConnectionStatus;

    use super::*;

    fn qr(conn: &str, payload: &str) -> CanonicalEvent {
        CanonicalEvent::new(
            ConnectionId::from(conn),
            None,
            EventKind::QrIssued {
                qr: payload.to_string(),
            },
        )
    }

    fn qr_payload(event: &CanonicalEvent) -> &str {
        match &event.kind {
            EventKind::QrIssued { qr } => qr,
            other => panic!("expected QrIssued, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delivers_to_matching_subscribers_only() {
        let bus = EventBus::new(16);
        let c1 = bus.subscribe(SubscriptionFilter::Connection(ConnectionId::from("c1")));
        let all = bus.subscribe(SubscriptionFilter::All);

        assert_eq!(bus.publish(qr("c2", "other")), 1);
        assert_eq!(bus.publish(qr("c1", "xyz")), 2);

        assert_eq!(qr_payload(&c1.recv().await.unwrap()), "xyz");
        assert!(c1.try_recv().is_none());
        assert_eq!(qr_payload(&all.recv().await.unwrap()), "other");
        assert_eq!(qr_payload(&all.recv().await.unwrap()), "xyz");
    }

    #[tokio::test]
    async fn preserves_order_per_connection() {
        let bus = EventBus::new(64);
        let sub = bus.subscribe(SubscriptionFilter::All);
        for i in 0..20 {
            bus.publish(qr("a", &format!("a{i}")));
            bus.publish(qr("b", &format!("b{i}")));
        }
        let mut a = Vec::new();
        let mut b = Vec::new();
        while let Some(event) = sub.try_recv() {
            let payload = qr_payload(&event).to_string();
            if event.connection_id.as_str() == "a" {
                a.push(payload);
            } else {
                b.push(payload);
            }
        }
        assert_eq!(a, (0..20).map(|i| format!("a{i}")).collect::<Vec<_>>());
        assert_eq!(b, (0..20).map(|i| format!("b{i}")).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_notifies_that_subscriber_only() {
        let bus = EventBus::new(2);
        let slow = bus.subscribe(SubscriptionFilter::All);
        let healthy = bus.subscribe(SubscriptionFilter::All);

        let mut seen = Vec::new();
        for i in 0..5 {
            bus.publish(qr("c1", &i.to_string()));
            seen.push(qr_payload(&healthy.recv().await.unwrap()).to_string());
        }
        assert_eq!(seen, ["0", "1", "2", "3", "4"]);

        let notice = slow.recv().await.unwrap();
        match &notice.kind {
            EventKind::Failure { code, message } => {
                assert_eq!(*code, ErrorCode::EventsDropped);
                assert!(message.starts_with("3 event(s) dropped"), "{message}");
            }
            other => panic!("expected drop notice, got {other:?}"),
        }
        assert_eq!(notice.connection_id.as_str(), "c1");
        assert_eq!(qr_payload(&slow.recv().await.unwrap()), "3");
        assert_eq!(qr_payload(&slow.recv().await.unwrap()), "4");
        assert!(healthy.try_recv().is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_publish_from_another_task() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(SubscriptionFilter::Connection(ConnectionId::from("c1")));
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(CanonicalEvent::new(
                ConnectionId::from("c1"),
                None,
                EventKind::StatusChanged {
                    status: ConnectionStatus::Connected,
                    phone_number: Some("5511".into()),
                    reason: None,
                },
            ));
        });
        let event = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("event within timeout")
            .unwrap();
        assert!(matches!(event.kind, EventKind::StatusChanged { .. }));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_unblocks_recv() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(SubscriptionFilter::All);
        let handle = sub.cancel_handle();
        assert_eq!(bus.subscriber_count(), 1);

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let h2 = handle.clone();
        let t = std::thread::spawn(move || h2.cancel());
        handle.cancel();
        t.join().unwrap();
        handle.cancel();

        assert!(waiter.await.unwrap().is_none());
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(qr("c1", "late")), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters_it() {
        let bus = EventBus::new(4);
        {
            let _sub = bus.subscribe(SubscriptionFilter::All);
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn cancel_after_bus_dropped_is_harmless() {
        let bus = EventBus::new(4);
        let sub = bus.subscribe(SubscriptionFilter::All);
        drop(bus);
        sub.cancel();
        assert!(sub.try_recv().is_none());
    }
}
