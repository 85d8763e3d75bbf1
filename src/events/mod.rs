//! Event bus for observing the mission loop.
//!
//! Components publish [`Event`]s on significant transitions. Publishing never
//! waits on subscribers: events go through a `tokio::sync::broadcast`
//! channel and each subscriber drains its own receiver on a dedicated task,
//! so a slow subscriber only lags (and drops) its own backlog.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Events kept for late subscribers.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Broadcast channel capacity per subscriber.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Which component emitted the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Observation,
    Skill,
    Reasoning,
    Action,
    Reflection,
    Mission,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observation => "OBSERVATION",
            Self::Skill => "SKILL",
            Self::Reasoning => "REASONING",
            Self::Action => "ACTION",
            Self::Reflection => "REFLECTION",
            Self::Mission => "MISSION",
        }
    }
}

/// A single observable transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(event_type: EventType, content: Value) -> Self {
        Self {
            event_type,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Receives events published on the bus.
pub trait EventSubscriber: Send + Sync {
    fn handle(&self, event: &Event);
}

impl<F> EventSubscriber for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn handle(&self, event: &Event) {
        self(event)
    }
}

/// Forwards every event to `tracing`.
pub struct TracingSubscriber;

impl EventSubscriber for TracingSubscriber {
    fn handle(&self, event: &Event) {
        tracing::info!(event_type = event.event_type.as_str(), "{}", event.content);
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Process-scoped publish/subscribe hub, injected into components.
pub struct EventBus {
    sender: broadcast::Sender<Arc<Event>>,
    history: Mutex<VecDeque<Arc<Event>>>,
    history_capacity: usize,
    subscribers: Mutex<HashMap<SubscriptionId, JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber queue capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            history: Mutex::new(VecDeque::new()),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: Event) {
        let event = Arc::new(event);
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Shorthand for `publish(Event::new(..))`.
    pub fn emit(&self, event_type: EventType, content: Value) {
        self.publish(Event::new(event_type, content));
    }

    /// Register a subscriber. It runs on its own task; must be called inside a
    /// Tokio runtime.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut rx = self.sender.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => subscriber.handle(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Event subscriber lagged, dropped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, handle);
        id
    }

    /// Remove a subscriber. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
        {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Raw receiver for front ends that stream events themselves.
    pub fn receiver(&self) -> broadcast::Receiver<Arc<Event>> {
        self.sender.subscribe()
    }

    /// The most recent `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<Event>> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).cloned().collect()
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let subscribers = self.subscribers.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in subscribers.drain() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.receiver();

        bus.emit(EventType::Action, json!({"capability": "tap", "success": true}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::Action);
        assert_eq!(event.content["capability"], "tap");
    }

    #[test]
    fn test_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.emit(EventType::Mission, json!({"status": "FAILED"}));
        assert_eq!(bus.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let bus = EventBus::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let id = bus.subscribe(Arc::new(move |event: &Event| {
            sink.lock().unwrap().push(event.event_type);
        }));
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(EventType::Skill, json!({}));
        bus.emit(EventType::Reasoning, json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![EventType::Skill, EventType::Reasoning]
        );

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_subscriber_does_not_block_publisher() {
        let bus = EventBus::new(4);
        bus.subscribe(Arc::new(|_: &Event| panic!("subscriber failure")));

        for i in 0..32 {
            bus.emit(EventType::Observation, json!({ "step": i }));
        }
        assert_eq!(bus.recent(5).len(), 5);
        assert_eq!(bus.recent(5)[4].content["step"], 31);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = EventBus::new(4);
        for i in 0..(DEFAULT_HISTORY_CAPACITY + 10) {
            bus.emit(EventType::Observation, json!({ "step": i }));
        }
        let recent = bus.recent(usize::MAX);
        assert_eq!(recent.len(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(recent[0].content["step"], 10);
    }
}
