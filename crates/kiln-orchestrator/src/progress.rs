//! Progress notifications
//!
//! Observers are a side channel. The orchestrator never waits on their results and
//! a failing observer cannot change the outcome of a run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// One progress notification
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    /// State name, e.g. "building"; "started" for the first event of a run
    pub stage: &'static str,
    /// Current build attempt, 0 before the first build
    pub attempt: u32,
    pub max_attempts: u32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.attempt > 0 {
            write!(
                f,
                "[{} {}/{}] {}",
                self.stage, self.attempt, self.max_attempts, self.message
            )
        } else {
            write!(f, "[{}] {}", self.stage, self.message)
        }
    }
}

#[async_trait]
pub trait ProgressObserver: Send + Sync {
    async fn on_event(&self, event: &ProgressEvent);
}

/// Handle returned by `subscribe`
pub type SubscriptionId = u64;

/// Registered observers
#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(SubscriptionId, Arc<dyn ProgressObserver>)>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn ProgressObserver>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.write().await.push((id, observer));
        id
    }

    /// Returns false when `id` was not subscribed
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write().await;
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub async fn len(&self) -> usize {
        self.observers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Deliver `event` to every observer in subscription order
    pub async fn emit(&self, event: &ProgressEvent) {
        // Snapshot so no lock is held while observers run
        let observers: Vec<Arc<dyn ProgressObserver>> = self
            .observers
            .read()
            .await
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            observer.on_event(event).await;
        }
    }
}

/// Mirrors progress into the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl ProgressObserver for TracingObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        match event.stage {
            "build_failed" | "planning_failed" | "apply_failed" | "aborted" => {
                tracing::warn!(run = %event.run_id, "{}", event)
            }
            _ => tracing::info!(run = %event.run_id, "{}", event),
        }
    }
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressObserver for ChannelObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        // A dropped receiver just means nobody is listening any more
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: &'static str, attempt: u32) -> ProgressEvent {
        ProgressEvent {
            run_id: Uuid::new_v4(),
            stage,
            attempt,
            max_attempts: 3,
            message: "hello".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(event("building", 2).to_string(), "[building 2/3] hello");
        assert_eq!(event("planning", 0).to_string(), "[planning] hello");
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let registry = ObserverRegistry::new();
        let (observer, mut rx) = ChannelObserver::new();
        let id = registry.subscribe(Arc::new(observer)).await;

        registry.emit(&event("planning", 0)).await;
        assert_eq!(rx.recv().await.unwrap().stage, "planning");

        assert!(registry.unsubscribe(id).await);
        assert!(!registry.unsubscribe(id).await);
        assert!(registry.is_empty().await);

        registry.emit(&event("building", 1)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_harmless() {
        let registry = ObserverRegistry::new();
        let (observer, rx) = ChannelObserver::new();
        registry.subscribe(Arc::new(observer)).await;
        registry.subscribe(Arc::new(TracingObserver)).await;
        drop(rx);

        registry.emit(&event("done", 1)).await;
        assert_eq!(registry.len().await, 2);
    }
}
