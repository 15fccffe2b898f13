use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::BookingOutcome;

pub type OutcomeReceiver = broadcast::Receiver<Arc<BookingOutcome>>;

/// Receives every booking outcome after the ledger has committed.
///
/// Errors are logged and dropped. An observer never sees outcomes it was
/// registered too late for.
#[async_trait]
pub trait BookingObserver: Send + Sync {
    async fn on_outcome(&self, outcome: &BookingOutcome) -> anyhow::Result<()>;
}

/// Fans outcomes out to registered observers and stream subscribers.
///
/// Each observer gets its own delivery task and a queue of `buffer`
/// outcomes. A slow or failing observer holds up nobody but itself; once its
/// queue is full, further outcomes for it are dropped.
pub struct BookingNotifier {
    observers: RwLock<HashMap<Uuid, mpsc::Sender<Arc<BookingOutcome>>>>,
    stream: broadcast::Sender<Arc<BookingOutcome>>,
    buffer: usize,
}

impl BookingNotifier {
    pub fn new(buffer: usize) -> Self {
        let buffer = buffer.max(1);
        let (stream, _) = broadcast::channel(buffer);

        Self {
            observers: RwLock::new(HashMap::new()),
            stream,
            buffer,
        }
    }

    pub async fn register(&self, observer: Arc<dyn BookingObserver>) -> Uuid {
        let observer_id = Uuid::new_v4();
        let (sender, mut receiver) = mpsc::channel::<Arc<BookingOutcome>>(self.buffer);

        tokio::spawn(async move {
            while let Some(outcome) = receiver.recv().await {
                if let Err(e) = observer.on_outcome(&outcome).await {
                    warn!(
                        "Observer {} failed on outcome for ledger {}: {}",
                        observer_id,
                        outcome.ledger_key(),
                        e
                    );
                }
            }
            debug!("Observer {} delivery task stopped", observer_id);
        });

        self.observers.write().await.insert(observer_id, sender);
        info!("Registered booking observer {}", observer_id);
        observer_id
    }

    /// Returns whether the observer was registered.
    pub async fn deregister(&self, observer_id: Uuid) -> bool {
        let removed = self.observers.write().await.remove(&observer_id).is_some();
        if removed {
            info!("Deregistered booking observer {}", observer_id);
        }
        removed
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.read().await.len()
    }

    pub fn subscribe(&self) -> OutcomeReceiver {
        self.stream.subscribe()
    }

    pub async fn publish(&self, outcome: BookingOutcome) {
        let outcome = Arc::new(outcome);

        {
            let observers = self.observers.read().await;
            for (observer_id, sender) in observers.iter() {
                match sender.try_send(Arc::clone(&outcome)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            "Observer {} is {} outcomes behind, dropping outcome for ledger {}",
                            observer_id,
                            self.buffer,
                            outcome.ledger_key()
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!("Observer {} is no longer receiving outcomes", observer_id);
                    }
                }
            }
        }

        // No subscribers is not an error
        let _ = self.stream.send(outcome);
    }
}
