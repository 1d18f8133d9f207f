use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::models::{NewShipment, PaymentStatus, Shipment, ShipmentStatus};

/// Snapshots buffered per subscriber before the producer waits.
pub const SUBSCRIPTION_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("conflicting document: {0}")]
    Conflict(String),

    #[error("document {0} not found")]
    NotFound(String),

    #[error("document does not match the shipment schema: {0}")]
    Schema(#[source] serde_json::Error),

    #[error("document store failure: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Equality filters supported by the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentFilter {
    All,
    TrackingNumber(String),
    Owner(String),
    PaymentStatus(PaymentStatus),
}

impl ShipmentFilter {
    pub fn matches(&self, shipment: &Shipment) -> bool {
        match self {
            Self::All => true,
            Self::TrackingNumber(number) => shipment.tracking_number == *number,
            Self::Owner(uid) => shipment.user_id == *uid,
            Self::PaymentStatus(status) => shipment.payment_status == *status,
        }
    }

    /// Field and value as sent to a remote store, `None` for no filter.
    pub fn query_pair(&self) -> Option<(&'static str, String)> {
        match self {
            Self::All => None,
            Self::TrackingNumber(number) => Some(("trackingNumber", number.clone())),
            Self::Owner(uid) => Some(("userId", uid.clone())),
            Self::PaymentStatus(status) => Some(("paymentStatus", status.as_str().to_string())),
        }
    }
}

/// The field changes an admin can make to an existing shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipmentUpdate {
    Status(ShipmentStatus),
    VerifyPayment,
}

impl ShipmentUpdate {
    /// Partial document written by this update.
    pub fn fields(&self, at: DateTime<Utc>) -> Value {
        match self {
            Self::Status(status) => json!({ "status": status, "updatedAt": at }),
            Self::VerifyPayment => json!({ "paymentStatus": PaymentStatus::Verified, "updatedAt": at }),
        }
    }

    pub fn apply(&self, shipment: &mut Shipment, at: DateTime<Utc>) {
        match self {
            Self::Status(status) => shipment.status = *status,
            Self::VerifyPayment => shipment.payment_status = PaymentStatus::Verified,
        }
        shipment.updated_at = at;
    }
}

/// Live view over a filtered set of shipments.
///
/// Yields the full matching set once on creation and again after every
/// change to it. Dropping the subscription stops its producer task.
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<Shipment>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Vec<Shipment>>, task: JoinHandle<()>) -> Self {
        Self { receiver, task }
    }

    pub async fn next(&mut self) -> Option<Vec<Shipment>> {
        self.receiver.recv().await
    }

    pub fn cancel(self) {}

    pub fn into_stream(self) -> impl Stream<Item = Vec<Shipment>> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let snapshot = subscription.next().await?;
            Some((snapshot, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// The hosted `shipments` collection.
#[async_trait]
pub trait ShipmentStore: Send + Sync {
    async fn insert(&self, shipment: NewShipment) -> Result<Shipment, StoreError>;
    async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError>;
    /// Applies `update` and returns the document as stored afterwards.
    async fn update(
        &self,
        id: &str,
        update: ShipmentUpdate,
        at: DateTime<Utc>,
    ) -> Result<Shipment, StoreError>;
    async fn query(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>, StoreError>;
    async fn subscribe(&self, filter: ShipmentFilter) -> Result<Subscription, StoreError>;
}

/// In-process document store.
///
/// Documents keep insertion order. Tracking numbers are unique.
#[derive(Clone)]
pub struct MemoryStore {
    shipments: Arc<RwLock<Vec<Shipment>>>,
    changes: broadcast::Sender<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            shipments: Arc::new(RwLock::new(Vec::new())),
            changes,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn snapshot(&self, filter: &ShipmentFilter) -> Vec<Shipment> {
        self.shipments
            .read()
            .await
            .iter()
            .filter(|shipment| filter.matches(shipment))
            .cloned()
            .collect()
    }

    fn publish_change(&self) {
        // No receivers just means nobody is watching.
        let _ = self.changes.send(());
    }
}

#[async_trait]
impl ShipmentStore for MemoryStore {
    async fn insert(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
        let stored = {
            let mut shipments = self.shipments.write().await;
            if shipments
                .iter()
                .any(|existing| existing.tracking_number == shipment.tracking_number)
            {
                return Err(StoreError::Conflict(shipment.tracking_number));
            }
            let stored = shipment.into_shipment(uuid::Uuid::new_v4().to_string());
            shipments.push(stored.clone());
            stored
        };
        self.publish_change();
        Ok(stored)
    }

    async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError> {
        Ok(self
            .shipments
            .read()
            .await
            .iter()
            .find(|shipment| shipment.id == id)
            .cloned())
    }

    async fn update(
        &self,
        id: &str,
        update: ShipmentUpdate,
        at: DateTime<Utc>,
    ) -> Result<Shipment, StoreError> {
        let updated = {
            let mut shipments = self.shipments.write().await;
            let shipment = shipments
                .iter_mut()
                .find(|shipment| shipment.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            update.apply(shipment, at);
            shipment.clone()
        };
        self.publish_change();
        Ok(updated)
    }

    async fn query(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>, StoreError> {
        Ok(self.snapshot(&filter).await)
    }

    async fn subscribe(&self, filter: ShipmentFilter) -> Result<Subscription, StoreError> {
        let store = self.clone();
        let mut changes = self.changes.subscribe();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let task = tokio::spawn(async move {
            let mut last: Option<Vec<Shipment>> = None;
            loop {
                let snapshot = store.snapshot(&filter).await;
                if last.as_ref() != Some(&snapshot) {
                    if sender.send(snapshot.clone()).await.is_err() {
                        break;
                    }
                    last = Some(snapshot);
                }
                match changes.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Subscription::new(receiver, task))
    }
}
