use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::models::{NewShipment, Shipment};
use crate::store::{
    SUBSCRIPTION_BUFFER, ShipmentFilter, ShipmentStore, ShipmentUpdate, StoreError, Subscription,
};

const COLLECTION: &str = "shipments";

/// Client for the hosted document database's REST interface.
#[derive(Clone)]
pub struct RestDocumentStore {
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    http_client: Client,
}

impl RestDocumentStore {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        poll_interval: Duration,
    ) -> anyhow::Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            poll_interval,
            http_client,
        })
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, COLLECTION)
    }

    fn document_url(&self, id: &str) -> String {
        format!("{}/{}/{}", self.base_url, COLLECTION, id)
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, StoreError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to document store", action))?;
        Ok(response)
    }

    async fn fetch(&self, filter: &ShipmentFilter) -> Result<Vec<Shipment>, StoreError> {
        let mut request = self.http_client.get(self.collection_url());
        if let Some((field, value)) = filter.query_pair() {
            request = request.query(&[(field, value)]);
        }

        let response = ensure_success(self.send(request, "query").await?, "query").await?;
        let documents: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse document store query response")?;

        documents.into_iter().map(Shipment::from_document).collect()
    }
}

async fn ensure_success(response: Response, action: &str) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::Backend(anyhow!(
        "Document store {} failed (status {}): {}",
        action,
        status,
        body
    )))
}

#[async_trait]
impl ShipmentStore for RestDocumentStore {
    async fn insert(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
        let tracking_number = shipment.tracking_number.clone();
        let request = self.http_client.post(self.collection_url()).json(&shipment);
        let response = self.send(request, "insert").await?;

        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::Conflict(tracking_number));
        }

        let document: Value = ensure_success(response, "insert")
            .await?
            .json()
            .await
            .context("Failed to parse document store insert response")?;
        Shipment::from_document(document)
    }

    async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError> {
        let request = self.http_client.get(self.document_url(id));
        let response = self.send(request, "get").await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let document: Value = ensure_success(response, "get")
            .await?
            .json()
            .await
            .context("Failed to parse document store get response")?;
        Shipment::from_document(document).map(Some)
    }

    async fn update(
        &self,
        id: &str,
        update: ShipmentUpdate,
        at: DateTime<Utc>,
    ) -> Result<Shipment, StoreError> {
        let request = self
            .http_client
            .patch(self.document_url(id))
            .json(&update.fields(at));
        let response = self.send(request, "update").await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NotFound(id.to_string()));
        }

        let document: Value = ensure_success(response, "update")
            .await?
            .json()
            .await
            .context("Failed to parse document store update response")?;
        Shipment::from_document(document)
    }

    async fn query(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>, StoreError> {
        self.fetch(&filter).await
    }

    /// Polls the collection and forwards a snapshot whenever it differs from
    /// the previous one. A failed poll is logged and retried on the next tick.
    async fn subscribe(&self, filter: ShipmentFilter) -> Result<Subscription, StoreError> {
        let initial = self.fetch(&filter).await?;
        let store = self.clone();
        let (sender, receiver) = mpsc::channel(SUBSCRIPTION_BUFFER);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(store.poll_interval);
            ticker.tick().await;

            if sender.send(initial.clone()).await.is_err() {
                return;
            }
            let mut last = initial;

            loop {
                ticker.tick().await;
                match store.fetch(&filter).await {
                    Ok(snapshot) if snapshot != last => {
                        if sender.send(snapshot.clone()).await.is_err() {
                            break;
                        }
                        last = snapshot;
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, ?filter, "shipment poll failed"),
                }
            }
        });

        Ok(Subscription::new(receiver, task))
    }
}
