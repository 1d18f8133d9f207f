use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::RequestContext;
use crate::error::ShipmentError;
use crate::models::{
    NewShipment, PaymentStatus, PublicShipment, Shipment, ShipmentForm, ShipmentStatus,
};
use crate::notify::{Notification, Notifier};
use crate::payment::{self, PaymentAccount, PaymentTarget};
use crate::pricing::{self, Estimate, EstimateRequest};
use crate::stats::{self, PlatformStats, ShipmentStats};
use crate::status::{self, ProgressStep, Transition};
use crate::store::{ShipmentFilter, ShipmentStore, ShipmentUpdate, StoreError, Subscription};
use crate::tracking;

/// Fresh tracking numbers tried before creation gives up.
pub const TRACKING_NUMBER_ATTEMPTS: usize = 5;

/// Amount due for a filled-in form and where to pay it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub amount: f64,
    pub payment: PaymentTarget,
}

/// Public tracking page contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    pub shipment: PublicShipment,
    pub steps: Vec<ProgressStep>,
}

/// Every user and admin operation on shipments.
pub struct ShipmentService {
    store: Arc<dyn ShipmentStore>,
    notifier: Arc<dyn Notifier>,
    payment: PaymentAccount,
}

impl ShipmentService {
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        notifier: Arc<dyn Notifier>,
        payment: PaymentAccount,
    ) -> Self {
        Self {
            store,
            notifier,
            payment,
        }
    }

    pub fn estimate(&self, request: &EstimateRequest) -> Estimate {
        request.estimate()
    }

    pub fn quote(&self, ctx: &RequestContext, form: &ShipmentForm) -> Result<Quote, ShipmentError> {
        ctx.require_user()?;
        let details = form.validate()?;
        let amount = pricing::price(details.package_size, details.package_weight);
        Ok(Quote {
            amount,
            payment: self.payment.target(amount)?,
        })
    }

    /// Persists a shipment once the user has entered a payment reference.
    ///
    /// The amount is recomputed from the form. Nothing is stored when any
    /// step fails.
    pub async fn create_shipment(
        &self,
        ctx: &RequestContext,
        form: &ShipmentForm,
        transaction_id: &str,
    ) -> Result<Shipment, ShipmentError> {
        let owner = ctx.require_user()?;
        let details = form.validate()?;
        let transaction_id = payment::transaction_reference(transaction_id)?;
        let amount = pricing::price(details.package_size, details.package_weight);

        for attempt in 1..=TRACKING_NUMBER_ATTEMPTS {
            let tracking_number = tracking::generate();
            let now = Utc::now();
            let shipment = NewShipment {
                tracking_number: tracking_number.clone(),
                sender_name: details.sender_name.clone(),
                sender_address: details.sender_address.clone(),
                sender_phone: details.sender_phone.clone(),
                receiver_name: details.receiver_name.clone(),
                receiver_address: details.receiver_address.clone(),
                receiver_phone: details.receiver_phone.clone(),
                package_size: details.package_size,
                package_weight: details.package_weight,
                package_description: details.package_description.clone(),
                status: ShipmentStatus::INITIAL,
                payment_status: PaymentStatus::PendingVerification,
                transaction_id: transaction_id.clone(),
                amount,
                user_id: owner.uid.clone(),
                created_at: now,
                updated_at: now,
            };

            match self.insert_unique(shipment).await {
                Ok(stored) => {
                    tracing::info!(
                        tracking_number = %stored.tracking_number,
                        uid = %owner.uid,
                        amount,
                        "shipment created"
                    );
                    self.notifier.notify(Notification::success(
                        &owner.uid,
                        format!("Shipment created! Tracking: {}", stored.tracking_number),
                    ));
                    return Ok(stored);
                }
                Err(StoreError::Conflict(_)) => {
                    tracing::warn!(%tracking_number, attempt, "tracking number already taken");
                }
                Err(e) => {
                    tracing::error!(error = %e, uid = %owner.uid, "failed to create shipment");
                    self.notifier
                        .notify(Notification::error(&owner.uid, "Failed to create shipment"));
                    return Err(e.into());
                }
            }
        }

        self.notifier
            .notify(Notification::error(&owner.uid, "Failed to create shipment"));
        Err(StoreError::Conflict("no unused tracking number available".to_string()).into())
    }

    /// Inserts after checking the tracking number is unused. Stores that
    /// enforce uniqueness themselves also answer with `Conflict`.
    async fn insert_unique(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
        let taken = self
            .store
            .query(ShipmentFilter::TrackingNumber(shipment.tracking_number.clone()))
            .await?;
        if !taken.is_empty() {
            return Err(StoreError::Conflict(shipment.tracking_number));
        }
        self.store.insert(shipment).await
    }

    pub async fn track(&self, tracking_number: &str) -> Result<TrackingView, ShipmentError> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(ShipmentError::NotFound);
        }

        let shipment = self
            .store
            .query(ShipmentFilter::TrackingNumber(tracking_number.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or(ShipmentError::NotFound)?;

        Ok(TrackingView {
            steps: status::progress_steps(shipment.status),
            shipment: shipment.into(),
        })
    }

    /// Public figures over every shipment.
    pub async fn platform_stats(&self) -> Result<PlatformStats, ShipmentError> {
        let shipments = self.store.query(ShipmentFilter::All).await?;
        Ok(stats::summarize_platform(&shipments))
    }

    pub async fn my_shipments(&self, ctx: &RequestContext) -> Result<Vec<Shipment>, ShipmentError> {
        let owner = ctx.require_user()?;
        Ok(self
            .store
            .query(ShipmentFilter::Owner(owner.uid.clone()))
            .await?)
    }

    pub async fn my_stats(
        &self,
        ctx: &RequestContext,
        now: DateTime<Utc>,
    ) -> Result<ShipmentStats, ShipmentError> {
        let shipments = self.my_shipments(ctx).await?;
        Ok(stats::summarize(&shipments, now))
    }

    pub async fn subscribe_mine(&self, ctx: &RequestContext) -> Result<Subscription, ShipmentError> {
        let owner = ctx.require_user()?;
        Ok(self
            .store
            .subscribe(ShipmentFilter::Owner(owner.uid.clone()))
            .await?)
    }

    pub async fn all_shipments(&self, ctx: &RequestContext) -> Result<Vec<Shipment>, ShipmentError> {
        ctx.require_admin()?;
        Ok(self.store.query(ShipmentFilter::All).await?)
    }

    pub async fn pending_payments(
        &self,
        ctx: &RequestContext,
    ) -> Result<Vec<Shipment>, ShipmentError> {
        ctx.require_admin()?;
        Ok(self
            .store
            .query(ShipmentFilter::PaymentStatus(PaymentStatus::PendingVerification))
            .await?)
    }

    pub async fn subscribe_all(&self, ctx: &RequestContext) -> Result<Subscription, ShipmentError> {
        ctx.require_admin()?;
        Ok(self.store.subscribe(ShipmentFilter::All).await?)
    }

    pub async fn update_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        to: ShipmentStatus,
    ) -> Result<Shipment, ShipmentError> {
        let admin = ctx.require_admin()?;
        let current = self.existing(id).await?;
        let transition = Transition::authorize(ctx, current.status, to)?;

        let updated = self
            .admin_write(&admin.uid, id, ShipmentUpdate::Status(transition.to))
            .await?;
        tracing::info!(
            admin = %admin.email,
            tracking_number = %updated.tracking_number,
            from = %transition.from,
            to = %transition.to,
            "shipment status updated"
        );
        self.notifier.notify(Notification::success(
            &admin.uid,
            format!("{} is now {}", updated.tracking_number, transition.to),
        ));
        Ok(updated)
    }

    /// Marks the payment as checked. The transaction reference is taken on
    /// trust.
    pub async fn verify_payment(&self, ctx: &RequestContext, id: &str) -> Result<Shipment, ShipmentError> {
        let admin = ctx.require_admin()?;
        self.existing(id).await?;

        let updated = self
            .admin_write(&admin.uid, id, ShipmentUpdate::VerifyPayment)
            .await?;
        tracing::info!(
            admin = %admin.email,
            tracking_number = %updated.tracking_number,
            transaction_id = %updated.transaction_id,
            "payment verified"
        );
        self.notifier.notify(Notification::success(
            &admin.uid,
            format!("Payment verified for {}", updated.tracking_number),
        ));
        Ok(updated)
    }

    async fn existing(&self, id: &str) -> Result<Shipment, ShipmentError> {
        self.store.get(id).await?.ok_or(ShipmentError::NotFound)
    }

    async fn admin_write(
        &self,
        admin_uid: &str,
        id: &str,
        update: ShipmentUpdate,
    ) -> Result<Shipment, ShipmentError> {
        match self.store.update(id, update, Utc::now()).await {
            Ok(shipment) => Ok(shipment),
            Err(StoreError::NotFound(_)) => Err(ShipmentError::NotFound),
            Err(e) => {
                tracing::error!(error = %e, %id, ?update, "failed to update shipment");
                self.notifier
                    .notify(Notification::error(admin_uid, "Failed to update shipment"));
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AdminAllowList, Identity};
    use crate::models::PackageSize;
    use crate::notify::{MemoryNotifier, NotificationLevel};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    struct Harness {
        store: Arc<MemoryStore>,
        notifier: Arc<MemoryNotifier>,
        service: ShipmentService,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let service = ShipmentService::new(
            store.clone(),
            notifier.clone(),
            PaymentAccount::new("shiptrack@upi", "ShipTrack"),
        );
        Harness {
            store,
            notifier,
            service,
        }
    }

    fn ctx(uid: &str, email: &str) -> RequestContext {
        RequestContext::resolve(
            Some(Identity {
                uid: uid.to_string(),
                email: email.to_string(),
            }),
            &AdminAllowList::parse("admin@example.com"),
        )
    }

    fn user() -> RequestContext {
        ctx("user-1", "user@example.com")
    }

    fn admin() -> RequestContext {
        ctx("admin-1", "admin@example.com")
    }

    fn form(size: PackageSize, weight: &str) -> ShipmentForm {
        ShipmentForm {
            sender_name: "Asha".to_string(),
            sender_address: "12 MG Road, Pune".to_string(),
            sender_phone: "9800000001".to_string(),
            receiver_name: "Ravi".to_string(),
            receiver_address: "4 Park Street, Kolkata".to_string(),
            receiver_phone: "9800000002".to_string(),
            package_size: size,
            package_weight: weight.to_string(),
            package_description: "Books".to_string(),
        }
    }

    #[tokio::test]
    async fn created_shipment_starts_pending_verification() {
        let h = harness();
        let shipment = h
            .service
            .create_shipment(&user(), &form(PackageSize::Small, "0"), " UPI-991 ")
            .await
            .unwrap();

        assert_eq!(shipment.amount, 100.0);
        assert_eq!(shipment.status, ShipmentStatus::Pending);
        assert_eq!(shipment.payment_status, PaymentStatus::PendingVerification);
        assert_eq!(shipment.transaction_id, "UPI-991");
        assert_eq!(shipment.user_id, "user-1");
        assert_eq!(shipment.created_at, shipment.updated_at);
        assert!(tracking::is_well_formed(&shipment.tracking_number));

        let sent = h.notifier.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, NotificationLevel::Success);
        assert!(sent[0].message.contains(&shipment.tracking_number));
    }

    #[tokio::test]
    async fn quote_matches_created_amount() {
        let h = harness();
        let quote = h.service.quote(&user(), &form(PackageSize::Large, "2.5")).unwrap();
        assert_eq!(quote.amount, 325.0);
        assert!(quote.payment.uri.contains("am=325&"));

        let shipment = h
            .service
            .create_shipment(&user(), &form(PackageSize::Large, "2.5"), "T-1")
            .await
            .unwrap();
        assert_eq!(shipment.amount, quote.amount);
    }

    #[tokio::test]
    async fn invalid_submissions_store_nothing() {
        let h = harness();
        let mut missing_sender = form(PackageSize::Small, "1");
        missing_sender.sender_name.clear();

        let err = h
            .service
            .create_shipment(&user(), &missing_sender, "T-1")
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = h
            .service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, ShipmentError::MissingField { field: "transactionId" }));

        let err = h
            .service
            .create_shipment(&RequestContext::anonymous(), &form(PackageSize::Small, "1"), "T")
            .await
            .unwrap_err();
        assert!(matches!(err, ShipmentError::Unauthenticated));

        assert!(h.store.query(ShipmentFilter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_weight_is_rejected_before_pricing() {
        let h = harness();
        let heavy = form(PackageSize::Small, "1e308");

        assert!(h.service.quote(&user(), &heavy).unwrap_err().is_validation());
        let err = h
            .service
            .create_shipment(&user(), &heavy, "T-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ShipmentError::InvalidField { field: "packageWeight", .. }));

        assert!(h.store.query(ShipmentFilter::All).await.unwrap().is_empty());
        assert!(h.notifier.drain().is_empty());
    }

    #[tokio::test]
    async fn tracking_unknown_number_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.track("ST00000000ZZZZ").await,
            Err(ShipmentError::NotFound)
        ));
        assert!(matches!(h.service.track("  ").await, Err(ShipmentError::NotFound)));
    }

    #[tokio::test]
    async fn tracking_finds_shipment_with_steps() {
        let h = harness();
        let created = h
            .service
            .create_shipment(&user(), &form(PackageSize::Medium, "1"), "T-1")
            .await
            .unwrap();
        let view = h.service.track(&created.tracking_number).await.unwrap();
        assert_eq!(view.shipment, PublicShipment::from(created));
        assert!(view.steps[0].current);
    }

    #[tokio::test]
    async fn verify_changes_only_payment_status_and_timestamp() {
        let h = harness();
        let created = h
            .service
            .create_shipment(&user(), &form(PackageSize::Medium, "1"), "T-1")
            .await
            .unwrap();

        let verified = h.service.verify_payment(&admin(), &created.id).await.unwrap();
        assert_eq!(verified.payment_status, PaymentStatus::Verified);
        assert!(verified.updated_at >= created.updated_at);

        let mut expected = created.clone();
        expected.payment_status = PaymentStatus::Verified;
        expected.updated_at = verified.updated_at;
        assert_eq!(verified, expected);

        assert!(h.service.pending_payments(&admin()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_admin_mutations_have_no_effect() {
        let h = harness();
        let created = h
            .service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "T-1")
            .await
            .unwrap();

        assert!(matches!(
            h.service
                .update_status(&user(), &created.id, ShipmentStatus::Delivered)
                .await,
            Err(ShipmentError::Forbidden)
        ));
        assert!(matches!(
            h.service.verify_payment(&user(), &created.id).await,
            Err(ShipmentError::Forbidden)
        ));
        assert!(matches!(
            h.service.all_shipments(&user()).await,
            Err(ShipmentError::Forbidden)
        ));
        assert!(matches!(
            h.service
                .update_status(&RequestContext::anonymous(), &created.id, ShipmentStatus::Returned)
                .await,
            Err(ShipmentError::Unauthenticated)
        ));

        let stored = h.store.get(&created.id).await.unwrap().unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn admin_moves_status_freely() {
        let h = harness();
        let created = h
            .service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "T-1")
            .await
            .unwrap();

        for to in [
            ShipmentStatus::InTransit,
            ShipmentStatus::Delivered,
            ShipmentStatus::Returned,
            ShipmentStatus::Pending,
        ] {
            let updated = h.service.update_status(&admin(), &created.id, to).await.unwrap();
            assert_eq!(updated.status, to);
            assert_eq!(updated.payment_status, PaymentStatus::PendingVerification);
            assert_eq!(updated.amount, created.amount);
        }

        assert!(matches!(
            h.service
                .update_status(&admin(), "missing", ShipmentStatus::Delivered)
                .await,
            Err(ShipmentError::NotFound)
        ));
    }

    #[tokio::test]
    async fn users_see_only_their_shipments_admins_see_all() {
        let h = harness();
        let other = ctx("user-2", "other@example.com");
        h.service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "T-1")
            .await
            .unwrap();
        h.service
            .create_shipment(&other, &form(PackageSize::Large, "3"), "T-2")
            .await
            .unwrap();

        let mine = h.service.my_shipments(&user()).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].user_id, "user-1");

        assert_eq!(h.service.all_shipments(&admin()).await.unwrap().len(), 2);
        assert_eq!(h.service.pending_payments(&admin()).await.unwrap().len(), 2);

        let stats = h.service.my_stats(&other, Utc::now()).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.total_revenue, 330.0);
    }

    /// Store whose writes always fail, for the persistence error path.
    struct BrokenStore;

    #[async_trait]
    impl ShipmentStore for BrokenStore {
        async fn insert(&self, _shipment: NewShipment) -> Result<Shipment, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("write refused")))
        }

        async fn get(&self, _id: &str) -> Result<Option<Shipment>, StoreError> {
            Ok(None)
        }

        async fn update(
            &self,
            id: &str,
            _update: ShipmentUpdate,
            _at: DateTime<Utc>,
        ) -> Result<Shipment, StoreError> {
            Err(StoreError::NotFound(id.to_string()))
        }

        async fn query(&self, _filter: ShipmentFilter) -> Result<Vec<Shipment>, StoreError> {
            Ok(Vec::new())
        }

        async fn subscribe(&self, _filter: ShipmentFilter) -> Result<Subscription, StoreError> {
            Err(StoreError::Backend(anyhow::anyhow!("no live queries")))
        }
    }

    #[tokio::test]
    async fn persistence_failure_notifies_and_surfaces() {
        let notifier = Arc::new(MemoryNotifier::new());
        let service = ShipmentService::new(
            Arc::new(BrokenStore),
            notifier.clone(),
            PaymentAccount::new("shiptrack@upi", "ShipTrack"),
        );

        let err = service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "T-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ShipmentError::Store(StoreError::Backend(_))));

        let sent = notifier.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, NotificationLevel::Error);
        assert_eq!(sent[0].message, "Failed to create shipment");
    }

    /// Store that reports every tracking number as taken.
    struct SaturatedStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ShipmentStore for SaturatedStore {
        async fn insert(&self, shipment: NewShipment) -> Result<Shipment, StoreError> {
            Err(StoreError::Conflict(shipment.tracking_number))
        }

        async fn get(&self, id: &str) -> Result<Option<Shipment>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(
            &self,
            id: &str,
            update: ShipmentUpdate,
            at: DateTime<Utc>,
        ) -> Result<Shipment, StoreError> {
            self.inner.update(id, update, at).await
        }

        async fn query(&self, filter: ShipmentFilter) -> Result<Vec<Shipment>, StoreError> {
            self.inner.query(filter).await
        }

        async fn subscribe(&self, filter: ShipmentFilter) -> Result<Subscription, StoreError> {
            self.inner.subscribe(filter).await
        }
    }

    #[tokio::test]
    async fn gives_up_after_repeated_tracking_collisions() {
        let notifier = Arc::new(MemoryNotifier::new());
        let service = ShipmentService::new(
            Arc::new(SaturatedStore {
                inner: MemoryStore::new(),
            }),
            notifier.clone(),
            PaymentAccount::new("shiptrack@upi", "ShipTrack"),
        );

        let err = service
            .create_shipment(&user(), &form(PackageSize::Small, "1"), "T-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ShipmentError::Store(StoreError::Conflict(_))));
        assert_eq!(notifier.drain()[0].level, NotificationLevel::Error);
    }
}
