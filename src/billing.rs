// ABOUTME: Remote billing facade whose every result is mirrored locally
// ABOUTME: CRUD, object actions and discount changes go to the provider first, then into the mirror

use std::sync::Arc;

use mirror_store::{Record, Selector};

use crate::entity::EntityKind;
use crate::error::Result;
use crate::mirror::{Mirror, Mirrored};
use crate::remote::{PageRequest, RemoteObject, PAGE_SIZE};
use crate::schema;
use crate::tags::OperationTags;

/// The object a discount is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountOwner {
    Customer,
    Subscription,
}

impl DiscountOwner {
    pub fn kind(&self) -> EntityKind {
        match self {
            DiscountOwner::Customer => EntityKind::Customer,
            DiscountOwner::Subscription => EntityKind::Subscription,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountOwner::Customer => "customer",
            DiscountOwner::Subscription => "subscription",
        }
    }

    /// Local key of the discount attached to `owner_id`.
    pub fn discount_key(&self, owner_id: &str) -> String {
        schema::owner_key(self.as_str(), owner_id)
    }
}

/// What a remote delete left behind locally.
#[derive(Debug, Clone, PartialEq)]
pub enum Deleted {
    /// The provider removed the object; the local row (if any) is gone too.
    Unmirrored(Option<Record>),
    /// The provider kept the object in a final state (a canceled subscription).
    Mirrored(Mirrored),
}

pub struct Billing {
    mirror: Arc<Mirror>,
}

impl Billing {
    pub fn new(mirror: Arc<Mirror>) -> Self {
        Self { mirror }
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Create an object at the provider and mirror the answer. Cards need the
    /// owning customer as `parent`.
    pub async fn create(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        params: &[(String, String)],
    ) -> Result<Mirrored> {
        let path = schema::collection_path(kind, parent)?;
        let created = self.mirror.api().create(&path, params).await?;
        tracing::info!("Created {} {}", kind, created.id().unwrap_or_default());
        self.mirror_one(kind, &created).await
    }

    /// Local read, or with `refresh` a provider read that is mirrored first.
    /// An object the provider no longer has is unmirrored and reads as `None`.
    pub async fn retrieve(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        id: &str,
        refresh: bool,
    ) -> Result<Option<Mirrored>> {
        if !refresh {
            return self.mirror.resolve(kind, id);
        }

        let path = schema::object_path(kind, id, parent)?;
        match self.mirror.api().retrieve(&path).await {
            Ok(object) if object.is_deleted() => {
                self.mirror.unmirror(kind, id)?;
                Ok(None)
            }
            Ok(object) => Ok(Some(self.mirror_one(kind, &object).await?)),
            Err(e) if e.is_not_found() => {
                tracing::debug!("{} {} not found at the provider, unmirroring", kind, id);
                self.mirror.unmirror(kind, id)?;
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn update(
        &self,
        kind: EntityKind,
        parent: Option<&str>,
        id: &str,
        params: &[(String, String)],
    ) -> Result<Mirrored> {
        let path = schema::object_path(kind, id, parent)?;
        let updated = self.mirror.api().update(&path, params).await?;
        self.mirror_one(kind, &updated).await
    }

    pub async fn delete(&self, kind: EntityKind, parent: Option<&str>, id: &str) -> Result<Deleted> {
        let path = schema::object_path(kind, id, parent)?;
        let answer = self.mirror.api().delete(&path).await?;
        if answer.is_deleted() {
            tracing::info!("Deleted {} {}", kind, id);
            Ok(Deleted::Unmirrored(self.mirror.unmirror(kind, id)?))
        } else {
            Ok(Deleted::Mirrored(self.mirror_one(kind, &answer).await?))
        }
    }

    /// Run a provider action (`capture`, `pay`, `close`) on one object and
    /// mirror the object it answers with.
    pub async fn action(
        &self,
        kind: EntityKind,
        id: &str,
        verb: &str,
        params: &[(String, String)],
    ) -> Result<Mirrored> {
        let path = schema::object_path(kind, id, None)?.child(verb);
        let answer = self.mirror.api().create(&path, params).await?;
        tracing::info!("Ran {} on {} {}", verb, kind, id);
        self.mirror_one(kind, &answer).await
    }

    pub async fn capture_charge(&self, id: &str) -> Result<Mirrored> {
        self.action(EntityKind::Charge, id, "capture", &[]).await
    }

    pub async fn pay_invoice(&self, id: &str) -> Result<Mirrored> {
        self.action(EntityKind::Invoice, id, "pay", &[]).await
    }

    pub async fn close_dispute(&self, id: &str) -> Result<Mirrored> {
        self.action(EntityKind::Dispute, id, "close", &[]).await
    }

    /// Cancel a subscription now. The provider keeps it as `canceled`, and
    /// the final invoices and charges the cancellation produced are mirrored
    /// along with it.
    pub async fn cancel_subscription(&self, id: &str) -> Result<Mirrored> {
        let since = chrono::Utc::now().timestamp();
        let path = schema::object_path(EntityKind::Subscription, id, None)?;
        let canceled = self.mirror.api().delete(&path).await?;
        let mirrored = self.mirror_one(EntityKind::Subscription, &canceled).await?;
        tracing::info!("Canceled subscription {}", id);

        self.mirror_created_since(EntityKind::Invoice, "date", since)
            .await?;
        self.mirror_created_since(EntityKind::Charge, "created", since)
            .await?;
        Ok(mirrored)
    }

    /// The invoice the provider would issue next for `customer`. It has no id
    /// yet, so it is returned as-is and never mirrored.
    pub async fn upcoming_invoice(
        &self,
        customer: &str,
        subscription: Option<&str>,
    ) -> Result<RemoteObject> {
        let path = schema::collection_path(EntityKind::Invoice, None)?.child("upcoming");
        let mut query = vec![("customer".to_string(), customer.to_string())];
        if let Some(subscription) = subscription {
            query.push(("subscription".to_string(), subscription.to_string()));
        }
        Ok(self.mirror.api().retrieve_with(&path, &query).await?)
    }

    /// Attach `coupon` to a customer or subscription. The owner is mirrored
    /// with its new discount, which is returned.
    pub async fn apply_discount(
        &self,
        owner: DiscountOwner,
        owner_id: &str,
        coupon: &str,
    ) -> Result<Option<Mirrored>> {
        let path = schema::object_path(owner.kind(), owner_id, None)?;
        let params = vec![("coupon".to_string(), coupon.to_string())];
        let updated = self.mirror.api().update(&path, &params).await?;
        self.mirror_one(owner.kind(), &updated).await?;
        self.mirror
            .resolve(EntityKind::Discount, &owner.discount_key(owner_id))
    }

    /// Local discount of an owner; with `refresh` the owner is re-read from
    /// the provider first.
    pub async fn retrieve_discount(
        &self,
        owner: DiscountOwner,
        owner_id: &str,
        refresh: bool,
    ) -> Result<Option<Mirrored>> {
        if refresh {
            self.retrieve(owner.kind(), None, owner_id, true).await?;
        }
        self.mirror
            .resolve(EntityKind::Discount, &owner.discount_key(owner_id))
    }

    /// Remove an owner's discount at the provider, then locally.
    pub async fn delete_discount(
        &self,
        owner: DiscountOwner,
        owner_id: &str,
    ) -> Result<Option<Record>> {
        let path = schema::object_path(owner.kind(), owner_id, None)?.child("discount");
        self.mirror.api().delete(&path).await?;
        tracing::info!("Deleted discount of {} {}", owner.as_str(), owner_id);
        self.mirror
            .unmirror(EntityKind::Discount, &owner.discount_key(owner_id))
    }

    /// Mirrored rows of `kind` matching `selector`.
    pub fn list_local(&self, kind: EntityKind, selector: &Selector) -> Result<Vec<Record>> {
        Ok(self.mirror.store().find(kind.table().name, selector)?)
    }

    /// Mirror every object of `kind` whose `field` is at or after `since`.
    /// Nothing is purged: this is a partial listing.
    async fn mirror_created_since(&self, kind: EntityKind, field: &str, since: i64) -> Result<u64> {
        let path = schema::collection_path(kind, None)?;
        let mut request =
            PageRequest::first(PAGE_SIZE).with_filter(format!("{}[gte]", field), since.to_string());
        let mut mirrored = 0;
        loop {
            let page = self.mirror.api().list(&path, &request).await?;
            for object in &page.data {
                self.mirror_one(kind, object).await?;
                mirrored += 1;
            }
            match (page.has_more, page.last_id()) {
                (true, Some(cursor)) => request = request.after(cursor),
                _ => break,
            }
        }
        tracing::debug!("Mirrored {} {} objects created since {}", mirrored, kind, since);
        Ok(mirrored)
    }

    async fn mirror_one(&self, kind: EntityKind, object: &RemoteObject) -> Result<Mirrored> {
        self.mirror
            .mirror(kind, object, &OperationTags::incremental())
            .await
    }
}
