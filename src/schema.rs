// ABOUTME: Declarative field tables describing how each remote object flattens into a row
// ABOUTME: Also declares inlined child collections, their scopes and how to re-page them

use serde_json::{Map, Value};

use crate::entity::EntityKind;
use crate::error::{MirrorError, Result};
use crate::remote::{Lookup, RemoteObject, ResourcePath};

/// How a column's value is derived from the field found at its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Direct,
    /// Expandable reference: either an id string or an object carrying `id`.
    IdOf,
    /// `true` when the list-valued field contains the given string.
    Contains(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    /// Dotted path into the remote object.
    pub path: &'static str,
    /// Required paths must exist in the object (their value may be null).
    pub required: bool,
    pub transform: Transform,
}

const fn req(name: &'static str) -> Column {
    Column {
        name,
        path: name,
        required: true,
        transform: Transform::Direct,
    }
}

const fn opt(name: &'static str) -> Column {
    Column {
        name,
        path: name,
        required: false,
        transform: Transform::Direct,
    }
}

const fn opt_at(name: &'static str, path: &'static str) -> Column {
    Column {
        name,
        path,
        required: false,
        transform: Transform::Direct,
    }
}

const fn id_of(name: &'static str, required: bool) -> Column {
    Column {
        name,
        path: name,
        required,
        transform: Transform::IdOf,
    }
}

const fn contains(name: &'static str, path: &'static str, value: &'static str) -> Column {
    Column {
        name,
        path,
        required: false,
        transform: Transform::Contains(value),
    }
}

/// Where a row's primary key comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// The provider-assigned `id`.
    RemoteId,
    /// `"{owner_type}:{owner_id}"`, owner being the subscription when set,
    /// else the customer. Used by discounts, which carry no id.
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildSource {
    /// An inlined list object (`data` + `has_more`).
    List(&'static str),
    /// A single inlined object, or null.
    Single(&'static str),
}

/// Narrows a child table to the rows owned by one parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeTerm {
    /// Column holding the parent's id.
    Parent(&'static str),
    /// Column with a fixed value for this collection.
    Fixed(&'static str, &'static str),
}

/// Remote listing used when an inlined list reports `has_more`.
/// `{id}` in the path or filter values is replaced with the parent id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repage {
    pub path: &'static str,
    pub filters: &'static [(&'static str, &'static str)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSpec {
    pub kind: EntityKind,
    pub source: ChildSource,
    pub scope: &'static [ScopeTerm],
    pub repage: Option<Repage>,
}

/// Provider resource location of a kind; `{parent}` is filled from the
/// object's `parent` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resource {
    pub collection: &'static str,
    pub parent: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct EntitySpec {
    pub kind: EntityKind,
    /// The provider's `object` tag for this kind.
    pub object: &'static str,
    pub key: KeySource,
    pub columns: &'static [Column],
    pub children: &'static [ChildSpec],
    pub resource: Option<Resource>,
    /// Relation columns resolved to local records when a row is read back.
    pub expand: &'static [(&'static str, EntityKind)],
}

const SHIPPING: [Column; 9] = [
    opt_at("shipping_address_city", "shipping.address.city"),
    opt_at("shipping_address_country", "shipping.address.country"),
    opt_at("shipping_address_line1", "shipping.address.line1"),
    opt_at("shipping_address_line2", "shipping.address.line2"),
    opt_at("shipping_address_postal_code", "shipping.address.postal_code"),
    opt_at("shipping_address_state", "shipping.address.state"),
    opt_at("shipping_name", "shipping.name"),
    opt_at("shipping_phone", "shipping.phone"),
    opt_at("shipping_carrier", "shipping.carrier"),
];

const CUSTOMER_COLUMNS: &[Column] = &[
    opt("account_balance"),
    opt("business_vat_id"),
    req("created"),
    opt("currency"),
    id_of("default_source", false),
    opt("delinquent"),
    opt("description"),
    opt("email"),
    req("livemode"),
    SHIPPING[0],
    SHIPPING[1],
    SHIPPING[2],
    SHIPPING[3],
    SHIPPING[4],
    SHIPPING[5],
    SHIPPING[6],
    SHIPPING[7],
];

const CARD_COLUMNS: &[Column] = &[
    opt("account"),
    opt("address_city"),
    opt("address_country"),
    opt("address_line1"),
    opt("address_line1_check"),
    opt("address_line2"),
    opt("address_state"),
    opt("address_zip"),
    opt("address_zip_check"),
    contains(
        "available_payout_methods_standard",
        "available_payout_methods",
        "standard",
    ),
    contains(
        "available_payout_methods_instant",
        "available_payout_methods",
        "instant",
    ),
    req("brand"),
    opt("country"),
    opt("currency"),
    req("customer"),
    opt("cvc_check"),
    opt("default_for_currency"),
    opt("dynamic_last4"),
    req("exp_month"),
    req("exp_year"),
    opt("fingerprint"),
    opt("funding"),
    req("last4"),
    opt("name"),
    opt("recipient"),
    opt("tokenization_method"),
];

const CHARGE_COLUMNS: &[Column] = &[
    req("amount"),
    opt("amount_refunded"),
    opt("application"),
    opt("application_fee"),
    opt("balance_transaction"),
    opt("captured"),
    req("created"),
    req("currency"),
    id_of("customer", false),
    opt("description"),
    opt("destination"),
    id_of("dispute", false),
    opt("failure_code"),
    opt("failure_message"),
    opt_at("fraud_details_user_report", "fraud_details.user_report"),
    opt_at("fraud_details_stripe_report", "fraud_details.stripe_report"),
    id_of("invoice", false),
    req("livemode"),
    opt("on_behalf_of"),
    opt("order"),
    opt_at("outcome_network_status", "outcome.network_status"),
    opt_at("outcome_reason", "outcome.reason"),
    opt_at("outcome_risk_level", "outcome.risk_level"),
    opt_at("outcome_rule", "outcome.rule"),
    opt_at("outcome_seller_message", "outcome.seller_message"),
    opt_at("outcome_type", "outcome.type"),
    req("paid"),
    opt("receipt_email"),
    opt("refunded"),
    opt("review"),
    SHIPPING[0],
    SHIPPING[1],
    SHIPPING[2],
    SHIPPING[3],
    SHIPPING[4],
    SHIPPING[5],
    SHIPPING[6],
    SHIPPING[7],
    SHIPPING[8],
    opt_at("shipping_tracking_number", "shipping.tracking_number"),
    id_of("source", false),
    opt("source_transfer"),
    opt("statement_descriptor"),
    req("status"),
    opt("transfer"),
    opt("transfer_group"),
];

const COUPON_COLUMNS: &[Column] = &[
    opt("amount_off"),
    req("created"),
    opt("currency"),
    req("duration"),
    opt("duration_in_months"),
    req("livemode"),
    opt("max_redemptions"),
    opt("percent_off"),
    opt("redeem_by"),
    opt("times_redeemed"),
    req("valid"),
];

const DISCOUNT_COLUMNS: &[Column] = &[
    id_of("coupon", true),
    req("customer"),
    opt("subscription"),
    req("start"),
    opt("end"),
];

const DISPUTE_COLUMNS: &[Column] = &[
    req("amount"),
    id_of("charge", true),
    req("created"),
    req("currency"),
    opt_at("evidence_access_activity_log", "evidence.access_activity_log"),
    opt_at("evidence_billing_address", "evidence.billing_address"),
    opt_at("evidence_cancellation_policy", "evidence.cancellation_policy"),
    opt_at(
        "evidence_cancellation_policy_disclosure",
        "evidence.cancellation_policy_disclosure",
    ),
    opt_at("evidence_cancellation_rebuttal", "evidence.cancellation_rebuttal"),
    opt_at(
        "evidence_customer_communication",
        "evidence.customer_communication",
    ),
    opt_at(
        "evidence_customer_email_address",
        "evidence.customer_email_address",
    ),
    opt_at("evidence_customer_name", "evidence.customer_name"),
    opt_at("evidence_customer_purchase_ip", "evidence.customer_purchase_ip"),
    opt_at("evidence_customer_signature", "evidence.customer_signature"),
    opt_at(
        "evidence_duplicate_charge_documentation",
        "evidence.duplicate_charge_documentation",
    ),
    opt_at(
        "evidence_duplicate_charge_explanation",
        "evidence.duplicate_charge_explanation",
    ),
    opt_at("evidence_duplicate_charge_id", "evidence.duplicate_charge_id"),
    opt_at("evidence_product_description", "evidence.product_description"),
    opt_at("evidence_receipt", "evidence.receipt"),
    opt_at("evidence_refund_policy", "evidence.refund_policy"),
    opt_at(
        "evidence_refund_policy_disclosure",
        "evidence.refund_policy_disclosure",
    ),
    opt_at(
        "evidence_refund_refusal_explanation",
        "evidence.refund_refusal_explanation",
    ),
    opt_at("evidence_service_date", "evidence.service_date"),
    opt_at(
        "evidence_service_documentation",
        "evidence.service_documentation",
    ),
    opt_at("evidence_shipping_address", "evidence.shipping_address"),
    opt_at("evidence_shipping_carrier", "evidence.shipping_carrier"),
    opt_at("evidence_shipping_date", "evidence.shipping_date"),
    opt_at(
        "evidence_shipping_documentation",
        "evidence.shipping_documentation",
    ),
    opt_at(
        "evidence_shipping_tracking_number",
        "evidence.shipping_tracking_number",
    ),
    opt_at("evidence_uncategorized_file", "evidence.uncategorized_file"),
    opt_at("evidence_uncategorized_text", "evidence.uncategorized_text"),
    opt_at("evidence_details_due_by", "evidence_details.due_by"),
    opt_at("evidence_details_has_evidence", "evidence_details.has_evidence"),
    opt_at("evidence_details_past_due", "evidence_details.past_due"),
    opt_at(
        "evidence_details_submission_count",
        "evidence_details.submission_count",
    ),
    opt("is_charge_refundable"),
    req("livemode"),
    req("reason"),
    req("status"),
];

const INVOICE_COLUMNS: &[Column] = &[
    req("amount_due"),
    opt("application_fee"),
    opt("attempt_count"),
    opt("attempted"),
    id_of("charge", false),
    opt("closed"),
    req("currency"),
    id_of("customer", true),
    opt("date"),
    opt("description"),
    opt("ending_balance"),
    opt("forgiven"),
    req("livemode"),
    opt("next_payment_attempt"),
    opt("paid"),
    opt("period_end"),
    opt("period_start"),
    opt("receipt_number"),
    opt("starting_balance"),
    opt("statement_descriptor"),
    id_of("subscription", false),
    opt("subscription_proration_date"),
    opt("subtotal"),
    opt("tax"),
    opt("tax_percent"),
    req("total"),
    opt("webhooks_delivered_at"),
];

const INVOICE_ITEM_COLUMNS: &[Column] = &[
    req("amount"),
    req("currency"),
    id_of("customer", true),
    opt("date"),
    opt("description"),
    opt("discountable"),
    id_of("invoice", false),
    req("livemode"),
    opt_at("period_start", "period.start"),
    opt_at("period_end", "period.end"),
    id_of("plan", false),
    opt("proration"),
    opt("quantity"),
    id_of("subscription", false),
    opt("subscription_item"),
];

const LINE_ITEM_COLUMNS: &[Column] = &[
    req("invoice"),
    req("amount"),
    req("currency"),
    opt("description"),
    opt("discountable"),
    opt("livemode"),
    opt_at("period_start", "period.start"),
    opt_at("period_end", "period.end"),
    id_of("plan", false),
    opt("proration"),
    opt("quantity"),
    opt("subscription"),
    opt("subscription_item"),
    req("type"),
];

const PLAN_COLUMNS: &[Column] = &[
    req("amount"),
    opt("created"),
    req("currency"),
    req("interval"),
    opt("interval_count"),
    req("livemode"),
    opt("name"),
    opt("statement_descriptor"),
    opt("trial_period_days"),
];

const REFUND_COLUMNS: &[Column] = &[
    req("amount"),
    opt("balance_transaction"),
    id_of("charge", true),
    req("created"),
    req("currency"),
    opt("description"),
    opt("reason"),
    opt("receipt_number"),
    req("status"),
];

const SUBSCRIPTION_COLUMNS: &[Column] = &[
    opt("application_fee_percent"),
    opt("cancel_at_period_end"),
    opt("canceled_at"),
    req("created"),
    opt("current_period_end"),
    opt("current_period_start"),
    id_of("customer", true),
    opt("ended_at"),
    req("livemode"),
    id_of("plan", true),
    opt("quantity"),
    opt("start"),
    req("status"),
    opt("tax_percent"),
    opt("trial_end"),
    opt("trial_start"),
];

const SUBSCRIPTION_ITEM_COLUMNS: &[Column] = &[
    req("subscription"),
    opt("created"),
    id_of("plan", true),
    opt("quantity"),
];

const CUSTOMER_CHILDREN: &[ChildSpec] = &[
    ChildSpec {
        kind: EntityKind::Discount,
        source: ChildSource::Single("discount"),
        scope: &[
            ScopeTerm::Fixed("owner_type", "customer"),
            ScopeTerm::Parent("customer"),
        ],
        repage: None,
    },
    ChildSpec {
        kind: EntityKind::Card,
        source: ChildSource::List("sources"),
        scope: &[ScopeTerm::Parent("customer")],
        repage: Some(Repage {
            path: "customers/{id}/sources",
            filters: &[("object", "card")],
        }),
    },
];

const INVOICE_CHILDREN: &[ChildSpec] = &[ChildSpec {
    kind: EntityKind::LineItem,
    source: ChildSource::List("lines"),
    scope: &[ScopeTerm::Parent("invoice")],
    repage: Some(Repage {
        path: "invoices/{id}/lines",
        filters: &[],
    }),
}];

const SUBSCRIPTION_CHILDREN: &[ChildSpec] = &[
    ChildSpec {
        kind: EntityKind::Discount,
        source: ChildSource::Single("discount"),
        scope: &[
            ScopeTerm::Fixed("owner_type", "subscription"),
            ScopeTerm::Parent("subscription"),
        ],
        repage: None,
    },
    ChildSpec {
        kind: EntityKind::SubscriptionItem,
        source: ChildSource::List("items"),
        scope: &[ScopeTerm::Parent("subscription")],
        repage: Some(Repage {
            path: "subscription_items",
            filters: &[("subscription", "{id}")],
        }),
    },
];

const fn top_level(collection: &'static str) -> Option<Resource> {
    Some(Resource {
        collection,
        parent: None,
    })
}

const SPECS: [EntitySpec; 13] = [
    EntitySpec {
        kind: EntityKind::Customer,
        object: "customer",
        key: KeySource::RemoteId,
        columns: CUSTOMER_COLUMNS,
        children: CUSTOMER_CHILDREN,
        resource: top_level("customers"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Card,
        object: "card",
        key: KeySource::RemoteId,
        columns: CARD_COLUMNS,
        children: &[],
        resource: Some(Resource {
            collection: "customers/{parent}/sources",
            parent: Some("customer"),
        }),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Charge,
        object: "charge",
        key: KeySource::RemoteId,
        columns: CHARGE_COLUMNS,
        children: &[],
        resource: top_level("charges"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Coupon,
        object: "coupon",
        key: KeySource::RemoteId,
        columns: COUPON_COLUMNS,
        children: &[],
        resource: top_level("coupons"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Discount,
        object: "discount",
        key: KeySource::Owner,
        columns: DISCOUNT_COLUMNS,
        children: &[],
        resource: None,
        expand: &[("coupon", EntityKind::Coupon)],
    },
    EntitySpec {
        kind: EntityKind::Dispute,
        object: "dispute",
        key: KeySource::RemoteId,
        columns: DISPUTE_COLUMNS,
        children: &[],
        resource: top_level("disputes"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Invoice,
        object: "invoice",
        key: KeySource::RemoteId,
        columns: INVOICE_COLUMNS,
        children: INVOICE_CHILDREN,
        resource: top_level("invoices"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::InvoiceItem,
        object: "invoiceitem",
        key: KeySource::RemoteId,
        columns: INVOICE_ITEM_COLUMNS,
        children: &[],
        resource: top_level("invoiceitems"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::LineItem,
        object: "line_item",
        key: KeySource::RemoteId,
        columns: LINE_ITEM_COLUMNS,
        children: &[],
        resource: None,
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Plan,
        object: "plan",
        key: KeySource::RemoteId,
        columns: PLAN_COLUMNS,
        children: &[],
        resource: top_level("plans"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Refund,
        object: "refund",
        key: KeySource::RemoteId,
        columns: REFUND_COLUMNS,
        children: &[],
        resource: top_level("refunds"),
        expand: &[],
    },
    EntitySpec {
        kind: EntityKind::Subscription,
        object: "subscription",
        key: KeySource::RemoteId,
        columns: SUBSCRIPTION_COLUMNS,
        children: SUBSCRIPTION_CHILDREN,
        resource: top_level("subscriptions"),
        expand: &[("plan", EntityKind::Plan)],
    },
    EntitySpec {
        kind: EntityKind::SubscriptionItem,
        object: "subscription_item",
        key: KeySource::RemoteId,
        columns: SUBSCRIPTION_ITEM_COLUMNS,
        children: &[],
        resource: top_level("subscription_items"),
        expand: &[],
    },
];

pub fn spec(kind: EntityKind) -> &'static EntitySpec {
    match kind {
        EntityKind::Customer => &SPECS[0],
        EntityKind::Card => &SPECS[1],
        EntityKind::Charge => &SPECS[2],
        EntityKind::Coupon => &SPECS[3],
        EntityKind::Discount => &SPECS[4],
        EntityKind::Dispute => &SPECS[5],
        EntityKind::Invoice => &SPECS[6],
        EntityKind::InvoiceItem => &SPECS[7],
        EntityKind::LineItem => &SPECS[8],
        EntityKind::Plan => &SPECS[9],
        EntityKind::Refund => &SPECS[10],
        EntityKind::Subscription => &SPECS[11],
        EntityKind::SubscriptionItem => &SPECS[12],
    }
}

impl Column {
    fn extract(&self, kind: EntityKind, object: &RemoteObject) -> Result<Value> {
        let value = match object.lookup(self.path) {
            Lookup::Found(value) => value,
            Lookup::Missing if self.required => {
                return Err(MirrorError::MissingField {
                    kind,
                    field: self.path.to_string(),
                })
            }
            Lookup::Missing => &Value::Null,
        };

        Ok(match self.transform {
            Transform::Direct => value.clone(),
            Transform::IdOf => match value {
                Value::String(_) => value.clone(),
                Value::Object(map) => map.get("id").cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Transform::Contains(wanted) => Value::Bool(
                value
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| item.as_str() == Some(wanted))),
            ),
        })
    }
}

/// Local key of a remote object of `kind`.
pub fn key_of(kind: EntityKind, object: &RemoteObject) -> Result<String> {
    match spec(kind).key {
        KeySource::RemoteId => object
            .id()
            .map(str::to_string)
            .ok_or(MirrorError::MissingKey { kind }),
        KeySource::Owner => {
            let (owner_type, owner_id) = discount_owner(object).ok_or(MirrorError::MissingKey { kind })?;
            Ok(owner_key(owner_type, owner_id))
        }
    }
}

pub fn owner_key(owner_type: &str, owner_id: &str) -> String {
    format!("{}:{}", owner_type, owner_id)
}

fn discount_owner(object: &RemoteObject) -> Option<(&'static str, &str)> {
    let reference = |field: &str| match object.get(field) {
        Some(Value::String(id)) => Some(id.as_str()),
        Some(Value::Object(map)) => map.get("id").and_then(Value::as_str),
        _ => None,
    };
    match reference("subscription") {
        Some(subscription) => Some(("subscription", subscription)),
        None => reference("customer").map(|customer| ("customer", customer)),
    }
}

/// Flatten one remote object into its row key and attribute map.
pub fn flatten(kind: EntityKind, object: &RemoteObject) -> Result<(String, Map<String, Value>)> {
    let spec = spec(kind);
    let mut attributes = Map::new();
    for column in spec.columns {
        attributes.insert(column.name.to_string(), column.extract(kind, object)?);
    }
    if spec.key == KeySource::Owner {
        let owner_type = match discount_owner(object) {
            Some((owner_type, _)) => owner_type,
            None => return Err(MirrorError::MissingKey { kind }),
        };
        attributes.insert("owner_type".to_string(), Value::from(owner_type));
    }
    let key = key_of(kind, object)?;
    Ok((key, attributes))
}

impl ChildSpec {
    /// Stamp the parent's scope onto a child object before it is flattened,
    /// so children whose payload omits the back-reference still carry it.
    pub fn adopt(&self, child: &mut RemoteObject, parent_id: &str) {
        for term in self.scope {
            match term {
                ScopeTerm::Parent(column) => child.set(*column, Value::from(parent_id)),
                ScopeTerm::Fixed(column, value) => child.set(*column, Value::from(*value)),
            }
        }
    }

    /// Selector matching every row of this collection owned by `parent_id`.
    pub fn scope_selector(&self, parent_id: &str) -> mirror_store::Selector {
        self.scope
            .iter()
            .fold(mirror_store::Selector::new(), |selector, term| match term {
                ScopeTerm::Parent(column) => selector.eq(*column, parent_id),
                ScopeTerm::Fixed(column, value) => selector.eq(*column, *value),
            })
    }

    /// Selector over the whole collection, across every parent.
    pub fn collection_selector(&self) -> mirror_store::Selector {
        self.scope
            .iter()
            .fold(mirror_store::Selector::new(), |selector, term| match term {
                ScopeTerm::Parent(_) => selector,
                ScopeTerm::Fixed(column, value) => selector.eq(*column, *value),
            })
    }

    /// Only objects of the child kind's provider type belong to the set.
    pub fn accepts(&self, child: &RemoteObject) -> bool {
        child
            .object_type()
            .map_or(true, |object| object == spec(self.kind).object)
    }
}

impl Repage {
    pub fn path_for(&self, parent_id: &str) -> ResourcePath {
        ResourcePath::new(self.path.replace("{id}", parent_id))
    }

    pub fn filters_for(&self, parent_id: &str) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|(key, value)| (key.to_string(), value.replace("{id}", parent_id)))
            .collect()
    }
}

/// Provider collection path of `kind`; nested kinds need their parent's id.
pub fn collection_path(kind: EntityKind, parent: Option<&str>) -> Result<ResourcePath> {
    let resource = spec(kind).resource.ok_or_else(|| {
        MirrorError::Unsupported(format!("{} objects are not addressable on their own", kind))
    })?;
    match (resource.parent, parent) {
        (None, _) => Ok(ResourcePath::new(resource.collection)),
        (Some(_), Some(parent)) => Ok(ResourcePath::new(
            resource.collection.replace("{parent}", parent),
        )),
        (Some(field), None) => Err(MirrorError::Unsupported(format!(
            "{} objects need their {} id",
            kind, field
        ))),
    }
}

pub fn object_path(kind: EntityKind, id: &str, parent: Option<&str>) -> Result<ResourcePath> {
    Ok(collection_path(kind, parent)?.child(id))
}

/// Provider path of an object, taking the parent id from the object itself.
/// `None` for kinds that cannot be fetched individually.
pub fn object_path_for(kind: EntityKind, object: &RemoteObject) -> Option<ResourcePath> {
    let resource = spec(kind).resource?;
    let parent = match resource.parent {
        Some(field) => Some(object.str_field(field)?),
        None => None,
    };
    object_path(kind, object.id()?, parent).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> RemoteObject {
        RemoteObject::from_value(value).unwrap()
    }

    #[test]
    fn every_kind_has_a_spec_for_itself() {
        for kind in EntityKind::ALL {
            assert_eq!(spec(kind).kind, kind);
        }
    }

    #[test]
    fn spec_relations_are_flattened_columns() {
        for kind in EntityKind::ALL {
            let spec = spec(kind);
            for relation in kind.table().relations {
                let present = spec.columns.iter().any(|c| c.name == *relation)
                    || (*relation == "owner_type" && spec.key == KeySource::Owner);
                assert!(present, "{} lacks relation column {}", kind, relation);
            }
        }
    }

    #[test]
    fn card_payout_methods_become_flags() {
        let card = object(json!({
            "id": "card_1", "object": "card", "brand": "Visa", "customer": "cus_1",
            "exp_month": 4, "exp_year": 2030, "last4": "4242",
            "available_payout_methods": ["standard"]
        }));
        let (id, attributes) = flatten(EntityKind::Card, &card).unwrap();
        assert_eq!(id, "card_1");
        assert_eq!(attributes["available_payout_methods_standard"], json!(true));
        assert_eq!(attributes["available_payout_methods_instant"], json!(false));
        assert_eq!(attributes["recipient"], Value::Null);
    }

    #[test]
    fn charge_collapses_sub_objects_and_references() {
        let charge = object(json!({
            "id": "ch_1", "amount": 500, "created": 1, "currency": "usd",
            "livemode": false, "paid": true, "status": "succeeded",
            "customer": "cus_1",
            "source": {"id": "card_1", "object": "card"},
            "outcome": {"type": "authorized", "risk_level": "normal"},
            "shipping": {"name": "Ada", "address": {"city": "London", "state": null}}
        }));
        let (_, attributes) = flatten(EntityKind::Charge, &charge).unwrap();
        assert_eq!(attributes["source"], json!("card_1"));
        assert_eq!(attributes["outcome_type"], json!("authorized"));
        assert_eq!(attributes["shipping_name"], json!("Ada"));
        assert_eq!(attributes["shipping_address_city"], json!("London"));
        assert_eq!(attributes["shipping_phone"], Value::Null);
        assert_eq!(attributes["fraud_details_user_report"], Value::Null);
    }

    #[test]
    fn invoice_item_keeps_only_the_plan_id() {
        let item = object(json!({
            "id": "ii_1", "object": "invoiceitem", "amount": 2000, "currency": "usd",
            "customer": "cus_1", "livemode": false, "invoice": "in_1",
            "period": {"start": 1, "end": 2},
            "plan": {"id": "gold", "object": "plan", "amount": 2000}
        }));
        let (_, attributes) = flatten(EntityKind::InvoiceItem, &item).unwrap();
        assert_eq!(attributes["plan"], json!("gold"));
        assert_eq!(attributes["period_end"], json!(2));
        assert_eq!(attributes["subscription"], Value::Null);
    }

    #[test]
    fn missing_required_field_is_a_contract_violation() {
        let charge = object(json!({"id": "ch_1", "currency": "usd"}));
        let err = flatten(EntityKind::Charge, &charge).unwrap_err();
        assert!(err.is_contract_violation());
        assert!(err.to_string().contains("`amount`"));
    }

    #[test]
    fn required_field_may_be_null() {
        let plan = object(json!({
            "id": "gold", "amount": 1000, "currency": "usd",
            "interval": "month", "livemode": null
        }));
        assert!(flatten(EntityKind::Plan, &plan).is_ok());
    }

    #[test]
    fn discount_is_keyed_by_its_owner() {
        let customer_discount = object(json!({
            "object": "discount", "coupon": {"id": "SAVE20"}, "customer": "cus_1",
            "subscription": null, "start": 10, "end": null
        }));
        let (id, attributes) = flatten(EntityKind::Discount, &customer_discount).unwrap();
        assert_eq!(id, "customer:cus_1");
        assert_eq!(attributes["owner_type"], json!("customer"));
        assert_eq!(attributes["coupon"], json!("SAVE20"));

        let subscription_discount = object(json!({
            "object": "discount", "coupon": {"id": "SAVE20"}, "customer": "cus_1",
            "subscription": "sub_1", "start": 10, "end": null
        }));
        assert_eq!(
            key_of(EntityKind::Discount, &subscription_discount).unwrap(),
            "subscription:sub_1"
        );
    }

    #[test]
    fn adopt_injects_parent_reference() {
        let child = &spec(EntityKind::Invoice).children[0];
        let mut line = object(json!({"id": "ii_1", "object": "line_item"}));
        child.adopt(&mut line, "in_1");
        assert_eq!(line.str_field("invoice"), Some("in_1"));
        assert_eq!(
            child.scope_selector("in_1"),
            mirror_store::Selector::new().eq("invoice", "in_1")
        );
    }

    #[test]
    fn child_sets_reject_foreign_object_types() {
        let cards = &spec(EntityKind::Customer).children[1];
        assert!(cards.accepts(&object(json!({"id": "card_1", "object": "card"}))));
        assert!(!cards.accepts(&object(json!({"id": "ba_1", "object": "bank_account"}))));
    }

    #[test]
    fn repage_fills_parent_id() {
        let items = spec(EntityKind::Subscription).children[1].repage.unwrap();
        assert_eq!(items.path_for("sub_1").as_str(), "subscription_items");
        assert_eq!(
            items.filters_for("sub_1"),
            vec![("subscription".to_string(), "sub_1".to_string())]
        );
    }

    #[test]
    fn nested_resources_need_their_parent() {
        assert_eq!(
            object_path(EntityKind::Card, "card_1", Some("cus_1"))
                .unwrap()
                .as_str(),
            "customers/cus_1/sources/card_1"
        );
        assert!(collection_path(EntityKind::Card, None).is_err());
        assert!(collection_path(EntityKind::LineItem, None).is_err());
        let card = object(json!({"id": "card_1", "customer": "cus_1"}));
        assert_eq!(
            object_path_for(EntityKind::Card, &card).unwrap().as_str(),
            "customers/cus_1/sources/card_1"
        );
    }
}
