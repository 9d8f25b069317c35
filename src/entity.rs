// ABOUTME: Entity kinds mirrored from the billing provider and the sync selectors over them
// ABOUTME: Each kind owns a store table and, for most kinds, a metadata owner tag

use std::fmt;
use std::str::FromStr;

use mirror_store::TableSpec;

use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Customer,
    Card,
    Charge,
    Coupon,
    Discount,
    Dispute,
    Invoice,
    InvoiceItem,
    LineItem,
    Plan,
    Refund,
    Subscription,
    SubscriptionItem,
}

pub const CUSTOMERS: TableSpec = TableSpec::new("customers", &[]);
pub const CARDS: TableSpec = TableSpec::new("cards", &["customer"]);
pub const CHARGES: TableSpec = TableSpec::new("charges", &["customer", "invoice"]);
pub const COUPONS: TableSpec = TableSpec::new("coupons", &[]);
pub const DISCOUNTS: TableSpec = TableSpec::new(
    "discounts",
    &["owner_type", "customer", "subscription", "coupon"],
);
pub const DISPUTES: TableSpec = TableSpec::new("disputes", &["charge"]);
pub const INVOICES: TableSpec =
    TableSpec::new("invoices", &["customer", "subscription", "charge"]);
pub const INVOICE_ITEMS: TableSpec =
    TableSpec::new("invoice_items", &["customer", "invoice", "subscription"]);
pub const LINE_ITEMS: TableSpec = TableSpec::new("invoice_line_items", &["invoice", "subscription"]);
pub const PLANS: TableSpec = TableSpec::new("plans", &[]);
pub const REFUNDS: TableSpec = TableSpec::new("refunds", &["charge"]);
pub const SUBSCRIPTIONS: TableSpec = TableSpec::new("subscriptions", &["customer", "plan"]);
pub const SUBSCRIPTION_ITEMS: TableSpec =
    TableSpec::new("subscription_items", &["subscription", "plan"]);

/// Every table the mirror store must create.
pub const TABLES: [TableSpec; 13] = [
    CUSTOMERS,
    CARDS,
    CHARGES,
    COUPONS,
    DISCOUNTS,
    DISPUTES,
    INVOICES,
    INVOICE_ITEMS,
    LINE_ITEMS,
    PLANS,
    REFUNDS,
    SUBSCRIPTIONS,
    SUBSCRIPTION_ITEMS,
];

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        EntityKind::Customer,
        EntityKind::Card,
        EntityKind::Charge,
        EntityKind::Coupon,
        EntityKind::Discount,
        EntityKind::Dispute,
        EntityKind::Invoice,
        EntityKind::InvoiceItem,
        EntityKind::LineItem,
        EntityKind::Plan,
        EntityKind::Refund,
        EntityKind::Subscription,
        EntityKind::SubscriptionItem,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Card => "card",
            EntityKind::Charge => "charge",
            EntityKind::Coupon => "coupon",
            EntityKind::Discount => "discount",
            EntityKind::Dispute => "dispute",
            EntityKind::Invoice => "invoice",
            EntityKind::InvoiceItem => "invoice_item",
            EntityKind::LineItem => "line_item",
            EntityKind::Plan => "plan",
            EntityKind::Refund => "refund",
            EntityKind::Subscription => "subscription",
            EntityKind::SubscriptionItem => "subscription_item",
        }
    }

    pub fn table(&self) -> TableSpec {
        match self {
            EntityKind::Customer => CUSTOMERS,
            EntityKind::Card => CARDS,
            EntityKind::Charge => CHARGES,
            EntityKind::Coupon => COUPONS,
            EntityKind::Discount => DISCOUNTS,
            EntityKind::Dispute => DISPUTES,
            EntityKind::Invoice => INVOICES,
            EntityKind::InvoiceItem => INVOICE_ITEMS,
            EntityKind::LineItem => LINE_ITEMS,
            EntityKind::Plan => PLANS,
            EntityKind::Refund => REFUNDS,
            EntityKind::Subscription => SUBSCRIPTIONS,
            EntityKind::SubscriptionItem => SUBSCRIPTION_ITEMS,
        }
    }

    /// Owner type tag of this kind's rows in the metadata table. Kinds the
    /// provider gives no metadata map have none.
    pub fn metadata_owner(&self) -> Option<&'static str> {
        match self {
            EntityKind::Customer => Some("customer"),
            EntityKind::Card => Some("card"),
            EntityKind::Charge => Some("charge"),
            EntityKind::Coupon => Some("coupon"),
            EntityKind::Dispute => Some("dispute"),
            EntityKind::Invoice => Some("invoice"),
            EntityKind::InvoiceItem => Some("invoice_item"),
            EntityKind::LineItem => Some("invoice_line_item"),
            EntityKind::Plan => Some("plan"),
            EntityKind::Refund => Some("refund"),
            EntityKind::Subscription => Some("subscription"),
            EntityKind::Discount | EntityKind::SubscriptionItem => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MirrorError;

    /// Accepts the kind name (`invoice_item`) or its table name (`invoice_items`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted || kind.table().name == wanted)
            .ok_or_else(|| {
                MirrorError::Unsupported(format!(
                    "unknown entity kind '{}'; expected one of: {}",
                    s,
                    EntityKind::ALL
                        .iter()
                        .map(|k| k.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// A collection that can be fully synced on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncTarget {
    Charges,
    Coupons,
    Customers,
    Disputes,
    InvoiceItems,
    Invoices,
    Plans,
    Refunds,
    Subscriptions,
}

impl SyncTarget {
    pub const ALL: [SyncTarget; 9] = [
        SyncTarget::Charges,
        SyncTarget::Coupons,
        SyncTarget::Customers,
        SyncTarget::Disputes,
        SyncTarget::InvoiceItems,
        SyncTarget::Invoices,
        SyncTarget::Plans,
        SyncTarget::Refunds,
        SyncTarget::Subscriptions,
    ];

    pub fn selector(&self) -> &'static str {
        match self {
            SyncTarget::Charges => "charges",
            SyncTarget::Coupons => "coupons",
            SyncTarget::Customers => "customers",
            SyncTarget::Disputes => "disputes",
            SyncTarget::InvoiceItems => "invoice_items",
            SyncTarget::Invoices => "invoices",
            SyncTarget::Plans => "plans",
            SyncTarget::Refunds => "refunds",
            SyncTarget::Subscriptions => "subscriptions",
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            SyncTarget::Charges => EntityKind::Charge,
            SyncTarget::Coupons => EntityKind::Coupon,
            SyncTarget::Customers => EntityKind::Customer,
            SyncTarget::Disputes => EntityKind::Dispute,
            SyncTarget::InvoiceItems => EntityKind::InvoiceItem,
            SyncTarget::Invoices => EntityKind::Invoice,
            SyncTarget::Plans => EntityKind::Plan,
            SyncTarget::Refunds => EntityKind::Refund,
            SyncTarget::Subscriptions => EntityKind::Subscription,
        }
    }

    /// Extra list parameters; canceled subscriptions are only listed on request.
    pub fn list_filters(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SyncTarget::Subscriptions => &[("status", "all")],
            _ => &[],
        }
    }

    pub fn valid_selectors() -> String {
        SyncTarget::ALL
            .iter()
            .map(|t| t.selector())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Resolve CLI selectors. No selectors means every target; any unknown
    /// selector rejects the whole list before work starts.
    pub fn parse_selectors<S: AsRef<str>>(selectors: &[S]) -> Result<Vec<SyncTarget>, MirrorError> {
        if selectors.is_empty() {
            return Ok(SyncTarget::ALL.to_vec());
        }

        let mut targets = Vec::new();
        let mut unknown = Vec::new();
        for selector in selectors {
            let selector = selector.as_ref();
            match selector.parse::<SyncTarget>() {
                Ok(target) if !targets.contains(&target) => targets.push(target),
                Ok(_) => {}
                Err(_) => unknown.push(selector.to_string()),
            }
        }

        if !unknown.is_empty() {
            return Err(MirrorError::UnknownSelector {
                given: unknown.join(", "),
                valid: SyncTarget::valid_selectors(),
            });
        }
        Ok(targets)
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

impl FromStr for SyncTarget {
    type Err = MirrorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SyncTarget::ALL
            .into_iter()
            .find(|target| target.selector() == wanted)
            .ok_or_else(|| MirrorError::UnknownSelector {
                given: s.to_string(),
                valid: SyncTarget::valid_selectors(),
            })
    }
}
