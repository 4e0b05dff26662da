//! Business events read from the append-only event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

/// An immutable record of a business occurrence (e.g. a sale approved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    pub id: Uuid,
    /// Sale this event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sale_id: Option<String>,
    /// Product scope used when matching product-restricted endpoints.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    /// Event type, e.g. `compra.aprovada`.
    pub event_type: String,
    /// Event data as recorded at the time of the occurrence.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// When the event happened.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event happening now.
    pub fn new(event_type: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            sale_id: None,
            product_id: None,
            event_type: event_type.into(),
            metadata,
            created_at: Utc::now(),
        }
    }

    /// Builder: link to a sale.
    pub fn with_sale(mut self, sale_id: impl Into<String>) -> Self {
        self.sale_id = Some(sale_id.into());
        self
    }

    /// Builder: scope to a product.
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    /// Builder: override the occurrence time.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// The JSON document delivered to endpoints for this event.
    ///
    /// Built once at enqueue time and stored on the job, so a delayed
    /// delivery still carries the data as it was when the event happened.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "event_id": self.id,
            "event_type": self.event_type,
            "created_at": self.created_at.to_rfc3339(),
            "data": self.metadata,
        })
    }
}

/// Event types producers can subscribe to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter,
)]
pub enum EventKind {
    #[strum(serialize = "compra.aprovada")]
    PurchaseApproved,
    #[strum(serialize = "compra.recusada")]
    PurchaseRefused,
    #[strum(serialize = "compra.reembolsada")]
    PurchaseRefunded,
    #[strum(serialize = "compra.chargeback")]
    PurchaseChargeback,
    #[strum(serialize = "pix.gerado")]
    PixGenerated,
    #[strum(serialize = "boleto.gerado")]
    BoletoGenerated,
    #[strum(serialize = "carrinho.abandonado")]
    CartAbandoned,
    #[strum(serialize = "assinatura.cancelada")]
    SubscriptionCanceled,
    #[strum(serialize = "assinatura.renovada")]
    SubscriptionRenewed,
    #[strum(serialize = "assinatura.atrasada")]
    SubscriptionLate,
}

impl EventKind {
    /// Order status reported for this kind of event.
    pub fn order_status(&self) -> &'static str {
        match self {
            Self::PurchaseApproved | Self::SubscriptionRenewed => "paid",
            Self::PurchaseRefused => "refused",
            Self::PurchaseRefunded => "refunded",
            Self::PurchaseChargeback => "chargedback",
            Self::PixGenerated | Self::BoletoGenerated => "waiting_payment",
            Self::CartAbandoned => "abandoned",
            Self::SubscriptionCanceled => "canceled",
            Self::SubscriptionLate => "overdue",
        }
    }

    /// Payment method reported for this kind of event.
    pub fn payment_method(&self) -> &'static str {
        match self {
            Self::PixGenerated => "pix",
            Self::BoletoGenerated => "boleto",
            _ => "credit_card",
        }
    }

    /// Whether the event concerns a subscription.
    pub fn is_subscription(&self) -> bool {
        matches!(
            self,
            Self::SubscriptionCanceled | Self::SubscriptionRenewed | Self::SubscriptionLate
        )
    }
}
