//! Event payloads carried on the message broker.
//!
//! Bodies are plain JSON objects with an `event_type` discriminator, matching
//! what downstream consumers and the failed-message ledger expect.

use chrono::{DateTime, Utc};
use common::{OrderId, SkuId};
use serde::{Deserialize, Serialize};

/// Emitted once per created order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreated {
    pub event_type: String,
    pub order_id: OrderId,
    pub created_at: DateTime<Utc>,
}

impl OrderCreated {
    pub fn new(order_id: OrderId) -> Self {
        Self {
            event_type: "order_created".to_string(),
            order_id,
            created_at: Utc::now(),
        }
    }
}

/// Emitted once per order item to drive the authoritative stock decrement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryDeduct {
    pub event_type: String,
    pub order_id: OrderId,
    pub sku_id: SkuId,
    pub quantity: u32,
    pub created_at: DateTime<Utc>,
}

impl InventoryDeduct {
    pub fn new(order_id: OrderId, sku_id: SkuId, quantity: u32) -> Self {
        Self {
            event_type: "inventory_deduct".to_string(),
            order_id,
            sku_id,
            quantity,
            created_at: Utc::now(),
        }
    }
}

/// Delayed event that cancels the order if still unpaid when it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderTimeout {
    pub event_type: String,
    pub order_id: OrderId,
    pub delay_seconds: u64,
    pub created_at: DateTime<Utc>,
}

impl OrderTimeout {
    pub fn new(order_id: OrderId, delay_seconds: u64) -> Self {
        Self {
            event_type: "order_timeout".to_string(),
            order_id,
            delay_seconds,
            created_at: Utc::now(),
        }
    }
}

/// One SKU/quantity pair to return to stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackItem {
    pub sku_id: SkuId,
    pub quantity: u32,
}

/// Emitted when a cancelled order's reservations must be returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryRollback {
    pub event_type: String,
    pub order_id: OrderId,
    pub items: Vec<RollbackItem>,
    pub created_at: DateTime<Utc>,
}

impl InventoryRollback {
    pub fn new(order_id: OrderId, items: Vec<RollbackItem>) -> Self {
        Self {
            event_type: "inventory_rollback".to_string(),
            order_id,
            items,
            created_at: Utc::now(),
        }
    }
}

/// The two rollback payload shapes observed on the wire.
///
/// Older producers sent flat `sku_id`/`quantity` fields, newer ones an
/// `items` array. Both are resolved to one canonical item list at the
/// consumer boundary before any business logic runs.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RollbackShape {
    ItemsForm { items: Vec<RollbackItem> },
    FlatForm { sku_id: SkuId, quantity: u32 },
}

impl RollbackShape {
    /// Resolves either shape into the canonical item list.
    pub fn canonical(self) -> Vec<RollbackItem> {
        match self {
            RollbackShape::ItemsForm { items } => items,
            RollbackShape::FlatForm { sku_id, quantity } => {
                vec![RollbackItem { sku_id, quantity }]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        assert_eq!(OrderCreated::new(OrderId::new(1)).event_type, "order_created");
        assert_eq!(
            InventoryDeduct::new(OrderId::new(1), SkuId::new(2), 3).event_type,
            "inventory_deduct"
        );
        assert_eq!(OrderTimeout::new(OrderId::new(1), 60).event_type, "order_timeout");
        assert_eq!(
            InventoryRollback::new(OrderId::new(1), vec![]).event_type,
            "inventory_rollback"
        );
    }

    #[test]
    fn test_rollback_items_form() {
        let json = serde_json::json!({
            "event_type": "inventory_rollback",
            "order_id": 9,
            "items": [{"sku_id": 5, "quantity": 2}],
            "created_at": "2025-01-01T00:00:00Z"
        });
        let shape: RollbackShape = serde_json::from_value(json).unwrap();
        assert_eq!(
            shape.canonical(),
            vec![RollbackItem {
                sku_id: SkuId::new(5),
                quantity: 2
            }]
        );
    }

    #[test]
    fn test_rollback_flat_form() {
        let json = serde_json::json!({
            "order_id": 9,
            "sku_id": 5,
            "quantity": 2
        });
        let shape: RollbackShape = serde_json::from_value(json).unwrap();
        assert_eq!(
            shape.canonical(),
            vec![RollbackItem {
                sku_id: SkuId::new(5),
                quantity: 2
            }]
        );
    }

    #[test]
    fn test_deduct_roundtrip() {
        let event = InventoryDeduct::new(OrderId::new(10), SkuId::new(20), 4);
        let json = serde_json::to_string(&event).unwrap();
        let back: InventoryDeduct = serde_json::from_str(&json).unwrap();
        assert_eq!(back.order_id, event.order_id);
        assert_eq!(back.sku_id, event.sku_id);
        assert_eq!(back.quantity, 4);
    }
}
