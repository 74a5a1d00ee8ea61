//! Order and payment state machines.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised when decoding an unknown status code from storage.
#[derive(Debug, Error)]
#[error("unknown {kind} code: {code}")]
pub struct StatusError {
    pub kind: &'static str,
    pub code: i16,
}

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──┬──► Paid ──► Shipped ──► Completed
///           │     │
///           │     └──► Refunded
///           └──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order created, awaiting payment.
    #[default]
    Pending,

    /// Payment confirmed.
    Paid,

    /// Goods handed to the carrier.
    Shipped,

    /// Order fulfilled (terminal state).
    Completed,

    /// Order cancelled before payment (terminal state).
    Cancelled,

    /// Payment returned after the fact (terminal state).
    Refunded,
}

impl OrderStatus {
    /// Storage code used in the `orders.status` column.
    pub fn as_i16(&self) -> i16 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Paid => 1,
            OrderStatus::Shipped => 2,
            OrderStatus::Completed => 3,
            OrderStatus::Cancelled => 4,
            OrderStatus::Refunded => 5,
        }
    }

    /// Decodes a storage code.
    pub fn from_i16(code: i16) -> Result<Self, StatusError> {
        match code {
            0 => Ok(OrderStatus::Pending),
            1 => Ok(OrderStatus::Paid),
            2 => Ok(OrderStatus::Shipped),
            3 => Ok(OrderStatus::Completed),
            4 => Ok(OrderStatus::Cancelled),
            5 => Ok(OrderStatus::Refunded),
            code => Err(StatusError {
                kind: "order status",
                code,
            }),
        }
    }

    /// Returns true if the order can still be paid in this state.
    pub fn can_pay(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can be refunded in this state.
    pub fn can_refund(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Shipped)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payment state tracked independently of the order status.
///
/// `Paid` never coexists with `OrderStatus::Cancelled`; the cancellation
/// paths require `Unpaid` in their conditional updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PayStatus {
    /// No successful payment recorded.
    #[default]
    Unpaid,

    /// Payment settled.
    Paid,

    /// Payment returned.
    Refunded,
}

impl PayStatus {
    /// Storage code used in the `orders.pay_status` column.
    pub fn as_i16(&self) -> i16 {
        match self {
            PayStatus::Unpaid => 0,
            PayStatus::Paid => 1,
            PayStatus::Refunded => 2,
        }
    }

    /// Decodes a storage code.
    pub fn from_i16(code: i16) -> Result<Self, StatusError> {
        match code {
            0 => Ok(PayStatus::Unpaid),
            1 => Ok(PayStatus::Paid),
            2 => Ok(PayStatus::Refunded),
            code => Err(StatusError {
                kind: "pay status",
                code,
            }),
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayStatus::Unpaid => "unpaid",
            PayStatus::Paid => "paid",
            PayStatus::Refunded => "refunded",
        }
    }
}

impl std::fmt::Display for PayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
