//! Order status machine.

use serde::{Deserialize, Serialize};

/// Where an order is in its lifecycle.
///
/// ```text
/// New ──► In Progress ──► Finished ──► Closed
/// ```
///
/// Every transition moves exactly one step to the right.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum OrderStatus {
    /// Posted by a customer, collecting applicants.
    #[default]
    New,

    /// A driver was assigned.
    #[serde(rename = "In Progress")]
    InProgress,

    /// The driver reported the delivery done.
    Finished,

    /// The customer rated the driver (terminal).
    Closed,
}

impl OrderStatus {
    /// Drivers may still apply.
    pub fn accepts_applicants(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    pub fn can_assign(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    pub fn can_finish(&self) -> bool {
        matches!(self, OrderStatus::InProgress)
    }

    pub fn can_close(&self) -> bool {
        matches!(self, OrderStatus::Finished)
    }

    /// The creator may remove the order.
    pub fn can_delete(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::InProgress => "In Progress",
            OrderStatus::Finished => "Finished",
            OrderStatus::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
