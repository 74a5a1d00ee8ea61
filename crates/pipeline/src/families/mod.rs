//! Concrete consumer families, one per queue group.

pub mod inventory;
pub mod orders;

pub use inventory::InventoryFamily;
pub use orders::OrderEventsFamily;
