pub mod events;
pub mod money;
pub mod order_no;
pub mod status;

pub use events::{
    InventoryDeduct, InventoryRollback, OrderCreated, OrderTimeout, RollbackItem, RollbackShape,
};
pub use money::Money;
pub use order_no::generate_order_no;
pub use status::{OrderStatus, PayStatus, StatusError};
