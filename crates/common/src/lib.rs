pub mod types;

pub use types::{AddressId, GoodsId, OrderId, SkuId, UserId};
