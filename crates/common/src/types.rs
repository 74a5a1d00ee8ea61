use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Creates an identifier from a raw database value.
            pub fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw database value.
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

id_type!(
    /// Surrogate key of an order row.
    ///
    /// Wraps the database integer to prevent mixing it up with the other
    /// integer-backed identifiers flowing through message payloads.
    OrderId
);

id_type!(
    /// Identifier of a sellable SKU.
    SkuId
);

id_type!(
    /// Identifier of the goods (spu) a SKU belongs to.
    GoodsId
);

id_type!(
    /// Identifier of the user placing an order.
    UserId
);

id_type!(
    /// Identifier of a shipping address.
    AddressId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_raw_value() {
        let id = SkuId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(SkuId::from(42), id);
    }

    #[test]
    fn id_serializes_transparently() {
        let id = OrderId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn distinct_id_types_display_raw_value() {
        assert_eq!(UserId::new(3).to_string(), "3");
        assert_eq!(AddressId::new(9).to_string(), "9");
        assert_eq!(GoodsId::new(1).to_string(), "1");
    }
}
