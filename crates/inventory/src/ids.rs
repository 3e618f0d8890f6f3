use serde::{Deserialize, Serialize};

use stockledger_core::AggregateId;

macro_rules! aggregate_newtype {
    ($(#[$meta:meta])* $t:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

aggregate_newtype!(
    /// Product identifier (owned by the catalogue subsystem).
    ProductId
);
aggregate_newtype!(
    /// Warehouse identifier.
    WarehouseId
);
aggregate_newtype!(
    /// Stock record identifier; movements reference it as a foreign key.
    StockRecordId
);
