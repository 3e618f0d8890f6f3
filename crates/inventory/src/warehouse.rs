use serde::{Deserialize, Serialize};

use crate::ids::WarehouseId;

/// A physical storage location stock records live in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub active: bool,
}

impl Warehouse {
    pub fn new(id: WarehouseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
        }
    }

    /// Case-insensitive substring match against any of `keywords`.
    pub fn name_matches_any(&self, keywords: &[String]) -> bool {
        let name = self.name.to_lowercase();
        keywords
            .iter()
            .any(|k| !k.trim().is_empty() && name.contains(&k.trim().to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::AggregateId;

    #[test]
    fn name_match_ignores_case_and_blank_keywords() {
        let w = Warehouse::new(WarehouseId::new(AggregateId::new()), "Almacén PRINCIPAL Norte");
        assert!(w.name_matches_any(&["principal".to_string()]));
        assert!(!w.name_matches_any(&["general".to_string(), "  ".to_string()]));
    }
}
