use serde::{Deserialize, Serialize};

use herdledger_core::{ItemId, LocationId};

/// What kind of thing a stock position counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// A live animal; one unit per registered head.
    Livestock,
    /// A stocked good (feed, medication, processed meat, ...).
    InventoryItem,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Livestock => "livestock",
            ItemType::InventoryItem => "inventory_item",
        }
    }
}

/// Ledger key: one stock position (and one lot list) per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub item_type: ItemType,
    pub item_id: ItemId,
    /// `None` means "not tracked per location".
    pub location_id: Option<LocationId>,
}

impl StockKey {
    pub fn new(item_type: ItemType, item_id: ItemId, location_id: Option<LocationId>) -> Self {
        Self {
            item_type,
            item_id,
            location_id,
        }
    }

    pub fn livestock(unit_id: ItemId, location_id: Option<LocationId>) -> Self {
        Self::new(ItemType::Livestock, unit_id, location_id)
    }

    pub fn inventory_item(item_id: ItemId, location_id: Option<LocationId>) -> Self {
        Self::new(ItemType::InventoryItem, item_id, location_id)
    }

    /// Same item at another location.
    pub fn at(self, location_id: Option<LocationId>) -> Self {
        Self {
            location_id,
            ..self
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.item_type.as_str(), self.item_id)?;
        match self.location_id {
            Some(loc) => write!(f, "@{loc}"),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_location_when_present() {
        let item = ItemId::new();
        let loc = LocationId::new();
        assert_eq!(
            StockKey::livestock(item, None).to_string(),
            format!("livestock:{item}")
        );
        assert_eq!(
            StockKey::inventory_item(item, Some(loc)).to_string(),
            format!("inventory_item:{item}@{loc}")
        );
    }

    #[test]
    fn location_is_part_of_identity() {
        let item = ItemId::new();
        let a = StockKey::inventory_item(item, Some(LocationId::new()));
        let b = a.at(Some(LocationId::new()));
        assert_ne!(a, b);
        assert_eq!(a.item_id, b.item_id);
    }
}
