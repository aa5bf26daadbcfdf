use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Location assumed for imported rows that leave the column blank.
pub const DEFAULT_LOCATION: &str = "Liberty";

/// Stock held for one SKU at one location.
///
/// `on_hand_new` is a staged count that only becomes `on_hand_current` when
/// committed. `returns` counts pending customer returns; imports reset it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub handle: Option<String>,
    pub location: String,
    pub on_hand_current: i64,
    pub on_hand_new: i64,
    pub committed: i64,
    pub returns: i64,
    pub incoming: Option<i64>,
    pub unavailable: Option<i64>,
    /// Header order of the file this row came from
    pub raw_headers: Vec<String>,
    /// Every column of the source row, keyed by header
    pub raw_row: BTreeMap<String, String>,
    /// 1-based position of the earliest source row in its file
    pub import_order: Option<u64>,
    pub variants: Vec<ColorVariant>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    pub fn new(sku: &str, location: &str) -> Self {
        Product {
            sku: sku.to_string(),
            name: String::new(),
            handle: None,
            location: location.to_string(),
            on_hand_current: 0,
            on_hand_new: 0,
            committed: 0,
            returns: 0,
            incoming: None,
            unavailable: None,
            raw_headers: Vec::new(),
            raw_row: BTreeMap::new(),
            import_order: None,
            variants: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn available(&self) -> i64 {
        compute_available(self.on_hand_current, self.committed)
    }

    pub fn total(&self) -> i64 {
        compute_total(self.on_hand_current, self.committed, self.returns)
    }
}

/// Per-color totals of the rows folded into one product.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ColorVariant {
    pub color: String,
    pub on_hand_current: i64,
    pub on_hand_new: i64,
    pub committed: i64,
    pub incoming: i64,
    pub unavailable: i64,
}

/// One color/size combination of a SKU at a location.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct ProductVariant {
    pub id: u64,
    pub sku: String,
    pub location: String,
    pub color: String,
    pub size: String,
    pub on_hand_current: i64,
    pub on_hand_new: i64,
    pub committed: i64,
    pub incoming: i64,
    pub unavailable: i64,
    pub raw: BTreeMap<String, String>,
}

impl ProductVariant {
    /// A base variant carries no color and no size; it mirrors its product row.
    pub fn is_base(&self) -> bool {
        self.color.trim().is_empty() && self.size.trim().is_empty()
    }

    /// `"Red / M"`, `"Red"`, or `"Unspecified"`.
    pub fn label(&self) -> String {
        variant_label(&self.color, &self.size)
    }
}

pub fn variant_label(color: &str, size: &str) -> String {
    let parts: Vec<&str> = [color.trim(), size.trim()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();
    if parts.is_empty() {
        "Unspecified".to_string()
    } else {
        parts.join(" / ")
    }
}

/// A row of the Shopify-shaped `inventory` table, unique on `variant_key`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Default)]
pub struct InventoryRecord {
    pub handle: String,
    pub title: String,
    pub option1_name: String,
    pub option1_value: String,
    pub option2_name: String,
    pub option2_value: String,
    pub option3_name: String,
    pub option3_value: String,
    pub sku: String,
    pub hs_code: String,
    pub coo: String,
    pub location: String,
    pub bin_name: String,
    pub incoming: i64,
    pub unavailable: i64,
    pub committed: i64,
    pub available: i64,
    pub on_hand_current: i64,
    pub on_hand_new: i64,
    pub variant_key: String,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus {
    Restocked,
    NotRestocked,
    InTransit,
}

pub fn compute_available(on_hand: i64, committed: i64) -> i64 {
    on_hand.saturating_sub(committed)
}

pub fn compute_total(on_hand: i64, committed: i64, returns: i64) -> i64 {
    on_hand.saturating_add(returns).saturating_sub(committed)
}

pub fn handle_order_placed(product: &Product, quantity: i64) -> Product {
    Product {
        committed: product.committed.saturating_add(quantity).max(0),
        ..product.clone()
    }
}

pub fn handle_order_fulfilled(product: &Product, quantity: i64) -> Product {
    Product {
        on_hand_current: product.on_hand_current.saturating_sub(quantity).max(0),
        committed: product.committed.saturating_sub(quantity).max(0),
        ..product.clone()
    }
}

pub fn handle_return(product: &Product, quantity: i64, status: ReturnStatus) -> Product {
    match status {
        ReturnStatus::Restocked => Product {
            on_hand_current: product.on_hand_current.saturating_add(quantity),
            returns: product.returns.saturating_sub(quantity).max(0),
            ..product.clone()
        },
        ReturnStatus::NotRestocked => product.clone(),
        // Pending: counted as a return until it arrives
        ReturnStatus::InTransit => Product {
            returns: product.returns.saturating_add(quantity),
            ..product.clone()
        },
    }
}
