//! Read models behind the master view and the product detail page.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::importer::{extract_color, extract_size};
use crate::inventory::{Product, ProductVariant, compute_available, variant_label};
use crate::store::StockChange;

pub const PAGE_SIZE: usize = 50;
const MAX_SWATCHES: usize = 6;

/// One line of the master view.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StockRow {
    pub sku: String,
    pub name: String,
    pub variant: Option<String>,
    pub color: Option<String>,
    pub size: Option<String>,
    pub on_hand_current: i64,
    pub on_hand_new: i64,
    pub committed: i64,
    pub incoming: i64,
    pub available: i64,
    #[serde(skip)]
    order: Option<u64>,
}

impl StockRow {
    fn empty(sku: &str, name: &str) -> Self {
        StockRow {
            sku: sku.to_string(),
            name: name.to_string(),
            variant: None,
            color: None,
            size: None,
            on_hand_current: 0,
            on_hand_new: 0,
            committed: 0,
            incoming: 0,
            available: 0,
            order: None,
        }
    }

    fn add(&mut self, current: i64, new: i64, committed: i64, incoming: i64) {
        self.on_hand_current = self.on_hand_current.saturating_add(current);
        self.on_hand_new = self.on_hand_new.saturating_add(new);
        self.committed = self.committed.saturating_add(committed);
        self.incoming = self.incoming.saturating_add(incoming);
    }

    fn keep_earliest(&mut self, order: Option<u64>) {
        self.order = match (self.order, order) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    fn finish(mut self) -> Self {
        self.available = compute_available(self.on_hand_current, self.committed);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Sku,
    #[default]
    SkuColor,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    #[default]
    All,
    In,
    Out,
}

/// Sum product rows per SKU, across locations.
pub fn aggregate_by_sku(products: &[Product]) -> Vec<StockRow> {
    let mut order: Vec<String> = Vec::new();
    let mut by_sku: HashMap<String, StockRow> = HashMap::new();

    for p in products {
        let row = by_sku.entry(p.sku.clone()).or_insert_with(|| {
            order.push(p.sku.clone());
            StockRow::empty(&p.sku, &p.name)
        });
        row.add(p.on_hand_current, p.on_hand_new, p.committed, p.incoming.unwrap_or(0));
        row.keep_earliest(p.import_order);
    }

    let mut rows: Vec<StockRow> = order
        .into_iter()
        .filter_map(|sku| by_sku.remove(&sku))
        .map(StockRow::finish)
        .collect();
    rows.sort_by(compare_rows);
    rows
}

/// Sum per SKU, color and size across locations.
///
/// Variant rows are used when there are any; otherwise color and size are
/// read back from the products' raw columns. Names and import order come from
/// the first product seen for each SKU.
pub fn aggregate_by_variant(products: &[Product], variants: &[ProductVariant]) -> Vec<StockRow> {
    let mut sample: HashMap<&str, &Product> = HashMap::new();
    for p in products {
        sample.entry(p.sku.as_str()).or_insert(p);
    }

    let mut order: Vec<(String, String, String)> = Vec::new();
    let mut by_key: HashMap<(String, String, String), StockRow> = HashMap::new();
    let mut add = |sku: &str, name: &str, color: String, size: String, quantities: [i64; 4], rank: Option<u64>| {
        let key = (sku.to_string(), color.clone(), size.clone());
        let row = by_key.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            let mut row = StockRow::empty(sku, name);
            row.variant = Some(variant_label(&color, &size));
            row.color = Some(color);
            row.size = Some(size);
            row
        });
        row.add(quantities[0], quantities[1], quantities[2], quantities[3]);
        row.keep_earliest(rank);
    };

    if !variants.is_empty() {
        for v in variants {
            let base = sample.get(v.sku.as_str());
            let name = base.map(|p| p.name.as_str()).unwrap_or(v.sku.as_str());
            add(
                &v.sku,
                name,
                v.color.trim().to_string(),
                v.size.trim().to_string(),
                [v.on_hand_current, v.on_hand_new, v.committed, v.incoming],
                base.and_then(|p| p.import_order),
            );
        }
    } else {
        for p in products {
            add(
                &p.sku,
                &p.name,
                extract_color(p).unwrap_or_default(),
                extract_size(p).unwrap_or_default(),
                [p.on_hand_current, p.on_hand_new, p.committed, p.incoming.unwrap_or(0)],
                p.import_order,
            );
        }
    }

    let mut rows: Vec<StockRow> = order
        .into_iter()
        .filter_map(|key| by_key.remove(&key))
        .map(StockRow::finish)
        .collect();
    rows.sort_by(compare_rows);
    rows
}

/// Rows with an import position first, ascending; then by SKU and label.
fn compare_rows(x: &StockRow, y: &StockRow) -> Ordering {
    match (x.order, y.order) {
        (Some(a), Some(b)) if a != b => return a.cmp(&b),
        (Some(_), None) => return Ordering::Less,
        (None, Some(_)) => return Ordering::Greater,
        _ => {}
    }
    x.sku
        .cmp(&y.sku)
        .then_with(|| x.variant.as_deref().unwrap_or("").cmp(y.variant.as_deref().unwrap_or("")))
}

/// Case-insensitive match on name or SKU, then the availability filter.
pub fn filter_rows(rows: &[StockRow], query: &str, availability: Availability) -> Vec<StockRow> {
    let q = query.trim().to_lowercase();
    rows.iter()
        .filter(|r| q.is_empty() || r.name.to_lowercase().contains(&q) || r.sku.to_lowercase().contains(&q))
        .filter(|r| {
            let available = compute_available(r.on_hand_current, r.committed);
            match availability {
                Availability::All => true,
                Availability::In => available > 0,
                Availability::Out => available <= 0,
            }
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub page_count: usize,
    pub total: usize,
}

/// Slice out a 1-based page. There is always at least one page; requests
/// past either end are clamped.
pub fn paginate<T: Clone>(items: &[T], page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let page_count = items.len().div_ceil(page_size).max(1);
    let page = page.clamp(1, page_count);
    let start = (page - 1) * page_size;

    Page {
        items: items.iter().skip(start).take(page_size).cloned().collect(),
        page,
        page_count,
        total: items.len(),
    }
}

/// Master view query as sent by the browser.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub group_by: GroupBy,
    pub page: Option<usize>,
}

pub fn master_view(products: &[Product], variants: &[ProductVariant], query: &MasterQuery) -> Page<StockRow> {
    let rows = match query.group_by {
        GroupBy::Sku => aggregate_by_sku(products),
        GroupBy::SkuColor => aggregate_by_variant(products, variants),
    };
    let filtered = filter_rows(&rows, &query.q, query.availability);
    paginate(&filtered, query.page.unwrap_or(1), PAGE_SIZE)
}

/// Up to six distinct colors known for a SKU, for the swatch column.
pub fn colors_for_sku(products: &[Product], sku: &str) -> Vec<String> {
    let mut colors: Vec<String> = Vec::new();
    let mut push = |c: &str| {
        let c = c.trim();
        if !c.is_empty() && !colors.iter().any(|known| known == c) {
            colors.push(c.to_string());
        }
    };

    for p in products.iter().filter(|p| p.sku == sku) {
        if p.variants.is_empty() {
            if let Some(color) = extract_color(p) {
                push(&color);
            }
        } else {
            for v in &p.variants {
                push(&v.color);
            }
        }
    }

    colors.truncate(MAX_SWATCHES);
    colors
}

/// Sum the location rows of a SKU onto the first one.
pub fn combine(rows: &[Product]) -> Option<Product> {
    let base = rows.first()?;
    let sum = |f: fn(&Product) -> i64| rows.iter().map(f).fold(0i64, i64::saturating_add);

    Some(Product {
        on_hand_current: sum(|r| r.on_hand_current),
        on_hand_new: sum(|r| r.on_hand_new),
        committed: sum(|r| r.committed),
        incoming: Some(sum(|r| r.incoming.unwrap_or(0))),
        unavailable: Some(sum(|r| r.unavailable.unwrap_or(0))),
        ..base.clone()
    })
}

/// Keep variants matching the optional color and size, case-insensitively.
pub fn filter_variants(variants: &[ProductVariant], color: Option<&str>, size: Option<&str>) -> Vec<ProductVariant> {
    let matches = |want: Option<&str>, have: &str| match want.map(str::trim) {
        Some(w) if !w.is_empty() => have.trim().to_lowercase() == w.to_lowercase(),
        _ => true,
    };
    variants
        .iter()
        .filter(|v| matches(color, &v.color) && matches(size, &v.size))
        .cloned()
        .collect()
}

/// The four figures shown at the top of the product page.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StockCards {
    pub stock: i64,
    pub available: i64,
    pub new: i64,
    pub committed: i64,
}

/// Figures from the filtered variants when the SKU has variants at all,
/// otherwise from the combined product.
pub fn stock_cards(product: &Product, all_variants: &[ProductVariant], filtered: &[ProductVariant]) -> StockCards {
    let (stock, new, committed) = if all_variants.is_empty() {
        (product.on_hand_current, product.on_hand_new, product.committed)
    } else {
        filtered.iter().fold((0i64, 0i64, 0i64), |(s, n, c), v| {
            (
                s.saturating_add(v.on_hand_current),
                n.saturating_add(v.on_hand_new),
                c.saturating_add(v.committed),
            )
        })
    };

    StockCards {
        stock,
        available: compute_available(stock, committed),
        new,
        committed,
    }
}

/// Everything the product page renders for one SKU.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub product: Product,
    pub locations: Vec<Product>,
    pub variants: Vec<ProductVariant>,
    pub cards: StockCards,
    pub recent_changes: Vec<StockChange>,
}

pub fn product_detail(
    locations: Vec<Product>,
    variants: Vec<ProductVariant>,
    color: Option<&str>,
    size: Option<&str>,
    recent_changes: Vec<StockChange>,
) -> Option<ProductDetail> {
    let product = combine(&locations)?;
    let filtered = filter_variants(&variants, color, size);
    let cards = stock_cards(&product, &variants, &filtered);

    Some(ProductDetail {
        product,
        locations,
        variants: filtered,
        cards,
        recent_changes,
    })
}
