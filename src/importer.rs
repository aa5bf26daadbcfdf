//! Turning uploaded stock sheets into table rows.
//!
//! Two file shapes are accepted. The master-view import reads loosely named
//! columns (`Committed` or `Committed (not editable)`, and so on), folds rows
//! that share a SKU and location, and also produces one variant row per source
//! row. The Shopify inventory import reads the fixed 19-column layout and keys
//! each row by its variant key.

use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::csv_format::{CsvTable, parse_quantity, read_table};
use crate::error::ImportError;
use crate::inventory::{ColorVariant, InventoryRecord, Product, ProductVariant};
use crate::variant::{ProductKey, VariantKey, build_variant_key};

/// The fixed header layout of the Shopify inventory sheet.
pub const SHOPIFY_HEADERS: [&str; 19] = [
    "Handle",
    "Title",
    "Option1 Name",
    "Option1 Value",
    "Option2 Name",
    "Option2 Value",
    "Option3 Name",
    "Option3 Value",
    "SKU",
    "HS Code",
    "COO",
    "Location",
    "Bin name",
    "Incoming",
    "Unavailable",
    "Committed",
    "Available",
    "On hand (current)",
    "On hand (new)",
];

const OPTION_PAIRS: [(&str, &str); 3] = [
    ("option1 name", "option1 value"),
    ("option2 name", "option2 value"),
    ("option3 name", "option3 value"),
];

/// Column positions used by the master-view import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductColumns {
    pub sku: Option<usize>,
    pub title: Option<usize>,
    pub location: Option<usize>,
    pub incoming: Option<usize>,
    pub unavailable: Option<usize>,
    pub committed: Option<usize>,
    pub on_hand_current: Option<usize>,
    pub on_hand_new: Option<usize>,
    pub handle: Option<usize>,
}

impl ProductColumns {
    pub fn resolve(table: &CsvTable) -> Self {
        ProductColumns {
            sku: table.column(&["sku"]),
            title: table.column(&["title", "name"]),
            location: table.column(&["location"]),
            incoming: table.column(&["incoming (not editable)", "incoming"]),
            unavailable: table.column(&["unavailable (not editable)", "unavailable"]),
            committed: table.column(&["committed (not editable)", "committed"]),
            on_hand_current: table.column(&["on hand (current)", "onhand (current)", "onhandcurrent"]),
            on_hand_new: table.column(&["on hand (new)", "onhand (new)", "onhandnew"]),
            handle: table.column(&["handle"]),
        }
    }
}

/// Rows of one master-view upload, before any folding.
#[derive(Debug, Clone, Default)]
pub struct ParsedImport {
    pub headers: Vec<String>,
    pub products: Vec<Product>,
}

pub fn parse_products(text: &str, default_location: &str) -> Result<ParsedImport, ImportError> {
    let mut table = read_table(text)?;
    for header in table.headers.iter_mut() {
        *header = header.trim().to_string();
    }
    let columns = ProductColumns::resolve(&table);

    let mut products = Vec::new();
    for (index, cols) in table.rows.iter().enumerate() {
        let cell = |i: Option<usize>| i.and_then(|i| cols.get(i)).map(String::as_str);
        let text = |i: Option<usize>| cell(i).unwrap_or("").trim().to_string();

        let sku = text(columns.sku);
        if sku.is_empty() {
            continue;
        }
        let mut location = text(columns.location);
        if location.is_empty() {
            location = default_location.to_string();
        }

        let on_hand_current = parse_quantity(cell(columns.on_hand_current), None);
        let on_hand_new = match columns.on_hand_new {
            Some(_) => parse_quantity(cell(columns.on_hand_new), None),
            None => on_hand_current,
        };

        let mut product = Product::new(&sku, &location);
        product.name = text(columns.title);
        product.handle = columns.handle.map(|_| text(columns.handle));
        product.on_hand_current = on_hand_current;
        product.on_hand_new = on_hand_new;
        product.committed = parse_quantity(cell(columns.committed), None);
        product.incoming = columns.incoming.map(|_| parse_quantity(cell(columns.incoming), None));
        product.unavailable = columns
            .unavailable
            .map(|_| parse_quantity(cell(columns.unavailable), None));
        product.raw_headers = table.headers.clone();
        product.raw_row = table
            .headers
            .iter()
            .enumerate()
            .map(|(c, h)| (h.clone(), cols.get(c).cloned().unwrap_or_default()))
            .collect();
        product.import_order = Some(index as u64 + 1);

        products.push(product);
    }

    debug!("Parsed {} product rows from {} data lines", products.len(), table.rows.len());

    Ok(ParsedImport {
        headers: table.headers,
        products,
    })
}

/// Value of the first `OptionN Value` whose `OptionN Name` is `option_name`.
pub fn extract_option(
    raw_row: &BTreeMap<String, String>,
    raw_headers: &[String],
    option_name: &str,
) -> Option<String> {
    let lower: Vec<String> = raw_headers.iter().map(|h| h.to_lowercase()).collect();
    let wanted = option_name.to_lowercase();

    OPTION_PAIRS.iter().find_map(|(name_header, value_header)| {
        let n = lower.iter().position(|h| h == name_header)?;
        let v = lower.iter().position(|h| h == value_header)?;
        let name = raw_row.get(&raw_headers[n]).map(|s| s.trim().to_lowercase())?;
        let value = raw_row.get(&raw_headers[v]).map(|s| s.trim().to_string())?;
        (name == wanted && !value.is_empty()).then_some(value)
    })
}

pub fn extract_color(product: &Product) -> Option<String> {
    extract_option(&product.raw_row, &product.raw_headers, "color")
}

pub fn extract_size(product: &Product) -> Option<String> {
    extract_option(&product.raw_row, &product.raw_headers, "size")
}

/// Products folded by SKU and location.
#[derive(Debug, Clone, Default)]
pub struct CollapsedImport {
    pub products: Vec<Product>,
    pub duplicates: usize,
}

/// Fold rows that share a SKU and location, summing their quantities.
///
/// The first row of each key supplies everything but the sums; a later
/// non-empty title and a later handle replace earlier ones. Output keeps the
/// order in which keys first appear.
pub fn collapse_by_sku_location(parsed: &[Product]) -> CollapsedImport {
    let mut order: Vec<ProductKey> = Vec::new();
    let mut by_key: HashMap<ProductKey, Product> = HashMap::new();

    for p in parsed {
        let key = ProductKey::of(p);
        match by_key.get_mut(&key) {
            None => {
                order.push(key.clone());
                by_key.insert(key, p.clone());
            }
            Some(existing) => {
                if !p.name.is_empty() {
                    existing.name = p.name.clone();
                }
                if p.handle.is_some() {
                    existing.handle = p.handle.clone();
                }
                existing.on_hand_current = existing.on_hand_current.saturating_add(p.on_hand_current);
                existing.on_hand_new = existing.on_hand_new.saturating_add(p.on_hand_new);
                existing.committed = existing.committed.saturating_add(p.committed);
                existing.incoming = Some(existing.incoming.unwrap_or(0).saturating_add(p.incoming.unwrap_or(0)));
                existing.unavailable =
                    Some(existing.unavailable.unwrap_or(0).saturating_add(p.unavailable.unwrap_or(0)));
                existing.import_order = match (existing.import_order, p.import_order) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                };
            }
        }
    }

    let products: Vec<Product> = order
        .into_iter()
        .filter_map(|key| {
            let mut base = by_key.remove(&key)?;
            base.variants = color_summaries(parsed.iter().filter(|p| ProductKey::of(p) == key));
            Some(base)
        })
        .collect();

    CollapsedImport {
        duplicates: parsed.len() - products.len(),
        products,
    }
}

fn color_summaries<'a>(rows: impl Iterator<Item = &'a Product>) -> Vec<ColorVariant> {
    let mut summaries: Vec<ColorVariant> = Vec::new();
    for p in rows {
        let Some(color) = extract_color(p) else {
            continue;
        };
        let position = match summaries.iter().position(|v| v.color == color) {
            Some(i) => i,
            None => {
                summaries.push(ColorVariant {
                    color,
                    ..ColorVariant::default()
                });
                summaries.len() - 1
            }
        };
        let v = &mut summaries[position];
        v.on_hand_current = v.on_hand_current.saturating_add(p.on_hand_current);
        v.on_hand_new = v.on_hand_new.saturating_add(p.on_hand_new);
        v.committed = v.committed.saturating_add(p.committed);
        v.incoming = v.incoming.saturating_add(p.incoming.unwrap_or(0));
        v.unavailable = v.unavailable.saturating_add(p.unavailable.unwrap_or(0));
    }
    summaries
}

/// One variant row per parsed row, color and size taken from the option columns.
pub fn variant_rows(parsed: &[Product]) -> Vec<ProductVariant> {
    parsed
        .iter()
        .map(|p| ProductVariant {
            id: 0,
            sku: p.sku.clone(),
            location: p.location.clone(),
            color: extract_color(p).unwrap_or_default(),
            size: extract_size(p).unwrap_or_default(),
            on_hand_current: p.on_hand_current,
            on_hand_new: p.on_hand_new,
            committed: p.committed,
            incoming: p.incoming.unwrap_or(0),
            unavailable: p.unavailable.unwrap_or(0),
            raw: p.raw_row.clone(),
        })
        .collect()
}

/// Fold variant rows sharing SKU, location, color and size. Quantities are
/// summed and raw columns merged with later rows winning.
pub fn collapse_variants(items: Vec<ProductVariant>) -> Vec<ProductVariant> {
    let mut order: Vec<VariantKey> = Vec::new();
    let mut by_key: HashMap<VariantKey, ProductVariant> = HashMap::new();

    for mut v in items {
        v.color = v.color.trim().to_string();
        v.size = v.size.trim().to_string();
        let key = VariantKey::of(&v);
        match by_key.get_mut(&key) {
            None => {
                order.push(key.clone());
                by_key.insert(key, v);
            }
            Some(prev) => {
                prev.on_hand_current = prev.on_hand_current.saturating_add(v.on_hand_current);
                prev.on_hand_new = prev.on_hand_new.saturating_add(v.on_hand_new);
                prev.committed = prev.committed.saturating_add(v.committed);
                prev.incoming = prev.incoming.saturating_add(v.incoming);
                prev.unavailable = prev.unavailable.saturating_add(v.unavailable);
                prev.raw.extend(v.raw);
            }
        }
    }

    order.into_iter().filter_map(|key| by_key.remove(&key)).collect()
}

/// Parse the fixed Shopify layout. Every data row is kept, keyed by its
/// variant key; `On hand (new)` falls back to `On hand (current)`.
pub fn parse_inventory_records(text: &str) -> Result<Vec<InventoryRecord>, ImportError> {
    let table = read_table(text)?;
    let lower: Vec<String> = table.headers.iter().map(|h| h.trim().to_lowercase()).collect();
    let index = |name: &str| lower.iter().position(|h| *h == name.to_lowercase());
    let idx: HashMap<&str, Option<usize>> = SHOPIFY_HEADERS.iter().map(|h| (*h, index(h))).collect();

    let records = table
        .rows
        .iter()
        .map(|cols| {
            let get = |name: &str| {
                idx.get(name)
                    .copied()
                    .flatten()
                    .and_then(|i| cols.get(i))
                    .map(String::as_str)
                    .unwrap_or("")
            };
            let text = |name: &str| get(name).trim().to_string();
            let number = |name: &str| parse_quantity(Some(get(name)), None);

            let on_hand_current = number("On hand (current)");
            let mut record = InventoryRecord {
                handle: text("Handle"),
                title: text("Title"),
                option1_name: text("Option1 Name"),
                option1_value: text("Option1 Value"),
                option2_name: text("Option2 Name"),
                option2_value: text("Option2 Value"),
                option3_name: text("Option3 Name"),
                option3_value: text("Option3 Value"),
                sku: text("SKU"),
                hs_code: text("HS Code"),
                coo: text("COO"),
                location: text("Location"),
                bin_name: text("Bin name"),
                incoming: number("Incoming"),
                unavailable: number("Unavailable"),
                committed: number("Committed"),
                available: number("Available"),
                on_hand_current,
                on_hand_new: parse_quantity(Some(get("On hand (new)")), Some(on_hand_current)),
                variant_key: String::new(),
            };
            record.variant_key = build_variant_key(
                &record.handle,
                &record.location,
                Some(&record.option1_value),
                Some(&record.option2_value),
                Some(&record.option3_value),
            );
            record
        })
        .collect();

    Ok(records)
}

/// Outcome of a master-view import.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ImportSummary {
    pub processed: usize,
    pub products: usize,
    pub variants: usize,
    pub collapsed_duplicates: usize,
    pub notice: String,
}

impl ImportSummary {
    pub fn new(processed: usize, products: usize, variants: usize, collapsed_duplicates: usize) -> Self {
        let mut notice = format!("Imported {products} rows. Variants saved.");
        if collapsed_duplicates > 0 {
            notice.push_str(&format!(
                " Collapsed {collapsed_duplicates} duplicate row(s) by SKU+Location from CSV."
            ));
        }

        ImportSummary {
            processed,
            products,
            variants,
            collapsed_duplicates,
            notice,
        }
    }
}
