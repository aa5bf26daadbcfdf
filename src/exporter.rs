use std::collections::{BTreeMap, HashSet};

use crate::csv_format::{ExportCell, write_table};
use crate::error::ExportError;
use crate::importer::SHOPIFY_HEADERS;
use crate::inventory::{InventoryRecord, Product, ProductVariant};

/// Shopify column order used for variant exports when no import has set one.
pub const DEFAULT_VARIANT_HEADERS: [&str; 19] = [
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
    "Incoming (not editable)",
    "Unavailable (not editable)",
    "Committed (not editable)",
    "Available (not editable)",
    "On hand (current)",
    "On hand (new)",
];

pub const DEFAULT_PRODUCT_HEADERS: [&str; 10] = [
    "Handle",
    "Title",
    "SKU",
    "Location",
    "Incoming (not editable)",
    "Unavailable (not editable)",
    "Committed (not editable)",
    "Available (not editable)",
    "On hand (current)",
    "On hand (new)",
];

pub const VARIANTS_FILENAME: &str = "csms-variants-export.csv";
pub const PRODUCTS_FILENAME: &str = "csms-products-export.csv";
pub const INVENTORY_FILENAME: &str = "inventory_export.csv";

/// A sheet ready to be written as CSV or XLSX.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<ExportCell>>,
    pub filename: &'static str,
}

impl ExportTable {
    pub fn to_csv(&self) -> Result<String, ExportError> {
        write_table(&self.headers, &self.rows)
    }

    /// Same table as a single-sheet workbook. Numeric cells stay numeric.
    #[cfg(feature = "web")]
    pub fn to_xlsx(&self) -> Result<Vec<u8>, ExportError> {
        use rust_xlsxwriter::Workbook;

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();

        for (c, header) in self.headers.iter().enumerate() {
            worksheet.write_string(0, c as u16, header.as_str())?;
        }
        for (r, row) in self.rows.iter().enumerate() {
            let r = r as u32 + 1;
            for (c, cell) in row.iter().enumerate() {
                match cell.as_number() {
                    Some(n) => worksheet.write_number(r, c as u16, n)?,
                    None => worksheet.write_string(r, c as u16, cell.render())?,
                };
            }
        }

        Ok(workbook.save_to_buffer()?)
    }

    pub fn xlsx_filename(&self) -> String {
        self.filename.replace(".csv", ".xlsx")
    }
}

/// Headers of the last import, if one has run.
fn last_or(last_headers: &[String], fallback: impl FnOnce() -> Vec<String>) -> Vec<String> {
    if last_headers.is_empty() {
        fallback()
    } else {
        last_headers.to_vec()
    }
}

pub fn variant_export_headers(last_headers: &[String]) -> Vec<String> {
    last_or(last_headers, || DEFAULT_VARIANT_HEADERS.iter().map(|h| h.to_string()).collect())
}

/// Last import's headers, else every product's raw headers in first-seen
/// order, else the default list.
pub fn product_export_headers(last_headers: &[String], products: &[Product]) -> Vec<String> {
    last_or(last_headers, || {
        let mut seen = HashSet::new();
        let merged: Vec<String> = products
            .iter()
            .flat_map(|p| p.raw_headers.iter())
            .filter(|h| seen.insert(h.as_str()))
            .cloned()
            .collect();
        if merged.is_empty() {
            DEFAULT_PRODUCT_HEADERS.iter().map(|h| h.to_string()).collect()
        } else {
            merged
        }
    })
}

type Record = BTreeMap<String, ExportCell>;

fn from_raw(raw: &BTreeMap<String, String>) -> Record {
    raw.iter()
        .map(|(k, v)| (k.clone(), ExportCell::from(v.as_str())))
        .collect()
}

fn project(record: &Record, headers: &[String]) -> Vec<ExportCell> {
    headers
        .iter()
        .map(|h| record.get(h).cloned().unwrap_or(ExportCell::Empty))
        .collect()
}

fn set(record: &mut Record, key: &str, value: impl Into<ExportCell>) {
    record.insert(key.to_string(), value.into());
}

/// One row per variant: the imported columns with the live quantities laid
/// over them and Available recomputed as new minus committed.
pub fn export_variants(variants: &[ProductVariant], last_headers: &[String]) -> ExportTable {
    let headers = variant_export_headers(last_headers);
    let rows = variants
        .iter()
        .map(|v| {
            let mut record = from_raw(&v.raw);
            if !v.sku.is_empty() {
                set(&mut record, "SKU", v.sku.as_str());
            }
            if !v.location.is_empty() {
                set(&mut record, "Location", v.location.as_str());
            }
            set(&mut record, "On hand (current)", v.on_hand_current);
            set(&mut record, "On hand (new)", v.on_hand_new);
            set(&mut record, "Committed (not editable)", v.committed);
            set(&mut record, "Incoming (not editable)", v.incoming);
            set(&mut record, "Unavailable (not editable)", v.unavailable);
            set(&mut record, "Available (not editable)", v.on_hand_new - v.committed);
            project(&record, &headers)
        })
        .collect();

    ExportTable {
        headers,
        rows,
        filename: VARIANTS_FILENAME,
    }
}

pub fn export_products(products: &[Product], last_headers: &[String]) -> ExportTable {
    let headers = product_export_headers(last_headers, products);
    let rows = products
        .iter()
        .map(|p| {
            let mut record = from_raw(&p.raw_row);
            set(&mut record, "On hand (new)", p.on_hand_new);
            set(&mut record, "On hand (current)", p.on_hand_current);
            set(&mut record, "Committed (not editable)", p.committed);
            set(&mut record, "Available (not editable)", p.on_hand_new - p.committed);
            if let Some(incoming) = p.incoming {
                set(&mut record, "Incoming (not editable)", incoming);
            }
            if let Some(unavailable) = p.unavailable {
                set(&mut record, "Unavailable (not editable)", unavailable);
            }
            if !p.sku.is_empty() {
                set(&mut record, "SKU", p.sku.as_str());
            }
            if !p.location.is_empty() {
                set(&mut record, "Location", p.location.as_str());
            }
            if !p.name.is_empty() {
                set(&mut record, "Title", p.name.as_str());
            }
            if let Some(handle) = p.handle.as_deref().filter(|h| !h.is_empty()) {
                set(&mut record, "Handle", handle);
            }
            project(&record, &headers)
        })
        .collect();

    ExportTable {
        headers,
        rows,
        filename: PRODUCTS_FILENAME,
    }
}

/// Variant rows when there are any, product rows otherwise.
pub fn export_master(products: &[Product], variants: &[ProductVariant], last_headers: &[String]) -> ExportTable {
    if variants.is_empty() {
        export_products(products, last_headers)
    } else {
        export_variants(variants, last_headers)
    }
}

/// The `inventory` table in the fixed Shopify layout.
pub fn export_inventory(records: &[InventoryRecord]) -> ExportTable {
    let rows = records
        .iter()
        .map(|r| {
            vec![
                ExportCell::from(r.handle.as_str()),
                ExportCell::from(r.title.as_str()),
                ExportCell::from(r.option1_name.as_str()),
                ExportCell::from(r.option1_value.as_str()),
                ExportCell::from(r.option2_name.as_str()),
                ExportCell::from(r.option2_value.as_str()),
                ExportCell::from(r.option3_name.as_str()),
                ExportCell::from(r.option3_value.as_str()),
                ExportCell::from(r.sku.as_str()),
                ExportCell::from(r.hs_code.as_str()),
                ExportCell::from(r.coo.as_str()),
                ExportCell::from(r.location.as_str()),
                ExportCell::from(r.bin_name.as_str()),
                ExportCell::from(r.incoming),
                ExportCell::from(r.unavailable),
                ExportCell::from(r.committed),
                ExportCell::from(r.available),
                ExportCell::from(r.on_hand_current),
                ExportCell::from(r.on_hand_new),
            ]
        })
        .collect();

    ExportTable {
        headers: SHOPIFY_HEADERS.iter().map(|h| h.to_string()).collect(),
        rows,
        filename: INVENTORY_FILENAME,
    }
}
