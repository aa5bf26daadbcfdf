use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::StoreError;
use crate::importer::{self, ImportSummary, ParsedImport};
use crate::inventory::{InventoryRecord, Product, ProductVariant};
use crate::saving;
use crate::variant::{ProductKey, VariantKey};

const SNAPSHOT_FILE: &str = "inventory.bin.gz";
const RECENT_CHANGES: usize = 10;

/// A staged stock addition, newest first in [`Tables::recent_changes`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct StockChange {
    pub location: String,
    pub quantity: i64,
    pub at: DateTime<Utc>,
}

/// Everything the application persists.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
pub struct Tables {
    pub products: Vec<Product>,
    pub variants: Vec<ProductVariant>,
    pub inventory: Vec<InventoryRecord>,
    /// Header order of the most recent master-view import
    pub last_headers: Vec<String>,
    pub next_variant_id: u64,
    pub recent_changes: BTreeMap<String, Vec<StockChange>>,
}

impl Tables {
    fn base_variants_mut<'a>(
        &'a mut self,
        sku: &'a str,
        location: &'a str,
    ) -> impl Iterator<Item = &'a mut ProductVariant> + 'a {
        self.variants
            .iter_mut()
            .filter(move |v| v.sku == sku && v.location == location && v.is_base())
    }
}

/// The `products`, `product_variants` and `inventory` tables.
///
/// Writes are upserts on each table's natural key, so a later write replaces
/// an earlier one. When opened on a directory, a mutation only becomes
/// visible once its snapshot has been written.
pub struct Store {
    tables: RwLock<Tables>,
    /// Serializes mutations across the copy, save and swap steps
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Store {
            tables: RwLock::new(Tables::default()),
            writer: Mutex::new(()),
            snapshot_path: None,
        }
    }

    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(SNAPSHOT_FILE);
        let tables = if path.exists() {
            let tables = saving::load_snapshot(&path)?;
            info!(
                "Loaded {} products, {} variants, {} inventory rows from {}",
                tables.products.len(),
                tables.variants.len(),
                tables.inventory.len(),
                path.display()
            );
            tables
        } else {
            info!("No snapshot at {}, starting empty", path.display());
            Tables::default()
        };

        Ok(Store {
            tables: RwLock::new(tables),
            writer: Mutex::new(()),
            snapshot_path: Some(path),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables.write().map_err(|_| StoreError::Poisoned)
    }

    /// Run `f` on a copy of the tables, persist the copy, then swap it in.
    ///
    /// Readers keep seeing the previous tables while the snapshot is written,
    /// and a failed write leaves them untouched.
    fn mutate<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R, StoreError> {
        let _writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let mut next = self.read()?.clone();
        let result = f(&mut next);
        if let Some(path) = &self.snapshot_path {
            saving::save_snapshot(&next, path)?;
        }
        *self.write()? = next;
        Ok(result)
    }

    pub fn snapshot(&self) -> Result<Tables, StoreError> {
        Ok(self.read()?.clone())
    }

    pub fn restore(&self, tables: Tables) -> Result<(), StoreError> {
        self.mutate(|current| *current = tables)
    }

    /// All products, most recently written first.
    pub fn fetch_products(&self) -> Result<Vec<Product>, StoreError> {
        let mut products = self.read()?.products.clone();
        products.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(products)
    }

    pub fn fetch_products_by_sku(&self, sku: &str) -> Result<Vec<Product>, StoreError> {
        let sku = sku.trim();
        Ok(self
            .read()?
            .products
            .iter()
            .filter(|p| p.sku == sku)
            .cloned()
            .collect())
    }

    /// Exact SKU and location, then a location containing the given text
    /// (case-insensitive), then any row of the SKU.
    pub fn fetch_product_by_sku_location(
        &self,
        sku: &str,
        location: Option<&str>,
    ) -> Result<Option<Product>, StoreError> {
        let sku = sku.trim();
        let location = location.unwrap_or("").trim();
        let tables = self.read()?;
        let rows: Vec<&Product> = tables.products.iter().filter(|p| p.sku == sku).collect();

        if !location.is_empty() {
            if let Some(p) = rows.iter().find(|p| p.location == location) {
                return Ok(Some((*p).clone()));
            }
            let needle = location.to_lowercase();
            if let Some(p) = rows.iter().find(|p| p.location.to_lowercase().contains(&needle)) {
                return Ok(Some((*p).clone()));
            }
        }

        Ok(rows.first().map(|p| (*p).clone()))
    }

    /// Insert or replace products on (sku, location).
    pub fn upsert_products(&self, items: &[Product]) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();

        self.mutate(|tables| {
            for item in items {
                let mut row = item.clone();
                row.returns = 0;
                row.updated_at = now;
                let key = ProductKey::of(&row);
                match tables.products.iter_mut().find(|p| ProductKey::of(p) == key) {
                    Some(existing) => *existing = row,
                    None => tables.products.push(row),
                }
            }
            items.len()
        })
    }

    /// Collapse duplicates, then insert or replace on (sku, location, color, size).
    /// Replaced rows keep their id.
    pub fn upsert_product_variants(&self, items: Vec<ProductVariant>) -> Result<usize, StoreError> {
        if items.is_empty() {
            return Ok(0);
        }
        let payload = importer::collapse_variants(items);

        self.mutate(|tables| {
            for mut row in payload.iter().cloned() {
                let key = VariantKey::of(&row);
                match tables.variants.iter_mut().find(|v| VariantKey::of(v) == key) {
                    Some(existing) => {
                        row.id = existing.id;
                        *existing = row;
                    }
                    None => {
                        tables.next_variant_id += 1;
                        row.id = tables.next_variant_id;
                        tables.variants.push(row);
                    }
                }
            }
            payload.len()
        })
    }

    pub fn fetch_all_variants(&self) -> Result<Vec<ProductVariant>, StoreError> {
        Ok(self.read()?.variants.clone())
    }

    /// Variant rows of a SKU that carry a color or a size.
    pub fn fetch_variants_by_sku(&self, sku: &str) -> Result<Vec<ProductVariant>, StoreError> {
        let sku = sku.trim();
        Ok(self
            .read()?
            .variants
            .iter()
            .filter(|v| v.sku == sku && !v.is_base())
            .cloned()
            .collect())
    }

    /// Set the staged count of (sku, location), mirrored onto its base variants.
    /// Returns the number of product rows changed.
    pub fn update_on_hand_new(&self, sku: &str, location: &str, value: i64) -> Result<usize, StoreError> {
        self.update_product(sku, location, |p| p.on_hand_new = value, |v| v.on_hand_new = value)
    }

    pub fn update_on_hand_current(&self, sku: &str, location: &str, value: i64) -> Result<usize, StoreError> {
        self.update_product(
            sku,
            location,
            |p| p.on_hand_current = value,
            |v| v.on_hand_current = value,
        )
    }

    pub fn update_committed(&self, sku: &str, location: &str, value: i64) -> Result<usize, StoreError> {
        self.update_product(sku, location, |p| p.committed = value, |_| ())
    }

    fn update_product(
        &self,
        sku: &str,
        location: &str,
        mut on_product: impl FnMut(&mut Product),
        mut on_variant: impl FnMut(&mut ProductVariant),
    ) -> Result<usize, StoreError> {
        let now = Utc::now();
        self.mutate(|tables| {
            let mut changed = 0;
            for p in tables.products.iter_mut().filter(|p| p.sku == sku && p.location == location) {
                on_product(p);
                p.updated_at = now;
                changed += 1;
            }
            let mut mirrored = 0;
            for v in tables.base_variants_mut(sku, location) {
                on_variant(v);
                mirrored += 1;
            }
            if changed > 0 && mirrored == 0 {
                debug!("No base variant rows for {sku} at {location}");
            }
            changed
        })
    }

    /// Replace one product row with the result of `f`, for order and return
    /// bookkeeping.
    pub fn apply_to_product(
        &self,
        sku: &str,
        location: &str,
        f: impl FnOnce(&Product) -> Product,
    ) -> Result<Product, StoreError> {
        self.mutate(|tables| {
            let p = tables
                .products
                .iter_mut()
                .find(|p| p.sku == sku && p.location == location)
                .ok_or_else(|| StoreError::ProductNotFound {
                    sku: sku.to_string(),
                    location: location.to_string(),
                })?;
            let mut next = f(p);
            next.updated_at = Utc::now();
            *p = next.clone();
            for v in tables.base_variants_mut(sku, location) {
                v.on_hand_current = next.on_hand_current;
                v.committed = next.committed;
            }
            Ok(next)
        })?
    }

    /// Stage additions per location: each listed location's `on_hand_new`
    /// becomes the given amount. Non-zero additions are logged as recent changes.
    pub fn stage_additions(&self, sku: &str, entries: &[(String, i64)]) -> Result<Vec<Product>, StoreError> {
        let now = Utc::now();
        self.mutate(|tables| {
            for (location, add) in entries {
                let add = (*add).max(0);
                for p in tables.products.iter_mut().filter(|p| p.sku == sku && p.location == *location) {
                    p.on_hand_new = add;
                    p.updated_at = now;
                }
                for v in tables.base_variants_mut(sku, location) {
                    v.on_hand_new = add;
                }
                if add > 0 {
                    let changes = tables.recent_changes.entry(sku.to_string()).or_default();
                    changes.insert(
                        0,
                        StockChange {
                            location: location.clone(),
                            quantity: add,
                            at: now,
                        },
                    );
                    changes.truncate(RECENT_CHANGES);
                }
            }
            tables.products.iter().filter(|p| p.sku == sku).cloned().collect()
        })
    }

    /// Drop a recent change and take its quantity back off the staged count.
    pub fn undo_change(&self, sku: &str, index: usize) -> Result<Option<StockChange>, StoreError> {
        self.mutate(|tables| {
            let changes = tables.recent_changes.get_mut(sku)?;
            if index >= changes.len() {
                return None;
            }
            let change = changes.remove(index);
            for p in tables
                .products
                .iter_mut()
                .filter(|p| p.sku == sku && p.location == change.location)
            {
                p.on_hand_new = (p.on_hand_new - change.quantity).max(0);
            }
            Some(change)
        })
    }

    pub fn recent_changes(&self, sku: &str) -> Result<Vec<StockChange>, StoreError> {
        Ok(self.read()?.recent_changes.get(sku).cloned().unwrap_or_default())
    }

    /// Move every staged count of the SKU into on-hand: `current += new`,
    /// `new = 0`, for the product rows and their base variants.
    pub fn commit_staged(&self, sku: &str) -> Result<Vec<Product>, StoreError> {
        let now = Utc::now();
        self.mutate(|tables| {
            let mut committed = Vec::new();
            for p in tables.products.iter_mut().filter(|p| p.sku == sku) {
                p.on_hand_current = p.on_hand_current.saturating_add(p.on_hand_new);
                p.on_hand_new = 0;
                p.updated_at = now;
                committed.push(p.clone());
            }
            for p in &committed {
                for v in tables.base_variants_mut(sku, &p.location) {
                    v.on_hand_current = p.on_hand_current;
                    v.on_hand_new = 0;
                }
            }
            tables.recent_changes.remove(sku);
            committed
        })
    }

    /// Set a variant's staged count, floored at zero.
    pub fn set_variant_on_hand_new(&self, key: &VariantKey, value: i64) -> Result<usize, StoreError> {
        let value = value.max(0);
        self.mutate(|tables| {
            let mut changed = 0;
            for v in tables.variants.iter_mut().filter(|v| VariantKey::of(v) == *key) {
                v.on_hand_new = value;
                changed += 1;
            }
            changed
        })
    }

    /// `current += new`, `new = 0` for every colored or sized variant of the SKU.
    pub fn commit_variants(&self, sku: &str) -> Result<Vec<ProductVariant>, StoreError> {
        self.mutate(|tables| {
            tables
                .variants
                .iter_mut()
                .filter(|v| v.sku == sku && !v.is_base())
                .map(|v| {
                    v.on_hand_current = v.on_hand_current.saturating_add(v.on_hand_new);
                    v.on_hand_new = 0;
                    v.clone()
                })
                .collect()
        })
    }

    /// Upsert a parsed master-view file: folded products, one variant row per
    /// source row, and its header order for later exports.
    pub fn import_products(&self, parsed: ParsedImport) -> Result<ImportSummary, StoreError> {
        let processed = parsed.products.len();
        let collapsed = importer::collapse_by_sku_location(&parsed.products);
        let variants = importer::variant_rows(&parsed.products);

        let products = self.upsert_products(&collapsed.products)?;
        let variants = self.upsert_product_variants(variants)?;
        if !parsed.headers.is_empty() {
            self.mutate(|tables| tables.last_headers = parsed.headers)?;
        }

        let summary = ImportSummary::new(processed, products, variants, collapsed.duplicates);
        info!("{}", summary.notice);
        Ok(summary)
    }

    pub fn last_headers(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.last_headers.clone())
    }

    /// Insert or replace Shopify rows on `variant_key`. Within one batch the
    /// last row for a key wins.
    pub fn upsert_inventory(&self, records: Vec<InventoryRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.mutate(|tables| {
            let count = records.len();
            for record in records {
                match tables
                    .inventory
                    .iter_mut()
                    .find(|r| r.variant_key == record.variant_key)
                {
                    Some(existing) => *existing = record,
                    None => tables.inventory.push(record),
                }
            }
            count
        })
    }

    pub fn fetch_inventory(&self) -> Result<Vec<InventoryRecord>, StoreError> {
        Ok(self.read()?.inventory.clone())
    }
}
