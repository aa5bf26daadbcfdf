/*!
# CSMS

A small inventory tracker for a retail catalogue: stock per SKU, per location
and per color/size variant, kept in step with Shopify-style spreadsheets.

## Overview

Staff sign in, import the stock spreadsheet exported from the shop, review and
adjust quantities in the browser, and export the result back in the same
column layout. Every upsert is "last write wins" on the row's natural key.

## Architecture

### Frontend Layer
- Plain HTML pages served by the backend (`/login`, `/signup`, `/mv`,
  `/product/{sku}`) calling the JSON API with `fetch`

### Backend Layer
- **Technologies**: Rust, axum, tokio
- **Core Components**:
  - CSV Reader - Header aliases, quantity parsing, blank-line skipping
  - Import Folding - Duplicate rows collapsed by SKU + location with summed quantities
  - Variant Rows - One row per SKU, location, color and size
  - Master View - Aggregation by SKU or by variant, search, availability filter, paging
  - Product Detail - Location rows combined, stock cards, staging and committing new stock
  - Export - Variant, product and Shopify CSV plus XLSX
  - Auth - Argon2 passwords, cookie sessions, Edit/View roles

### Data Persistence Layer
- All tables in one gzip-compressed bincode snapshot under the data directory
- Users in a pretty-printed `users.json`

## Modules

- **inventory**: Product, variant and Shopify row types, stock arithmetic
- **variant**: Composite keys
- **csv_format**: CSV reading, cell formatting and quantity parsing
- **importer**: CSV to products, variants and inventory rows
- **exporter**: CSV and XLSX exports
- **view**: Master view and product detail read models
- **store**: The in-process tables
- **saving**: Snapshot persistence with compression
- **login**: Users, sessions and roles
- **app**: Routing and handlers
- **config**: Environment configuration
- **error**: Error types

## REST API Endpoints

- `/api/products` - Master view page
- `/api/products/import`, `/api/products/export` - Spreadsheet round trip
- `/api/products/{sku}` - Product detail, with stage/commit/undo and quantity updates below it
- `/api/inventory/import`, `/api/inventory/export` - Shopify inventory table
- `/api/snapshot` - Download or restore every table at once
- `/api/session`, `/api/users/create`, `/api/users/set-role` - Accounts
*/

pub mod config;
pub mod csv_format;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod inventory;
pub mod saving;
pub mod store;
pub mod variant;
pub mod view;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod login;

pub use config::Config;
pub use error::{AuthError, ExportError, ImportError, StoreError};
pub use inventory::{InventoryRecord, Product, ProductVariant, ReturnStatus};
pub use store::{Store, Tables};

#[cfg(feature = "web")]
pub use error::AppError;
#[cfg(feature = "web")]
pub use login::Role;
