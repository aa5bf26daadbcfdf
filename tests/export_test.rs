mod common;

use common::{MASTER_CSV, SHOPIFY_CSV, lines, parsed_master};
use csms::exporter::{
    DEFAULT_PRODUCT_HEADERS, DEFAULT_VARIANT_HEADERS, INVENTORY_FILENAME, PRODUCTS_FILENAME, VARIANTS_FILENAME,
    export_inventory, export_master, export_products, export_variants,
};
use csms::importer::parse_inventory_records;
use csms::store::Store;
use csms::{Product, ProductVariant};

fn imported() -> Store {
    let store = Store::in_memory();
    store.import_products(parsed_master()).unwrap();
    store
}

#[test]
fn variant_export_reuses_the_imported_layout() {
    let store = imported();
    let table = export_variants(&store.fetch_all_variants().unwrap(), &store.last_headers().unwrap());
    assert_eq!(table.filename, VARIANTS_FILENAME);

    let csv = table.to_csv().unwrap();
    let source = lines(MASTER_CSV);
    let out = lines(&csv);
    assert_eq!(out.len(), 5);
    assert_eq!(out[0], source[0]);
    assert_eq!(out[1], source[1]);
    assert_eq!(out[3], "ring,Gold Ring,Color,Rose,Size,7,RING-01,Warehouse,2,0,0");
    assert_eq!(out[4], "chain,Chain,,,,,CH-02,Liberty,0,4,6");
}

#[test]
fn variant_export_without_import_uses_shopify_columns() {
    let variant = ProductVariant {
        sku: "S1".into(),
        location: "Liberty".into(),
        on_hand_current: 4,
        on_hand_new: 9,
        committed: 2,
        incoming: 1,
        ..ProductVariant::default()
    };
    let csv = export_variants(&[variant], &[]).to_csv().unwrap();
    let out = lines(&csv);

    assert_eq!(out[0], DEFAULT_VARIANT_HEADERS.join(","));
    assert_eq!(out[1], ",,,,,,,,S1,,,Liberty,,1,0,2,7,4,9");
}

#[test]
fn product_export_falls_back_to_raw_headers_then_defaults() {
    let mut ring = Product::new("R1", "Liberty");
    ring.name = "Ring, \"gold\"".into();
    ring.on_hand_current = 3;
    ring.on_hand_new = 5;
    ring.committed = 1;
    ring.raw_headers = vec!["SKU".into(), "Title".into(), "Notes".into()];
    ring.raw_row.insert("Notes".into(), "fragile".into());

    let table = export_products(&[ring.clone()], &[]);
    assert_eq!(table.filename, PRODUCTS_FILENAME);
    let csv = table.to_csv().unwrap();
    assert_eq!(lines(&csv), vec!["SKU,Title,Notes", "R1,\"Ring, \"\"gold\"\"\",fragile"]);

    ring.raw_headers.clear();
    let csv = export_products(&[ring], &[]).to_csv().unwrap();
    let out = lines(&csv);
    assert_eq!(out[0], DEFAULT_PRODUCT_HEADERS.join(","));
    assert_eq!(out[1], ",\"Ring, \"\"gold\"\"\",R1,Liberty,,,1,4,3,5");
}

#[test]
fn master_export_prefers_variants() {
    let store = imported();
    let products = store.fetch_products().unwrap();
    let headers = store.last_headers().unwrap();

    let with_variants = export_master(&products, &store.fetch_all_variants().unwrap(), &headers);
    assert_eq!(with_variants.rows.len(), 4);

    let without = export_master(&products, &[], &headers);
    assert_eq!(without.filename, PRODUCTS_FILENAME);
    assert_eq!(without.rows.len(), 3);
}

#[test]
fn inventory_export_writes_the_fixed_layout() {
    let store = Store::in_memory();
    store.upsert_inventory(parse_inventory_records(SHOPIFY_CSV).unwrap()).unwrap();

    let table = export_inventory(&store.fetch_inventory().unwrap());
    assert_eq!(table.filename, INVENTORY_FILENAME);
    let csv = table.to_csv().unwrap();
    let out = lines(&csv);
    assert_eq!(out[0], lines(SHOPIFY_CSV)[0]);
    assert_eq!(out[1], "ring,Gold Ring,Color,Gold,Size,7,,,RING-01,7113,IT,Liberty,A2,0,0,1,6,7,9");
}

#[cfg(feature = "web")]
#[test]
fn xlsx_export_is_a_zip_workbook() {
    let store = imported();
    let table = export_variants(&store.fetch_all_variants().unwrap(), &store.last_headers().unwrap());
    let bytes = table.to_xlsx().unwrap();
    assert_eq!(&bytes[..2], b"PK");
    assert_eq!(table.xlsx_filename(), "csms-variants-export.xlsx");
}
