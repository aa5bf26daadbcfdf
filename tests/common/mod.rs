#![allow(dead_code)]

use csms::importer::{ParsedImport, parse_products};
use csms::inventory::DEFAULT_LOCATION;

/// Two rows for the same SKU and location, one at another location with an
/// unstocked cell, and a plain product with no location or options.
pub const MASTER_CSV: &str = "\
Handle,Title,Option1 Name,Option1 Value,Option2 Name,Option2 Value,SKU,Location,Committed (not editable),On hand (current),On hand (new)
ring,Gold Ring,Color,Gold,Size,7,RING-01,Liberty,1,5,5
ring,Gold Ring,Color,Gold,Size,8,RING-01,Liberty,0,3,3
ring,Gold Ring,Color,Rose,Size,7,RING-01,Warehouse,2,not stocked,
chain,Chain,,,,,CH-02,,0,4,6
";

pub const SHOPIFY_CSV: &str = "\
Handle,Title,Option1 Name,Option1 Value,Option2 Name,Option2 Value,Option3 Name,Option3 Value,SKU,HS Code,COO,Location,Bin name,Incoming,Unavailable,Committed,Available,On hand (current),On hand (new)
ring,Gold Ring,Color,Gold,Size,7,,,RING-01,7113,IT,Liberty,A1,0,0,1,4,5,
ring,Gold Ring,Color,Gold,Size,7,,,RING-01,7113,IT,Liberty,A2,0,0,1,6,7,9
";

pub fn parsed_master() -> ParsedImport {
    parse_products(MASTER_CSV, DEFAULT_LOCATION).unwrap()
}

pub fn lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}
