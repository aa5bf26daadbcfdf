use crate::inventory::{Product, ProductVariant};

/// Conflict key of the Shopify `inventory` table: `handle|location|o1|o2|o3`,
/// every part trimmed and missing parts empty.
pub fn build_variant_key(
    handle: &str,
    location: &str,
    option1_value: Option<&str>,
    option2_value: Option<&str>,
    option3_value: Option<&str>,
) -> String {
    let part = |v: Option<&str>| v.unwrap_or("").trim().to_string();
    format!(
        "{}|{}|{}|{}|{}",
        handle.trim(),
        location.trim(),
        part(option1_value),
        part(option2_value),
        part(option3_value)
    )
}

/// Conflict key of the `products` table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProductKey {
    pub sku: String,
    pub location: String,
}

impl ProductKey {
    pub fn of(product: &Product) -> Self {
        ProductKey {
            sku: product.sku.clone(),
            location: product.location.clone(),
        }
    }
}

/// Conflict key of the `product_variants` table. Color and size are trimmed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub sku: String,
    pub location: String,
    pub color: String,
    pub size: String,
}

impl VariantKey {
    pub fn new(sku: &str, location: &str, color: &str, size: &str) -> Self {
        VariantKey {
            sku: sku.to_string(),
            location: location.to_string(),
            color: color.trim().to_string(),
            size: size.trim().to_string(),
        }
    }

    pub fn of(variant: &ProductVariant) -> Self {
        Self::new(&variant.sku, &variant.location, &variant.color, &variant.size)
    }
}
