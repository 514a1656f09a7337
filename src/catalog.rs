//! Catalog Query Layer: read-side assembly of a product into a single
//! response document.
//!
//! Pure reads, no transaction. The shape is deterministic: no variants
//! yields an empty list, no primary image yields null, and variant
//! attribute maps are built in application code from joined rows rather
//! than store-side JSON aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Product, ProductDoc, VariantDoc};
use crate::store::Store;

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn Store>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn list_products(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<Product>, i64), ApiError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let offset = (page as i64 - 1) * per_page as i64;
        Ok(self.store.list_products(per_page as i64, offset).await?)
    }

    pub async fn product_detail(&self, product_id: Uuid) -> Result<ProductDoc, ApiError> {
        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("product {product_id} not found")))?;

        let categories = self.store.product_categories(product_id).await?;
        let primary_image = self.store.primary_image(product_id).await?;
        let manufacturer = match product.manufacturer_id {
            Some(id) => self.store.manufacturer(id).await?.map(|m| m.name),
            None => None,
        };

        let rows = self.store.variant_attributes(product_id).await?;
        let mut attrs_by_variant: BTreeMap<Uuid, BTreeMap<String, String>> = BTreeMap::new();
        for row in rows {
            attrs_by_variant
                .entry(row.variant_id)
                .or_default()
                .insert(row.code, row.value);
        }

        let variants = self
            .store
            .product_variants(product_id)
            .await?
            .into_iter()
            .map(|v| VariantDoc {
                id: v.id,
                sku: v.sku,
                price_cents: v.price_cents.unwrap_or(product.price_cents),
                stock: v.stock.unwrap_or(product.stock),
                is_active: v.is_active,
                attributes: attrs_by_variant.remove(&v.id).unwrap_or_default(),
            })
            .collect();

        Ok(ProductDoc {
            product,
            manufacturer,
            categories,
            primary_image,
            variants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Category, Manufacturer, ProductImage, Variant};
    use crate::store::MemStore;
    use chrono::Utc;

    fn product(manufacturer_id: Option<Uuid>) -> Product {
        Product {
            id: Uuid::now_v7(),
            name: "Lamp".into(),
            description: Some("a lamp".into()),
            price_cents: 4500,
            stock: 7,
            slug: format!("lamp-{}", Uuid::new_v4()),
            sku: format!("L-{}", Uuid::new_v4()),
            is_active: true,
            is_featured: false,
            cost_cents: None,
            compare_at_cents: None,
            weight_grams: None,
            manufacturer_id,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_detail_assembles_all_parts() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store.clone());

        let m = Manufacturer {
            id: Uuid::now_v7(),
            name: "Acme".into(),
            slug: "acme".into(),
        };
        let p = product(Some(m.id));
        let pid = p.id;
        let v = Variant {
            id: Uuid::now_v7(),
            product_id: pid,
            sku: "L-RED".into(),
            price_cents: Some(5000),
            stock: None,
            is_active: true,
        };
        store.seed_manufacturer(m).await;
        store.seed_product(p).await;
        store
            .seed_category(
                Category {
                    id: Uuid::now_v7(),
                    name: "Lighting".into(),
                    slug: "lighting".into(),
                    parent_id: None,
                },
                &[pid],
            )
            .await;
        store
            .seed_image(ProductImage {
                id: Uuid::now_v7(),
                product_id: pid,
                url: "https://img/one.jpg".into(),
                alt_text: None,
                is_primary: false,
                display_order: 0,
            })
            .await;
        store
            .seed_image(ProductImage {
                id: Uuid::now_v7(),
                product_id: pid,
                url: "https://img/two.jpg".into(),
                alt_text: None,
                is_primary: true,
                display_order: 2,
            })
            .await;
        let vid = v.id;
        store.seed_variant(v).await;
        store.seed_variant_attr(vid, "color", "red").await;
        store.seed_variant_attr(vid, "size", "large").await;

        let doc = catalog.product_detail(pid).await.unwrap();
        assert_eq!(doc.manufacturer.as_deref(), Some("Acme"));
        assert_eq!(doc.categories.len(), 1);
        assert_eq!(doc.categories[0].name, "Lighting");
        // Only the is_primary image counts, regardless of display order.
        assert_eq!(
            doc.primary_image.as_ref().map(|i| i.url.as_str()),
            Some("https://img/two.jpg")
        );
        assert_eq!(doc.variants.len(), 1);
        let vd = &doc.variants[0];
        assert_eq!(vd.price_cents, 5000);
        // Stock override absent: falls back to the product's.
        assert_eq!(vd.stock, 7);
        assert_eq!(vd.attributes.get("color").map(String::as_str), Some("red"));
        assert_eq!(vd.attributes.get("size").map(String::as_str), Some("large"));
    }

    #[tokio::test]
    async fn test_detail_is_deterministic_when_parts_are_absent() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store.clone());
        let p = product(None);
        let pid = p.id;
        store.seed_product(p).await;

        let doc = catalog.product_detail(pid).await.unwrap();
        assert!(doc.manufacturer.is_none());
        assert!(doc.categories.is_empty());
        assert!(doc.primary_image.is_none());
        assert!(doc.variants.is_empty());
    }

    #[tokio::test]
    async fn test_primary_image_ties_break_on_display_order() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store.clone());
        let p = product(None);
        let pid = p.id;
        store.seed_product(p).await;
        for (url, order) in [("https://img/b.jpg", 5), ("https://img/a.jpg", 1)] {
            store
                .seed_image(ProductImage {
                    id: Uuid::now_v7(),
                    product_id: pid,
                    url: url.into(),
                    alt_text: None,
                    is_primary: true,
                    display_order: order,
                })
                .await;
        }
        let doc = catalog.product_detail(pid).await.unwrap();
        assert_eq!(
            doc.primary_image.as_ref().map(|i| i.url.as_str()),
            Some("https://img/a.jpg")
        );
    }

    #[tokio::test]
    async fn test_missing_product_is_not_found() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store);
        let err = catalog.product_detail(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_paginates_active_products() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store.clone());
        for _ in 0..3 {
            store.seed_product(product(None)).await;
        }
        let mut inactive = product(None);
        inactive.is_active = false;
        store.seed_product(inactive).await;

        let (page, total) = catalog.list_products(1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        let (page2, _) = catalog.list_products(2, 2).await.unwrap();
        assert_eq!(page2.len(), 1);
    }

    #[tokio::test]
    async fn test_list_tolerates_huge_page_numbers() {
        let store = Arc::new(MemStore::new());
        let catalog = Catalog::new(store.clone());
        store.seed_product(product(None)).await;

        let (page, total) = catalog.list_products(u32::MAX, u32::MAX).await.unwrap();
        assert_eq!(total, 1);
        assert!(page.is_empty());
    }
}
