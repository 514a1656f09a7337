//! Row and document types shared across the store, managers and handlers.
//!
//! Money is carried as integer minor units (cents) end to end; formatting
//! is the client's problem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const ROLE_CUSTOMER: &str = "customer";
pub const ROLE_ADMIN: &str = "admin";

pub const CART_ACTIVE: &str = "active";
pub const CART_CONVERTED: &str = "converted";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub stock: i32,
    pub slug: String,
    pub sku: String,
    pub is_active: bool,
    pub is_featured: bool,
    pub cost_cents: Option<i64>,
    pub compare_at_cents: Option<i64>,
    pub weight_grams: Option<i32>,
    pub manufacturer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Variant overrides are nullable; a NULL price/stock falls back to the
/// parent product's value at read time.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Variant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub price_cents: Option<i64>,
    pub stock: Option<i32>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Category {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Manufacturer {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProductImage {
    pub id: Uuid,
    pub product_id: Uuid,
    pub url: String,
    pub alt_text: Option<String>,
    pub is_primary: bool,
    pub display_order: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub price_at_time_cents: i64,
}

/// Cart line joined with live catalog data for display. `price_at_time_cents`
/// is what the line will be charged; `current_price_cents` is what the
/// catalog says right now. The two are intentionally separate fields.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartLine {
    pub id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub price_at_time_cents: i64,
    pub name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub current_price_cents: i64,
    pub current_stock: i32,
}

impl CartLine {
    pub fn subtotal_cents(&self) -> i64 {
        self.quantity as i64 * self.price_at_time_cents
    }
}

/// Full cart response: the cart row plus priced lines.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub items: Vec<CartLineView>,
    pub subtotal_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLine,
    pub subtotal_cents: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub shipping_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price_cents: i64,
}

/// A purchasable line at add-to-cart or order time: effective price and
/// stock after variant-override fallback, plus where the stock counter
/// actually lives so decrements hit the right row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Offer {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub unit_price_cents: i64,
    pub available: i32,
    pub stock_on_variant: bool,
}

/// Assembled catalog document for one product.
#[derive(Debug, Clone, Serialize)]
pub struct ProductDoc {
    #[serde(flatten)]
    pub product: Product,
    pub manufacturer: Option<String>,
    pub categories: Vec<Category>,
    pub primary_image: Option<ProductImage>,
    pub variants: Vec<VariantDoc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VariantDoc {
    pub id: Uuid,
    pub sku: String,
    pub price_cents: i64,
    pub stock: i32,
    pub is_active: bool,
    pub attributes: BTreeMap<String, String>,
}

/// Explicit partial update: one optional field per updatable column.
/// Unset fields leave the row untouched; there is no dynamic column-list
/// construction anywhere.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub stock: Option<i32>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub is_active: Option<bool>,
    pub is_featured: Option<bool>,
    pub cost_cents: Option<i64>,
    pub compare_at_cents: Option<i64>,
    pub weight_grams: Option<i32>,
    pub manufacturer_id: Option<Uuid>,
}

impl ProductPatch {
    pub fn apply(self, mut p: Product) -> Product {
        if let Some(v) = self.name {
            p.name = v;
        }
        if let Some(v) = self.description {
            p.description = Some(v);
        }
        if let Some(v) = self.price_cents {
            p.price_cents = v;
        }
        if let Some(v) = self.stock {
            p.stock = v;
        }
        if let Some(v) = self.slug {
            p.slug = v;
        }
        if let Some(v) = self.sku {
            p.sku = v;
        }
        if let Some(v) = self.is_active {
            p.is_active = v;
        }
        if let Some(v) = self.is_featured {
            p.is_featured = v;
        }
        if let Some(v) = self.cost_cents {
            p.cost_cents = Some(v);
        }
        if let Some(v) = self.compare_at_cents {
            p.compare_at_cents = Some(v);
        }
        if let Some(v) = self.weight_grams {
            p.weight_grams = Some(v);
        }
        if let Some(v) = self.manufacturer_id {
            p.manufacturer_id = Some(v);
        }
        p.updated_at = Utc::now();
        p
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

impl UserPatch {
    pub fn apply(self, mut u: User) -> User {
        if let Some(v) = self.email {
            u.email = v;
        }
        if let Some(v) = self.role {
            u.role = v;
        }
        if let Some(v) = self.status {
            u.status = v;
        }
        u.updated_at = Utc::now();
        u
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> Product {
        Product {
            id: Uuid::now_v7(),
            name: "Widget".into(),
            description: None,
            price_cents: 1000,
            stock: 5,
            slug: "widget".into(),
            sku: "W-001".into(),
            is_active: true,
            is_featured: false,
            cost_cents: None,
            compare_at_cents: None,
            weight_grams: None,
            manufacturer_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_patch_applies_only_set_fields() {
        let p = product();
        let patched = ProductPatch {
            price_cents: Some(1250),
            is_featured: Some(true),
            ..Default::default()
        }
        .apply(p.clone());
        assert_eq!(patched.price_cents, 1250);
        assert!(patched.is_featured);
        assert_eq!(patched.name, p.name);
        assert_eq!(patched.stock, p.stock);
        assert_eq!(patched.sku, p.sku);
    }

    #[test]
    fn test_user_patch_applies_only_set_fields() {
        let u = User {
            id: Uuid::now_v7(),
            email: "jo@example.com".into(),
            password_hash: "hash".into(),
            role: ROLE_CUSTOMER.into(),
            status: "active".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let patched = UserPatch {
            role: Some(ROLE_ADMIN.into()),
            ..Default::default()
        }
        .apply(u.clone());
        assert_eq!(patched.role, ROLE_ADMIN);
        assert_eq!(patched.email, u.email);
        assert_eq!(patched.status, u.status);
        assert_eq!(patched.password_hash, u.password_hash);
    }

    #[test]
    fn test_cart_line_subtotal() {
        let line = CartLine {
            id: Uuid::now_v7(),
            product_id: Uuid::now_v7(),
            variant_id: None,
            quantity: 3,
            price_at_time_cents: 1000,
            name: "Widget".into(),
            description: None,
            image_url: None,
            current_price_cents: 1200,
            current_stock: 5,
        };
        // Charged from the snapshot, not the live price.
        assert_eq!(line.subtotal_cents(), 3000);
    }
}
