//! Storage abstraction.
//!
//! The pool is never process-global: components receive an
//! `Arc<dyn Store>` at construction. `Store` covers plain reads and the
//! find-or-create cart upsert; every mutation path opens a [`StoreTx`],
//! a transactional session of primitive row operations. Business
//! invariants (stock checks, quantity merges, totals) live in the
//! managers, not here; both backends stay dumb row movers.
//!
//! Dropping a `StoreTx` without calling `commit` rolls the session back
//! on every exit path, including `?` early returns.

use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{
    Cart, CartItem, CartLine, Category, Manufacturer, Offer, Order, OrderItem, Product,
    ProductImage, Variant,
};

mod memory;
mod postgres;

pub use memory::MemStore;
pub use postgres::PgStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Sqlx(sqlx::Error::Database(d)) if d.is_unique_violation())
    }
}

/// One joined row of the variant→attribute-value association, used by the
/// catalog layer to build typed attribute maps in application code.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VariantAttrRow {
    pub variant_id: Uuid,
    pub code: String,
    pub value: String,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    /// Find-or-create of the user's single active cart. Idempotent under
    /// concurrency: backed by a partial unique index plus
    /// insert-on-conflict-do-nothing, so two racing callers converge on
    /// the same row.
    async fn ensure_active_cart(&self, user_id: Uuid) -> Result<Cart, StoreError>;

    async fn cart_lines(&self, cart_id: Uuid) -> Result<Vec<CartLine>, StoreError>;

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    async fn list_products(&self, limit: i64, offset: i64)
        -> Result<(Vec<Product>, i64), StoreError>;
    async fn product_categories(&self, product_id: Uuid) -> Result<Vec<Category>, StoreError>;
    async fn primary_image(&self, product_id: Uuid) -> Result<Option<ProductImage>, StoreError>;
    async fn manufacturer(&self, id: Uuid) -> Result<Option<Manufacturer>, StoreError>;
    async fn product_variants(&self, product_id: Uuid) -> Result<Vec<Variant>, StoreError>;
    async fn variant_attributes(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<VariantAttrRow>, StoreError>;

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError>;
    async fn get_order(&self, user_id: Uuid, order_id: Uuid)
        -> Result<Option<Order>, StoreError>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Effective offer for a variant: active variant of an active product,
    /// overrides resolved against the parent. `None` covers missing and
    /// inactive alike.
    async fn variant_offer(&mut self, variant_id: Uuid) -> Result<Option<Offer>, StoreError>;
    /// Product-level offer, for lines sold without a variant.
    async fn product_offer(&mut self, product_id: Uuid) -> Result<Option<Offer>, StoreError>;

    async fn find_active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>, StoreError>;
    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>, StoreError>;
    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Option<CartItem>, StoreError>;
    /// Insert a line, or merge into the existing line for the same offer:
    /// quantities add, the price snapshot refreshes. Two sessions racing
    /// past a `find_cart_item` miss both land here safely.
    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError>;
    async fn update_cart_item(
        &mut self,
        id: Uuid,
        quantity: i32,
        price_at_time_cents: i64,
    ) -> Result<(), StoreError>;
    /// Returns false when no matching line existed.
    async fn delete_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<bool, StoreError>;
    async fn clear_cart(&mut self, cart_id: Uuid) -> Result<(), StoreError>;
    async fn set_cart_status(&mut self, cart_id: Uuid, status: &str) -> Result<(), StoreError>;

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError>;
    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError>;
    /// Guarded decrement: succeeds only while `stock >= quantity`, as a
    /// single conditional write. Returns false on insufficient stock.
    async fn decrement_product_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError>;
    async fn decrement_variant_stock(
        &mut self,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
