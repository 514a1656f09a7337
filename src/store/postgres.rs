//! Postgres backend over a bounded `sqlx` pool.
//!
//! Each [`PgTx`] holds one pooled connection for the duration of the
//! transaction; dropping it without commit issues the rollback.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreError, StoreTx, VariantAttrRow};
use crate::models::{
    Cart, CartItem, CartLine, Category, Manufacturer, Offer, Order, OrderItem, Product,
    ProductImage, Variant,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn ensure_active_cart(&self, user_id: Uuid) -> Result<Cart, StoreError> {
        // The partial unique index on carts(user_id) WHERE status='active'
        // makes this race-safe: a concurrent insert loses the conflict and
        // both callers land on the same row in the re-select.
        sqlx::query(
            "INSERT INTO carts (id, user_id, status, created_at) VALUES ($1, $2, 'active', NOW()) \
             ON CONFLICT (user_id) WHERE status = 'active' DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        let cart = sqlx::query_as::<_, Cart>(
            "SELECT * FROM carts WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(cart)
    }

    async fn cart_lines(&self, cart_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        let lines = sqlx::query_as::<_, CartLine>(
            "SELECT ci.id, ci.product_id, ci.variant_id, ci.quantity, ci.price_at_time_cents, \
                    p.name, p.description, \
                    (SELECT url FROM product_images i WHERE i.product_id = p.id AND i.is_primary \
                     ORDER BY i.display_order LIMIT 1) AS image_url, \
                    COALESCE(v.price_cents, p.price_cents) AS current_price_cents, \
                    COALESCE(v.stock, p.stock) AS current_stock \
             FROM cart_items ci \
             JOIN products p ON p.id = ci.product_id \
             LEFT JOIN product_variants v ON v.id = ci.variant_id \
             WHERE ci.cart_id = $1 ORDER BY ci.id",
        )
        .bind(cart_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(lines)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        let p = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(p)
    }

    async fn list_products(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Product>, i64), StoreError> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT * FROM products WHERE is_active ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products WHERE is_active")
            .fetch_one(&self.pool)
            .await?;
        Ok((products, total.0))
    }

    async fn product_categories(&self, product_id: Uuid) -> Result<Vec<Category>, StoreError> {
        let cats = sqlx::query_as::<_, Category>(
            "SELECT c.* FROM categories c \
             JOIN product_categories pc ON pc.category_id = c.id \
             WHERE pc.product_id = $1 ORDER BY c.name",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cats)
    }

    async fn primary_image(&self, product_id: Uuid) -> Result<Option<ProductImage>, StoreError> {
        let img = sqlx::query_as::<_, ProductImage>(
            "SELECT * FROM product_images WHERE product_id = $1 AND is_primary \
             ORDER BY display_order LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(img)
    }

    async fn manufacturer(&self, id: Uuid) -> Result<Option<Manufacturer>, StoreError> {
        let m = sqlx::query_as::<_, Manufacturer>("SELECT * FROM manufacturers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(m)
    }

    async fn product_variants(&self, product_id: Uuid) -> Result<Vec<Variant>, StoreError> {
        let variants = sqlx::query_as::<_, Variant>(
            "SELECT * FROM product_variants WHERE product_id = $1 ORDER BY sku",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(variants)
    }

    async fn variant_attributes(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<VariantAttrRow>, StoreError> {
        let rows = sqlx::query_as::<_, VariantAttrRow>(
            "SELECT v.id AS variant_id, a.code, av.value \
             FROM product_variants v \
             JOIN variant_attribute_values vav ON vav.variant_id = v.id \
             JOIN attribute_values av ON av.id = vav.attribute_value_id \
             JOIN attributes a ON a.id = av.attribute_id \
             WHERE v.product_id = $1",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let orders = sqlx::query_as::<_, Order>(
            "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(orders)
    }

    async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let order =
            sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
                .bind(order_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(order)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let items = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn variant_offer(&mut self, variant_id: Uuid) -> Result<Option<Offer>, StoreError> {
        let offer = sqlx::query_as::<_, Offer>(
            "SELECT p.id AS product_id, v.id AS variant_id, \
                    COALESCE(v.price_cents, p.price_cents) AS unit_price_cents, \
                    COALESCE(v.stock, p.stock) AS available, \
                    (v.stock IS NOT NULL) AS stock_on_variant \
             FROM product_variants v JOIN products p ON p.id = v.product_id \
             WHERE v.id = $1 AND v.is_active AND p.is_active",
        )
        .bind(variant_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(offer)
    }

    async fn product_offer(&mut self, product_id: Uuid) -> Result<Option<Offer>, StoreError> {
        let offer = sqlx::query_as::<_, Offer>(
            "SELECT id AS product_id, NULL::uuid AS variant_id, \
                    price_cents AS unit_price_cents, stock AS available, \
                    FALSE AS stock_on_variant \
             FROM products WHERE id = $1 AND is_active",
        )
        .bind(product_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(offer)
    }

    async fn find_active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        let cart = sqlx::query_as::<_, Cart>(
            "SELECT * FROM carts WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(cart)
    }

    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>, StoreError> {
        let items = sqlx::query_as::<_, CartItem>(
            "SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY id",
        )
        .bind(cart_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(items)
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Option<CartItem>, StoreError> {
        let item = sqlx::query_as::<_, CartItem>(
            "SELECT * FROM cart_items WHERE cart_id = $1 AND product_id = $2 \
             AND variant_id IS NOT DISTINCT FROM $3",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(variant_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(item)
    }

    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError> {
        // Conflict target mirrors the cart_items_one_line_per_offer index.
        sqlx::query(
            "INSERT INTO cart_items (id, cart_id, product_id, variant_id, quantity, price_at_time_cents) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (cart_id, product_id, (COALESCE(variant_id, '00000000-0000-0000-0000-000000000000'::uuid))) \
             DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity, \
                           price_at_time_cents = EXCLUDED.price_at_time_cents",
        )
        .bind(item.id)
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.quantity)
        .bind(item.price_at_time_cents)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_cart_item(
        &mut self,
        id: Uuid,
        quantity: i32,
        price_at_time_cents: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE cart_items SET quantity = $2, price_at_time_cents = $3 WHERE id = $1")
            .bind(id)
            .bind(quantity)
            .bind(price_at_time_cents)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "DELETE FROM cart_items WHERE cart_id = $1 AND product_id = $2 \
             AND variant_id IS NOT DISTINCT FROM $3",
        )
        .bind(cart_id)
        .bind(product_id)
        .bind(variant_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1")
            .bind(cart_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_cart_status(&mut self, cart_id: Uuid, status: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE carts SET status = $2 WHERE id = $1")
            .bind(cart_id)
            .bind(status)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, user_id, status, subtotal_cents, tax_cents, shipping_cents, \
             discount_cents, total_cents, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.status)
        .bind(order.subtotal_cents)
        .bind(order.tax_cents)
        .bind(order.shipping_cents)
        .bind(order.discount_cents)
        .bind(order.total_cents)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, variant_id, quantity, unit_price_cents) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price_cents)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn decrement_product_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE products SET stock = stock - $2, updated_at = NOW() \
             WHERE id = $1 AND stock >= $2",
        )
        .bind(product_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn decrement_variant_stock(
        &mut self,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            "UPDATE product_variants SET stock = stock - $2 WHERE id = $1 AND stock >= $2",
        )
        .bind(variant_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
