//! Order Placement: converts a cart or an ad hoc item list into an
//! immutable order, decrementing stock inside the same transaction.
//!
//! Unit prices are never taken from the client. The item-list path
//! re-derives them from current catalog state; the cart path charges each
//! line's stored snapshot. Stock decrements are conditional writes
//! (`stock >= quantity`), so two concurrent orders cannot oversell: the
//! loser sees zero rows affected and the whole transaction rolls back.

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{CartItem, Offer, Order, OrderItem, CART_CONVERTED};
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
}

/// Tax, shipping and discount are inputs to the total, not computed here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Charges {
    #[serde(default)]
    pub tax_cents: i64,
    #[serde(default)]
    pub shipping_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
}

#[derive(Clone)]
pub struct OrderPlacement {
    store: Arc<dyn Store>,
}

impl OrderPlacement {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Place an order for an explicit item list, priced server-side from
    /// the current catalog. Returns the new order id.
    pub async fn place(
        &self,
        user_id: Uuid,
        items: &[OrderItemRequest],
        charges: &Charges,
    ) -> Result<Uuid, ApiError> {
        if items.is_empty() {
            return Err(ApiError::Validation("order has no items".into()));
        }
        if items.iter().any(|i| i.quantity < 1) {
            return Err(ApiError::Validation(
                "quantity must be a positive integer".into(),
            ));
        }
        let mut tx = self.store.begin().await?;
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let offer = match item.variant_id {
                Some(vid) => tx.variant_offer(vid).await?,
                None => tx.product_offer(item.product_id).await?,
            }
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "{} not found or inactive",
                    describe(item.product_id, item.variant_id)
                ))
            })?;
            lines.push((offer.clone(), item.quantity, offer.unit_price_cents));
        }
        let order_id = write_order(&mut tx, user_id, &lines, charges).await?;
        tx.commit().await?;
        Ok(order_id)
    }

    /// Place an order from the user's active cart, charging each line at
    /// its snapshot price. Empties the cart and closes it in-transaction;
    /// the next cart access lazily creates a fresh active cart.
    pub async fn place_from_cart(
        &self,
        user_id: Uuid,
        charges: &Charges,
    ) -> Result<Uuid, ApiError> {
        let mut tx = self.store.begin().await?;
        let cart = tx
            .find_active_cart(user_id)
            .await?
            .ok_or_else(|| ApiError::Validation("cart is empty".into()))?;
        let items: Vec<CartItem> = tx.cart_items(cart.id).await?;
        if items.is_empty() {
            return Err(ApiError::Validation("cart is empty".into()));
        }
        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let offer = match item.variant_id {
                Some(vid) => tx.variant_offer(vid).await?,
                None => tx.product_offer(item.product_id).await?,
            }
            .ok_or_else(|| {
                ApiError::NotFound(format!(
                    "{} no longer available",
                    describe(item.product_id, item.variant_id)
                ))
            })?;
            // Cart path: the snapshot is the agreed price.
            lines.push((offer, item.quantity, item.price_at_time_cents));
        }
        let order_id = write_order(&mut tx, user_id, &lines, charges).await?;
        tx.clear_cart(cart.id).await?;
        tx.set_cart_status(cart.id, CART_CONVERTED).await?;
        tx.commit().await?;
        Ok(order_id)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<Order>, ApiError> {
        Ok(self.store.list_orders(user_id).await?)
    }

    pub async fn detail(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<(Order, Vec<OrderItem>), ApiError> {
        let order = self
            .store
            .get_order(user_id, order_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("order {order_id} not found")))?;
        let items = self.store.order_items(order_id).await?;
        Ok((order, items))
    }
}

fn describe(product_id: Uuid, variant_id: Option<Uuid>) -> String {
    match variant_id {
        Some(id) => format!("variant {id}"),
        None => format!("product {product_id}"),
    }
}

/// Inserts the order row, its items, and performs the guarded stock
/// decrements. Any failure propagates with the transaction still open, so
/// the caller's drop rolls everything back.
async fn write_order(
    tx: &mut Box<dyn StoreTx>,
    user_id: Uuid,
    lines: &[(Offer, i32, i64)],
    charges: &Charges,
) -> Result<Uuid, ApiError> {
    let subtotal_cents: i64 = lines
        .iter()
        .map(|(_, qty, unit)| *qty as i64 * unit)
        .sum();
    let order = Order {
        id: Uuid::now_v7(),
        user_id,
        status: "pending".into(),
        subtotal_cents,
        tax_cents: charges.tax_cents,
        shipping_cents: charges.shipping_cents,
        discount_cents: charges.discount_cents,
        total_cents: subtotal_cents + charges.tax_cents + charges.shipping_cents
            - charges.discount_cents,
        created_at: Utc::now(),
    };
    tx.insert_order(&order).await?;
    for (offer, quantity, unit_price_cents) in lines {
        tx.insert_order_item(&OrderItem {
            id: Uuid::now_v7(),
            order_id: order.id,
            product_id: offer.product_id,
            variant_id: offer.variant_id,
            quantity: *quantity,
            unit_price_cents: *unit_price_cents,
        })
        .await?;
        let decremented = match offer.variant_id {
            Some(vid) if offer.stock_on_variant => {
                tx.decrement_variant_stock(vid, *quantity).await?
            }
            _ => tx.decrement_product_stock(offer.product_id, *quantity).await?,
        };
        if !decremented {
            return Err(ApiError::InsufficientStock(format!(
                "product {}",
                offer.product_id
            )));
        }
    }
    Ok(order.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartManager;
    use crate::models::{Product, Variant};
    use crate::store::MemStore;

    fn product(price_cents: i64, stock: i32) -> Product {
        Product {
            id: Uuid::now_v7(),
            name: "Widget".into(),
            description: None,
            price_cents,
            stock,
            slug: format!("widget-{}", Uuid::new_v4()),
            sku: format!("W-{}", Uuid::new_v4()),
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

    fn setup() -> (OrderPlacement, CartManager, Arc<MemStore>) {
        let store = Arc::new(MemStore::new());
        (
            OrderPlacement::new(store.clone()),
            CartManager::new(store.clone()),
            store,
        )
    }

    fn request(product_id: Uuid, quantity: i32) -> OrderItemRequest {
        OrderItemRequest {
            product_id,
            variant_id: None,
            quantity,
        }
    }

    #[tokio::test]
    async fn test_place_decrements_stock_and_records_items() {
        let (orders, _, store) = setup();
        let a = product(1000, 5);
        let b = product(2000, 5);
        let (user, aid, bid) = (Uuid::now_v7(), a.id, b.id);
        store.seed_product(a).await;
        store.seed_product(b).await;

        let order_id = orders
            .place(user, &[request(aid, 2), request(bid, 1)], &Charges::default())
            .await
            .unwrap();

        assert_eq!(store.get_product(aid).await.unwrap().unwrap().stock, 3);
        assert_eq!(store.get_product(bid).await.unwrap().unwrap().stock, 4);
        let (order, items) = orders.detail(user, order_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(order.subtotal_cents, 2 * 1000 + 2000);
        assert_eq!(order.total_cents, order.subtotal_cents);
    }

    #[tokio::test]
    async fn test_failed_item_rolls_back_everything() {
        let (orders, _, store) = setup();
        let a = product(1000, 5);
        let b = product(2000, 1);
        let (user, aid, bid) = (Uuid::now_v7(), a.id, b.id);
        store.seed_product(a).await;
        store.seed_product(b).await;

        // Second line overdraws; first line's decrement must not stick.
        let err = orders
            .place(user, &[request(aid, 2), request(bid, 3)], &Charges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientStock(_)));

        assert_eq!(store.get_product(aid).await.unwrap().unwrap().stock, 5);
        assert_eq!(store.get_product(bid).await.unwrap().unwrap().stock, 1);
        assert!(orders.list(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_prices_are_rederived_server_side() {
        let (orders, _, store) = setup();
        let p = product(1234, 10);
        let (user, pid) = (Uuid::now_v7(), p.id);
        store.seed_product(p).await;

        let order_id = orders
            .place(user, &[request(pid, 2)], &Charges::default())
            .await
            .unwrap();
        let (order, items) = orders.detail(user, order_id).await.unwrap();
        assert_eq!(items[0].unit_price_cents, 1234);
        assert_eq!(order.subtotal_cents, 2468);
    }

    #[tokio::test]
    async fn test_charges_feed_the_total() {
        let (orders, _, store) = setup();
        let p = product(1000, 10);
        let (user, pid) = (Uuid::now_v7(), p.id);
        store.seed_product(p).await;

        let charges = Charges {
            tax_cents: 150,
            shipping_cents: 500,
            discount_cents: 200,
        };
        let order_id = orders.place(user, &[request(pid, 1)], &charges).await.unwrap();
        let (order, _) = orders.detail(user, order_id).await.unwrap();
        assert_eq!(order.subtotal_cents, 1000);
        assert_eq!(order.total_cents, 1000 + 150 + 500 - 200);
    }

    #[tokio::test]
    async fn test_empty_and_invalid_items_rejected() {
        let (orders, _, _) = setup();
        let user = Uuid::now_v7();
        let err = orders.place(user, &[], &Charges::default()).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        let err = orders
            .place(user, &[request(Uuid::now_v7(), 0)], &Charges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_variant_is_named_in_the_error() {
        let (orders, _, store) = setup();
        let p = product(1000, 5);
        let (user, pid) = (Uuid::now_v7(), p.id);
        store.seed_product(p).await;

        let vid = Uuid::now_v7();
        let err = orders
            .place(
                user,
                &[OrderItemRequest {
                    product_id: pid,
                    variant_id: Some(vid),
                    quantity: 1,
                }],
                &Charges::default(),
            )
            .await
            .unwrap_err();
        match err {
            ApiError::NotFound(msg) => assert_eq!(msg, format!("variant {vid} not found or inactive")),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_place_from_cart_charges_snapshot_and_closes_cart() {
        let (orders, carts, store) = setup();
        let mut p = product(1000, 10);
        let (user, pid) = (Uuid::now_v7(), p.id);
        store.seed_product(p.clone()).await;

        carts.add_product(user, pid, 2).await.unwrap();
        // Catalog price moves after the add; the cart snapshot is charged.
        p.price_cents = 9000;
        p.stock = 10;
        store.seed_product(p).await;

        let order_id = orders.place_from_cart(user, &Charges::default()).await.unwrap();
        let (order, items) = orders.detail(user, order_id).await.unwrap();
        assert_eq!(items[0].unit_price_cents, 1000);
        assert_eq!(order.subtotal_cents, 2000);
        assert_eq!(store.get_product(pid).await.unwrap().unwrap().stock, 8);

        // The converted cart is gone; a fresh empty one appears.
        let view = carts.cart_view(user).await.unwrap();
        assert!(view.items.is_empty());
    }

    #[tokio::test]
    async fn test_place_from_empty_cart_rejected() {
        let (orders, carts, _) = setup();
        let user = Uuid::now_v7();
        carts.active_cart(user).await.unwrap();
        let err = orders
            .place_from_cart(user, &Charges::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn test_variant_stock_override_is_decremented() {
        let (orders, _, store) = setup();
        let p = product(1000, 100);
        let v = Variant {
            id: Uuid::now_v7(),
            product_id: p.id,
            sku: "V-1".into(),
            price_cents: Some(1500),
            stock: Some(3),
            is_active: true,
        };
        let (user, pid, vid) = (Uuid::now_v7(), p.id, v.id);
        store.seed_product(p).await;
        store.seed_variant(v).await;

        let order_id = orders
            .place(
                user,
                &[OrderItemRequest {
                    product_id: pid,
                    variant_id: Some(vid),
                    quantity: 2,
                }],
                &Charges::default(),
            )
            .await
            .unwrap();
        let (_, items) = orders.detail(user, order_id).await.unwrap();
        assert_eq!(items[0].unit_price_cents, 1500);
        // Variant counter moved, product counter did not.
        let variants = store.product_variants(pid).await.unwrap();
        assert_eq!(variants[0].stock, Some(1));
        assert_eq!(store.get_product(pid).await.unwrap().unwrap().stock, 100);
    }
}
