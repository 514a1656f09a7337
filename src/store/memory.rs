//! In-memory backend for tests and demos.
//!
//! A session takes the whole-state mutex for its duration, which
//! serializes transactions completely; rollback restores a snapshot taken
//! at `begin`. Observable behavior (all-or-nothing mutation, guarded
//! decrements) matches the Postgres backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreError, StoreTx, VariantAttrRow};
use crate::models::{
    Cart, CartItem, CartLine, Category, Manufacturer, Offer, Order, OrderItem, Product,
    ProductImage, Variant, CART_ACTIVE,
};

#[derive(Default, Clone)]
struct MemState {
    products: HashMap<Uuid, Product>,
    variants: HashMap<Uuid, Variant>,
    variant_attrs: Vec<VariantAttrRow>,
    categories: HashMap<Uuid, Category>,
    product_categories: Vec<(Uuid, Uuid)>,
    manufacturers: HashMap<Uuid, Manufacturer>,
    images: Vec<ProductImage>,
    carts: Vec<Cart>,
    cart_items: Vec<CartItem>,
    orders: Vec<Order>,
    order_items: Vec<OrderItem>,
}

#[derive(Default, Clone)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_product(&self, p: Product) {
        self.state.lock().await.products.insert(p.id, p);
    }

    pub async fn seed_variant(&self, v: Variant) {
        self.state.lock().await.variants.insert(v.id, v);
    }

    pub async fn seed_variant_attr(&self, variant_id: Uuid, code: &str, value: &str) {
        self.state.lock().await.variant_attrs.push(VariantAttrRow {
            variant_id,
            code: code.into(),
            value: value.into(),
        });
    }

    pub async fn seed_category(&self, c: Category, product_ids: &[Uuid]) {
        let mut s = self.state.lock().await;
        for pid in product_ids {
            s.product_categories.push((*pid, c.id));
        }
        s.categories.insert(c.id, c);
    }

    pub async fn seed_manufacturer(&self, m: Manufacturer) {
        self.state.lock().await.manufacturers.insert(m.id, m);
    }

    pub async fn seed_image(&self, img: ProductImage) {
        self.state.lock().await.images.push(img);
    }
}

fn variant_offer(s: &MemState, variant_id: Uuid) -> Option<Offer> {
    let v = s.variants.get(&variant_id).filter(|v| v.is_active)?;
    let p = s.products.get(&v.product_id).filter(|p| p.is_active)?;
    Some(Offer {
        product_id: p.id,
        variant_id: Some(v.id),
        unit_price_cents: v.price_cents.unwrap_or(p.price_cents),
        available: v.stock.unwrap_or(p.stock),
        stock_on_variant: v.stock.is_some(),
    })
}

fn product_offer(s: &MemState, product_id: Uuid) -> Option<Offer> {
    let p = s.products.get(&product_id).filter(|p| p.is_active)?;
    Some(Offer {
        product_id: p.id,
        variant_id: None,
        unit_price_cents: p.price_cents,
        available: p.stock,
        stock_on_variant: false,
    })
}

fn primary_image(s: &MemState, product_id: Uuid) -> Option<ProductImage> {
    s.images
        .iter()
        .filter(|i| i.product_id == product_id && i.is_primary)
        .min_by_key(|i| i.display_order)
        .cloned()
}

#[async_trait]
impl Store for MemStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemTx { guard, snapshot }))
    }

    async fn ensure_active_cart(&self, user_id: Uuid) -> Result<Cart, StoreError> {
        let mut s = self.state.lock().await;
        if let Some(c) = s
            .carts
            .iter()
            .find(|c| c.user_id == user_id && c.status == CART_ACTIVE)
        {
            return Ok(c.clone());
        }
        let cart = Cart {
            id: Uuid::now_v7(),
            user_id,
            status: CART_ACTIVE.into(),
            created_at: chrono::Utc::now(),
        };
        s.carts.push(cart.clone());
        Ok(cart)
    }

    async fn cart_lines(&self, cart_id: Uuid) -> Result<Vec<CartLine>, StoreError> {
        let s = self.state.lock().await;
        let mut lines = Vec::new();
        for ci in s.cart_items.iter().filter(|ci| ci.cart_id == cart_id) {
            let Some(p) = s.products.get(&ci.product_id) else {
                continue;
            };
            let v = ci.variant_id.and_then(|id| s.variants.get(&id));
            lines.push(CartLine {
                id: ci.id,
                product_id: ci.product_id,
                variant_id: ci.variant_id,
                quantity: ci.quantity,
                price_at_time_cents: ci.price_at_time_cents,
                name: p.name.clone(),
                description: p.description.clone(),
                image_url: primary_image(&s, p.id).map(|i| i.url),
                current_price_cents: v
                    .and_then(|v| v.price_cents)
                    .unwrap_or(p.price_cents),
                current_stock: v.and_then(|v| v.stock).unwrap_or(p.stock),
            });
        }
        Ok(lines)
    }

    async fn get_product(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn list_products(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Product>, i64), StoreError> {
        let s = self.state.lock().await;
        let mut active: Vec<Product> = s.products.values().filter(|p| p.is_active).cloned().collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = active.len() as i64;
        let page = active
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn product_categories(&self, product_id: Uuid) -> Result<Vec<Category>, StoreError> {
        let s = self.state.lock().await;
        let mut cats: Vec<Category> = s
            .product_categories
            .iter()
            .filter(|(pid, _)| *pid == product_id)
            .filter_map(|(_, cid)| s.categories.get(cid).cloned())
            .collect();
        cats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(cats)
    }

    async fn primary_image(&self, product_id: Uuid) -> Result<Option<ProductImage>, StoreError> {
        Ok(primary_image(&*self.state.lock().await, product_id))
    }

    async fn manufacturer(&self, id: Uuid) -> Result<Option<Manufacturer>, StoreError> {
        Ok(self.state.lock().await.manufacturers.get(&id).cloned())
    }

    async fn product_variants(&self, product_id: Uuid) -> Result<Vec<Variant>, StoreError> {
        let s = self.state.lock().await;
        let mut variants: Vec<Variant> = s
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(variants)
    }

    async fn variant_attributes(
        &self,
        product_id: Uuid,
    ) -> Result<Vec<VariantAttrRow>, StoreError> {
        let s = self.state.lock().await;
        Ok(s.variant_attrs
            .iter()
            .filter(|row| {
                s.variants
                    .get(&row.variant_id)
                    .is_some_and(|v| v.product_id == product_id)
            })
            .cloned()
            .collect())
    }

    async fn list_orders(&self, user_id: Uuid) -> Result<Vec<Order>, StoreError> {
        let s = self.state.lock().await;
        let mut orders: Vec<Order> = s
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn get_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Order>, StoreError> {
        let s = self.state.lock().await;
        Ok(s.orders
            .iter()
            .find(|o| o.id == order_id && o.user_id == user_id)
            .cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let s = self.state.lock().await;
        Ok(s.order_items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }
}

pub struct MemTx {
    guard: OwnedMutexGuard<MemState>,
    snapshot: Option<MemState>,
}

impl Drop for MemTx {
    fn drop(&mut self) {
        // Not committed: put the begin-time state back.
        if let Some(snap) = self.snapshot.take() {
            *self.guard = snap;
        }
    }
}

#[async_trait]
impl StoreTx for MemTx {
    async fn variant_offer(&mut self, variant_id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(variant_offer(&self.guard, variant_id))
    }

    async fn product_offer(&mut self, product_id: Uuid) -> Result<Option<Offer>, StoreError> {
        Ok(product_offer(&self.guard, product_id))
    }

    async fn find_active_cart(&mut self, user_id: Uuid) -> Result<Option<Cart>, StoreError> {
        Ok(self
            .guard
            .carts
            .iter()
            .find(|c| c.user_id == user_id && c.status == CART_ACTIVE)
            .cloned())
    }

    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>, StoreError> {
        Ok(self
            .guard
            .cart_items
            .iter()
            .filter(|ci| ci.cart_id == cart_id)
            .cloned()
            .collect())
    }

    async fn find_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<Option<CartItem>, StoreError> {
        Ok(self
            .guard
            .cart_items
            .iter()
            .find(|ci| {
                ci.cart_id == cart_id && ci.product_id == product_id && ci.variant_id == variant_id
            })
            .cloned())
    }

    async fn upsert_cart_item(&mut self, item: &CartItem) -> Result<(), StoreError> {
        let existing = self.guard.cart_items.iter_mut().find(|ci| {
            ci.cart_id == item.cart_id
                && ci.product_id == item.product_id
                && ci.variant_id == item.variant_id
        });
        match existing {
            Some(ci) => {
                ci.quantity += item.quantity;
                ci.price_at_time_cents = item.price_at_time_cents;
            }
            None => self.guard.cart_items.push(item.clone()),
        }
        Ok(())
    }

    async fn update_cart_item(
        &mut self,
        id: Uuid,
        quantity: i32,
        price_at_time_cents: i64,
    ) -> Result<(), StoreError> {
        if let Some(ci) = self.guard.cart_items.iter_mut().find(|ci| ci.id == id) {
            ci.quantity = quantity;
            ci.price_at_time_cents = price_at_time_cents;
        }
        Ok(())
    }

    async fn delete_cart_item(
        &mut self,
        cart_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<bool, StoreError> {
        let before = self.guard.cart_items.len();
        self.guard.cart_items.retain(|ci| {
            !(ci.cart_id == cart_id && ci.product_id == product_id && ci.variant_id == variant_id)
        });
        Ok(self.guard.cart_items.len() < before)
    }

    async fn clear_cart(&mut self, cart_id: Uuid) -> Result<(), StoreError> {
        self.guard.cart_items.retain(|ci| ci.cart_id != cart_id);
        Ok(())
    }

    async fn set_cart_status(&mut self, cart_id: Uuid, status: &str) -> Result<(), StoreError> {
        if let Some(c) = self.guard.carts.iter_mut().find(|c| c.id == cart_id) {
            c.status = status.into();
        }
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<(), StoreError> {
        self.guard.orders.push(order.clone());
        Ok(())
    }

    async fn insert_order_item(&mut self, item: &OrderItem) -> Result<(), StoreError> {
        self.guard.order_items.push(item.clone());
        Ok(())
    }

    async fn decrement_product_stock(
        &mut self,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError> {
        match self.guard.products.get_mut(&product_id) {
            Some(p) if p.stock >= quantity => {
                p.stock -= quantity;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn decrement_variant_stock(
        &mut self,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<bool, StoreError> {
        match self.guard.variants.get_mut(&variant_id) {
            Some(v) => match v.stock {
                Some(stock) if stock >= quantity => {
                    v.stock = Some(stock - quantity);
                    Ok(true)
                }
                _ => Ok(false),
            },
            None => Ok(false),
        }
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.snapshot = None;
        Ok(())
    }
}
