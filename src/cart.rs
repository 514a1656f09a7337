//! Cart Manager: the single active cart per user and every mutation of it.
//!
//! Stock is only checked here, never decremented; the decrement belongs to
//! order placement. Each mutation runs inside one store transaction and
//! rolls back wholesale on any rejection, so the cart is never observed
//! half-mutated.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{Cart, CartItem, CartLineView, CartView, Offer};
use crate::store::Store;

#[derive(Clone)]
pub struct CartManager {
    store: Arc<dyn Store>,
}

impl CartManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The user's active cart, created lazily on first access.
    pub async fn active_cart(&self, user_id: Uuid) -> Result<Cart, ApiError> {
        Ok(self.store.ensure_active_cart(user_id).await?)
    }

    /// Cart plus priced lines. Lines carry both the live catalog price
    /// (display) and the stored snapshot (what will be charged); the line
    /// subtotal and the cart subtotal come from the snapshot.
    pub async fn cart_view(&self, user_id: Uuid) -> Result<CartView, ApiError> {
        let cart = self.active_cart(user_id).await?;
        let lines = self.store.cart_lines(cart.id).await?;
        let items: Vec<CartLineView> = lines
            .into_iter()
            .map(|line| CartLineView {
                subtotal_cents: line.subtotal_cents(),
                line,
            })
            .collect();
        let subtotal_cents = items.iter().map(|i| i.subtotal_cents).sum();
        Ok(CartView {
            id: cart.id,
            user_id: cart.user_id,
            status: cart.status,
            items,
            subtotal_cents,
        })
    }

    /// Add `quantity` units of a variant, merging into an existing line.
    pub async fn add_variant(
        &self,
        user_id: Uuid,
        variant_id: Uuid,
        quantity: i32,
    ) -> Result<(), ApiError> {
        self.add(user_id, Target::Variant(variant_id), quantity).await
    }

    /// Product-level path for items sold without variants; same invariants
    /// checked directly against the product row.
    pub async fn add_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<(), ApiError> {
        self.add(user_id, Target::Product(product_id), quantity).await
    }

    async fn add(&self, user_id: Uuid, target: Target, quantity: i32) -> Result<(), ApiError> {
        check_quantity(quantity)?;
        let cart = self.active_cart(user_id).await?;
        let mut tx = self.store.begin().await?;
        let offer = match target {
            Target::Variant(id) => tx.variant_offer(id).await?,
            Target::Product(id) => tx.product_offer(id).await?,
        }
        .ok_or_else(|| not_found(&target))?;
        let existing = tx
            .find_cart_item(cart.id, offer.product_id, offer.variant_id)
            .await?;
        let merged = existing.as_ref().map_or(0, |i| i.quantity) + quantity;
        if merged > offer.available {
            return Err(ApiError::InsufficientStock(target.describe()));
        }
        match existing {
            // Merge refreshes the snapshot to the current price: last write
            // wins, the price is not locked at first add.
            Some(item) => {
                tx.update_cart_item(item.id, merged, offer.unit_price_cents)
                    .await?
            }
            None => {
                tx.upsert_cart_item(&new_item(cart.id, &offer, quantity))
                    .await?
            }
        }
        tx.commit().await?;
        Ok(())
    }

    /// Set a line to an absolute quantity, re-validating stock and
    /// refreshing the price snapshot.
    pub async fn set_quantity(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    ) -> Result<(), ApiError> {
        check_quantity(quantity)?;
        let cart = self.active_cart(user_id).await?;
        let mut tx = self.store.begin().await?;
        let target = match variant_id {
            Some(id) => Target::Variant(id),
            None => Target::Product(product_id),
        };
        let offer = match target {
            Target::Variant(id) => tx.variant_offer(id).await?,
            Target::Product(id) => tx.product_offer(id).await?,
        }
        .ok_or_else(|| not_found(&target))?;
        let item = tx
            .find_cart_item(cart.id, product_id, variant_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("cart item not found".into()))?;
        if quantity > offer.available {
            return Err(ApiError::InsufficientStock(target.describe()));
        }
        tx.update_cart_item(item.id, quantity, offer.unit_price_cents)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Remove a line. No stock re-validation is needed for deletion.
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
    ) -> Result<(), ApiError> {
        let cart = self.active_cart(user_id).await?;
        let mut tx = self.store.begin().await?;
        let removed = tx.delete_cart_item(cart.id, product_id, variant_id).await?;
        if !removed {
            return Err(ApiError::NotFound("cart item not found".into()));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Target {
    Variant(Uuid),
    Product(Uuid),
}

impl Target {
    fn describe(&self) -> String {
        match self {
            Self::Variant(id) => format!("variant {id}"),
            Self::Product(id) => format!("product {id}"),
        }
    }
}

fn not_found(target: &Target) -> ApiError {
    ApiError::NotFound(format!("{} not found or inactive", target.describe()))
}

fn check_quantity(quantity: i32) -> Result<(), ApiError> {
    if quantity < 1 {
        return Err(ApiError::Validation(
            "quantity must be a positive integer".into(),
        ));
    }
    Ok(())
}

fn new_item(cart_id: Uuid, offer: &Offer, quantity: i32) -> CartItem {
    CartItem {
        id: Uuid::now_v7(),
        cart_id,
        product_id: offer.product_id,
        variant_id: offer.variant_id,
        quantity,
        price_at_time_cents: offer.unit_price_cents,
    }
}
