//! HTTP surface: router construction and handlers.
//!
//! Cart, order and catalog handlers delegate to their managers, which own
//! the transactional discipline. The uniform resource CRUD (categories,
//! manufacturers, products, admin users) maps verbs straight onto SQL
//! against the pool, with partial updates going through the explicit
//! patch structs.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{self, AdminUser, AuthConfig, AuthUser};
use crate::cart::CartManager;
use crate::catalog::Catalog;
use crate::error::ApiError;
use crate::models::{
    Category, Manufacturer, Product, ProductPatch, User, UserPatch, ROLE_CUSTOMER,
};
use crate::orders::{Charges, OrderItemRequest, OrderPlacement};
use crate::store::{PgStore, Store, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub carts: CartManager,
    pub orders: OrderPlacement,
    pub catalog: Catalog,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(pool: PgPool, auth: AuthConfig) -> Self {
        let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
        Self {
            pool,
            carts: CartManager::new(store.clone()),
            orders: OrderPlacement::new(store.clone()),
            catalog: Catalog::new(store),
            auth,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/api/products", get(list_products).post(create_product))
        .route(
            "/api/products/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/api/categories", get(list_categories).post(create_category))
        .route(
            "/api/categories/:id",
            put(update_category).delete(delete_category),
        )
        .route(
            "/api/manufacturers",
            get(list_manufacturers).post(create_manufacturer),
        )
        .route(
            "/api/manufacturers/:id",
            put(update_manufacturer).delete(delete_manufacturer),
        )
        .route("/api/cart", get(get_cart))
        .route("/api/cart/items", post(add_cart_item).put(update_cart_item))
        .route("/api/cart/items/:product_id", delete(remove_cart_item))
        .route("/api/orders", get(list_orders).post(create_order))
        .route("/api/orders/:id", get(get_order))
        .route("/api/admin/users", get(list_users).post(create_user))
        .route(
            "/api/admin/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "healthy", "service": "storefront"}))
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
}

async fn register(
    State(s): State<AppState>,
    Json(r): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    r.validate().map_err(validation)?;
    let hash = auth::hash_password(&r.password)?;
    sqlx::query(
        "INSERT INTO users (id, email, password_hash, role, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, 'active', NOW(), NOW())",
    )
    .bind(Uuid::now_v7())
    .bind(r.email.to_lowercase())
    .bind(&hash)
    .bind(ROLE_CUSTOMER)
    .execute(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "email already registered"))?;
    Ok((StatusCode::CREATED, Json(json!({"message": "account created"}))))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

async fn login(
    State(s): State<AppState>,
    Json(r): Json<LoginRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(r.email.to_lowercase())
        .fetch_optional(&s.pool)
        .await?;
    let user = match user {
        Some(u) if u.is_active() && auth::verify_password(&u.password_hash, &r.password) => u,
        _ => return Err(ApiError::Unauthorized("invalid credentials".into())),
    };
    let token = auth::issue_token(&user, &s.auth)?;
    Ok(Json(json!({"token": token, "user": user})))
}

// ---------------------------------------------------------------------------
// Cart
// ---------------------------------------------------------------------------

async fn get_cart(
    State(s): State<AppState>,
    user: AuthUser,
) -> Result<Json<crate::models::CartView>, ApiError> {
    Ok(Json(s.carts.cart_view(user.user_id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CartItemRequest {
    pub product_id: Option<Uuid>,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, message = "quantity must be a positive integer"))]
    pub quantity: i32,
}

async fn add_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CartItemRequest>,
) -> Result<Json<crate::models::CartView>, ApiError> {
    r.validate().map_err(validation)?;
    match (r.variant_id, r.product_id) {
        (Some(variant_id), _) => s.carts.add_variant(user.user_id, variant_id, r.quantity).await?,
        (None, Some(product_id)) => {
            s.carts.add_product(user.user_id, product_id, r.quantity).await?
        }
        (None, None) => {
            return Err(ApiError::Validation(
                "product_id or variant_id is required".into(),
            ))
        }
    }
    Ok(Json(s.carts.cart_view(user.user_id).await?))
}

async fn update_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CartItemRequest>,
) -> Result<Json<crate::models::CartView>, ApiError> {
    r.validate().map_err(validation)?;
    let product_id = r
        .product_id
        .ok_or_else(|| ApiError::Validation("product_id is required".into()))?;
    s.carts
        .set_quantity(user.user_id, product_id, r.variant_id, r.quantity)
        .await?;
    Ok(Json(s.carts.cart_view(user.user_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemParams {
    pub variant_id: Option<Uuid>,
}

async fn remove_cart_item(
    State(s): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<Uuid>,
    Query(p): Query<RemoveItemParams>,
) -> Result<Json<crate::models::CartView>, ApiError> {
    s.carts
        .remove_item(user.user_id, product_id, p.variant_id)
        .await?;
    Ok(Json(s.carts.cart_view(user.user_id).await?))
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Explicit items; omitted or empty places the active cart.
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    #[serde(flatten)]
    pub charges: Charges,
}

async fn create_order(
    State(s): State<AppState>,
    user: AuthUser,
    Json(r): Json<CreateOrderRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = if r.items.is_empty() {
        s.orders.place_from_cart(user.user_id, &r.charges).await?
    } else {
        s.orders.place(user.user_id, &r.items, &r.charges).await?
    };
    Ok(Json(json!({"id": id})))
}

async fn list_orders(
    State(s): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<crate::models::Order>>, ApiError> {
    Ok(Json(s.orders.list(user.user_id).await?))
}

async fn get_order(
    State(s): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (order, items) = s.orders.detail(user.user_id, id).await?;
    Ok(Json(json!({"order": order, "items": items})))
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: u32,
}

async fn list_products(
    State(s): State<AppState>,
    Query(p): Query<ListParams>,
) -> Result<Json<PaginatedResponse<Product>>, ApiError> {
    let page = p.page.unwrap_or(1).max(1);
    let (data, total) = s
        .catalog
        .list_products(page, p.per_page.unwrap_or(20))
        .await?;
    Ok(Json(PaginatedResponse { data, total, page }))
}

async fn get_product(
    State(s): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<crate::models::ProductDoc>, ApiError> {
    Ok(Json(s.catalog.product_detail(id).await?))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 0))]
    pub price_cents: i64,
    #[validate(range(min = 0))]
    pub stock: Option<i32>,
    pub slug: Option<String>,
    pub sku: Option<String>,
    pub is_featured: Option<bool>,
    pub cost_cents: Option<i64>,
    pub compare_at_cents: Option<i64>,
    pub weight_grams: Option<i32>,
    pub manufacturer_id: Option<Uuid>,
}

async fn create_product(
    State(s): State<AppState>,
    _admin: AdminUser,
    Json(r): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    r.validate().map_err(validation)?;
    let slug = r.slug.unwrap_or_else(|| slugify(&r.name));
    let sku = r
        .sku
        .unwrap_or_else(|| format!("SKU-{:08}", rand::random::<u32>()));
    let product = sqlx::query_as::<_, Product>(
        "INSERT INTO products (id, name, description, price_cents, stock, slug, sku, is_active, \
         is_featured, cost_cents, compare_at_cents, weight_grams, manufacturer_id, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE, $8, $9, $10, $11, $12, NOW(), NOW()) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&r.description)
    .bind(r.price_cents)
    .bind(r.stock.unwrap_or(0))
    .bind(&slug)
    .bind(&sku)
    .bind(r.is_featured.unwrap_or(false))
    .bind(r.cost_cents)
    .bind(r.compare_at_cents)
    .bind(r.weight_grams)
    .bind(r.manufacturer_id)
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "slug or sku already in use"))?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProductPatch>,
) -> Result<Json<Product>, ApiError> {
    let current = sqlx::query_as::<_, Product>("SELECT * FROM products WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("product {id} not found")))?;
    let p = patch.apply(current);
    let updated = sqlx::query_as::<_, Product>(
        "UPDATE products SET name = $2, description = $3, price_cents = $4, stock = $5, slug = $6, \
         sku = $7, is_active = $8, is_featured = $9, cost_cents = $10, compare_at_cents = $11, \
         weight_grams = $12, manufacturer_id = $13, updated_at = $14 WHERE id = $1 RETURNING *",
    )
    .bind(p.id)
    .bind(&p.name)
    .bind(&p.description)
    .bind(p.price_cents)
    .bind(p.stock)
    .bind(&p.slug)
    .bind(&p.sku)
    .bind(p.is_active)
    .bind(p.is_featured)
    .bind(p.cost_cents)
    .bind(p.compare_at_cents)
    .bind(p.weight_grams)
    .bind(p.manufacturer_id)
    .bind(p.updated_at)
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "slug or sku already in use"))?;
    Ok(Json(updated))
}

async fn delete_product(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    // Catalog rows are referenced by cart and order lines; delete means
    // deactivate.
    let res = sqlx::query("UPDATE products SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&s.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("product {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Categories and manufacturers: uniform resource CRUD
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CategoryRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub slug: Option<String>,
    pub parent_id: Option<Uuid>,
}

async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    let cats = sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name")
        .fetch_all(&s.pool)
        .await?;
    Ok(Json(cats))
}

async fn create_category(
    State(s): State<AppState>,
    _admin: AdminUser,
    Json(r): Json<CategoryRequest>,
) -> Result<(StatusCode, Json<Category>), ApiError> {
    r.validate().map_err(validation)?;
    let slug = r.slug.unwrap_or_else(|| slugify(&r.name));
    let c = sqlx::query_as::<_, Category>(
        "INSERT INTO categories (id, name, slug, parent_id) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&slug)
    .bind(r.parent_id)
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "category slug already in use"))?;
    Ok((StatusCode::CREATED, Json(c)))
}

async fn update_category(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(r): Json<CategoryRequest>,
) -> Result<Json<Category>, ApiError> {
    r.validate().map_err(validation)?;
    let slug = r.slug.unwrap_or_else(|| slugify(&r.name));
    let c = sqlx::query_as::<_, Category>(
        "UPDATE categories SET name = $2, slug = $3, parent_id = $4 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&r.name)
    .bind(&slug)
    .bind(r.parent_id)
    .fetch_optional(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "category slug already in use"))?
    .ok_or_else(|| ApiError::NotFound(format!("category {id} not found")))?;
    Ok(Json(c))
}

async fn delete_category(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM categories WHERE id = $1")
        .bind(id)
        .execute(&s.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("category {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ManufacturerRequest {
    #[validate(length(min = 1))]
    pub name: String,
    pub slug: Option<String>,
}

async fn list_manufacturers(
    State(s): State<AppState>,
) -> Result<Json<Vec<Manufacturer>>, ApiError> {
    let rows = sqlx::query_as::<_, Manufacturer>("SELECT * FROM manufacturers ORDER BY name")
        .fetch_all(&s.pool)
        .await?;
    Ok(Json(rows))
}

async fn create_manufacturer(
    State(s): State<AppState>,
    _admin: AdminUser,
    Json(r): Json<ManufacturerRequest>,
) -> Result<(StatusCode, Json<Manufacturer>), ApiError> {
    r.validate().map_err(validation)?;
    let slug = r.slug.unwrap_or_else(|| slugify(&r.name));
    let m = sqlx::query_as::<_, Manufacturer>(
        "INSERT INTO manufacturers (id, name, slug) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(&r.name)
    .bind(&slug)
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "manufacturer slug already in use"))?;
    Ok((StatusCode::CREATED, Json(m)))
}

async fn update_manufacturer(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(r): Json<ManufacturerRequest>,
) -> Result<Json<Manufacturer>, ApiError> {
    r.validate().map_err(validation)?;
    let slug = r.slug.unwrap_or_else(|| slugify(&r.name));
    let m = sqlx::query_as::<_, Manufacturer>(
        "UPDATE manufacturers SET name = $2, slug = $3 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(&r.name)
    .bind(&slug)
    .fetch_optional(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "manufacturer slug already in use"))?
    .ok_or_else(|| ApiError::NotFound(format!("manufacturer {id} not found")))?;
    Ok(Json(m))
}

async fn delete_manufacturer(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let res = sqlx::query("DELETE FROM manufacturers WHERE id = $1")
        .bind(id)
        .execute(&s.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("manufacturer {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Admin user management
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8))]
    pub password: String,
    pub role: Option<String>,
}

async fn list_users(
    State(s): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC")
        .fetch_all(&s.pool)
        .await?;
    Ok(Json(users))
}

async fn get_user(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    Ok(Json(user))
}

async fn create_user(
    State(s): State<AppState>,
    _admin: AdminUser,
    Json(r): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    r.validate().map_err(validation)?;
    let hash = auth::hash_password(&r.password)?;
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (id, email, password_hash, role, status, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, 'active', NOW(), NOW()) RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(r.email.to_lowercase())
    .bind(&hash)
    .bind(r.role.as_deref().unwrap_or(ROLE_CUSTOMER))
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "email already registered"))?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn update_user(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<UserPatch>,
) -> Result<Json<User>, ApiError> {
    let current = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&s.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))?;
    let u = patch.apply(current);
    let updated = sqlx::query_as::<_, User>(
        "UPDATE users SET email = $2, role = $3, status = $4, updated_at = $5 \
         WHERE id = $1 RETURNING *",
    )
    .bind(u.id)
    .bind(u.email.to_lowercase())
    .bind(&u.role)
    .bind(&u.status)
    .bind(u.updated_at)
    .fetch_one(&s.pool)
    .await
    .map_err(|e| conflict_on_unique(e, "email already registered"))?;
    Ok(Json(updated))
}

async fn delete_user(
    State(s): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    // Users are referenced by carts and orders; delete means deactivate.
    let res = sqlx::query("UPDATE users SET status = 'inactive', updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&s.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound(format!("user {id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------

fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn validation(e: validator::ValidationErrors) -> ApiError {
    ApiError::Validation(e.to_string())
}

fn conflict_on_unique(e: sqlx::Error, message: &str) -> ApiError {
    let err = StoreError::from(e);
    if err.is_unique_violation() {
        ApiError::Conflict(message.into())
    } else {
        ApiError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Garden Tools"), "garden-tools");
        assert_eq!(slugify("  Déjà  Vu!  "), "déjà-vu");
        assert_eq!(slugify("A--B"), "a-b");
    }

    #[test]
    fn test_register_request_validation() {
        let bad_email = RegisterRequest {
            email: "not-an-email".into(),
            password: "longenough".into(),
        };
        assert!(bad_email.validate().is_err());
        let short_password = RegisterRequest {
            email: "a@example.com".into(),
            password: "short".into(),
        };
        assert!(short_password.validate().is_err());
        let ok = RegisterRequest {
            email: "a@example.com".into(),
            password: "longenough".into(),
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_cart_item_request_quantity_bounds() {
        let mut r = CartItemRequest {
            product_id: Some(Uuid::now_v7()),
            variant_id: None,
            quantity: 0,
        };
        assert!(r.validate().is_err());
        r.quantity = 1;
        assert!(r.validate().is_ok());
    }
}
