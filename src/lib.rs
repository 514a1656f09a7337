//! Storefront API
//!
//! Relational-store-backed commerce service: catalog, carts, orders,
//! users and auth.
//!
//! ## Layout
//! - [`store`]: injected storage abstraction (Postgres + in-memory)
//! - [`cart`]: single active cart per user, transactional mutations
//! - [`orders`]: atomic order placement with guarded stock decrements
//! - [`catalog`]: read-side product document assembly
//! - [`auth`]: bearer tokens and password hashing
//! - [`routes`]: HTTP surface

pub mod auth;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod orders;
pub mod routes;
pub mod store;
