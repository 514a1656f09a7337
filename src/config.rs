//! Environment-driven configuration, gathered once at startup.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub max_connections: u32,
    pub jwt_secret: String,
    pub jwt_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let port = match std::env::var("PORT") {
            Ok(v) => v.parse().context("PORT is not a valid port number")?,
            Err(_) => 8083,
        };
        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(v) => v.parse().context("DATABASE_MAX_CONNECTIONS is not a number")?,
            Err(_) => 10,
        };
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?;
        let jwt_ttl_hours = match std::env::var("JWT_TTL_HOURS") {
            Ok(v) => v.parse().context("JWT_TTL_HOURS is not a number")?,
            Err(_) => 24,
        };
        Ok(Self {
            database_url,
            port,
            max_connections,
            jwt_secret,
            jwt_ttl_hours,
        })
    }
}
