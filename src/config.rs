use std::time::Duration;

use anyhow::Context;
use derive_builder::Builder;

use crate::remote::DEFAULT_API_BASE;

/// Fields left unset on the builder fall back to [`Config::default`].
#[derive(Debug, Clone, Builder)]
#[builder(default)]
pub struct Config {
    #[builder(setter(into))]
    pub api_base: String,
    #[builder(setter(into))]
    pub database_url: String,
    #[builder(setter(into))]
    pub bind_addr: String,
    /// Country selected when the catalog is first opened
    #[builder(setter(into))]
    pub default_country: String,
    #[builder(setter(into))]
    pub cors_origin: String,
    /// Fixed seed for price/rating generation
    #[builder(setter(into, strip_option))]
    pub seed: Option<u64>,
    /// How often to look for writes made by other processes
    pub sync_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            database_url: "sqlite:catalog.db".to_string(),
            bind_addr: "127.0.0.1:8080".to_string(),
            default_country: "Mexican".to_string(),
            cors_origin: "http://localhost:3000".to_string(),
            seed: None,
            sync_interval: Duration::from_millis(500),
        }
    }
}

impl Config {
    /// Read the configuration from the environment, after loading `.env` if present.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut builder = ConfigBuilder::default();
        if let Some(base) = lookup("MEALDB_API_BASE") {
            builder.api_base(base);
        }
        if let Some(url) = lookup("DATABASE_URL") {
            builder.database_url(url);
        }
        if let Some(addr) = lookup("BIND_ADDR") {
            builder.bind_addr(addr);
        }
        if let Some(country) = lookup("DEFAULT_COUNTRY") {
            builder.default_country(country);
        }
        if let Some(origin) = lookup("CORS_ORIGIN") {
            builder.cors_origin(origin);
        }
        if let Some(seed) = lookup("CATALOG_SEED") {
            let seed: u64 = seed
                .parse()
                .with_context(|| format!("CATALOG_SEED {seed} is not a number"))?;
            builder.seed(seed);
        }
        if let Some(millis) = lookup("SYNC_INTERVAL_MS") {
            let millis: u64 = millis
                .parse()
                .with_context(|| format!("SYNC_INTERVAL_MS {millis} is not a number"))?;
            builder.sync_interval(Duration::from_millis(millis));
        }
        builder.build().with_context(|| "fail to build config")
    }
}
