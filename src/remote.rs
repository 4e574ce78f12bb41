//! Access to the remote recipe API.
//!
//! The controller only talks to a [`MealSource`], so tests can swap the HTTP
//! client for a scripted one.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};

use crate::data::{Country, MealRecord, MealSummary};

pub const DEFAULT_API_BASE: &str = "https://www.themealdb.com/api/json/v1/1";

#[async_trait]
pub trait MealSource: Send + Sync {
    /// Every country ("area") known to the API
    async fn list_countries(&self) -> Result<Vec<Country>>;

    /// Minimal records of the dishes of one country
    async fn filter_by_country(&self, country: &str) -> Result<Vec<MealSummary>>;

    /// The full record of one dish
    async fn lookup_meal(&self, id: &str) -> Result<MealRecord>;
}

/// Every endpoint wraps its payload as `{"meals": [...]}`, or `null` when empty.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    meals: Option<Vec<T>>,
}

/// TheMealDB HTTP client
pub struct MealDb {
    client: reqwest::Client,
    base: String,
}

impl MealDb {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Vec<T>> {
        let url = format!("{}/{endpoint}", self.base);
        tracing::debug!("GET {url} {query:?}");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("fail to send request to {url}"))?
            .error_for_status()
            .with_context(|| format!("{url} answered with an error status"))?;

        let envelope: Envelope<T> = response
            .json()
            .await
            .with_context(|| format!("fail to parse response of {url}"))?;

        Ok(envelope.meals.unwrap_or_default())
    }
}

impl Default for MealDb {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

#[async_trait]
impl MealSource for MealDb {
    async fn list_countries(&self) -> Result<Vec<Country>> {
        self.get("list.php", &[("a", "list")]).await
    }

    async fn filter_by_country(&self, country: &str) -> Result<Vec<MealSummary>> {
        self.get("filter.php", &[("a", country)]).await
    }

    async fn lookup_meal(&self, id: &str) -> Result<MealRecord> {
        self.get::<MealRecord>("lookup.php", &[("i", id)])
            .await?
            .into_iter()
            .next()
            .with_context(|| format!("meal {id} not found"))
    }
}
