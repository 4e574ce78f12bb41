//! The catalog/cart controller.
//!
//! [`Catalog`] owns every piece of mutable state the presentation layer sees:
//! the country list, the dish cache, the search/threshold inputs and the cart.
//! Reads go through accessors that evaluate the derived views on the spot;
//! writes go through the action methods below, which also keep the persisted
//! slots in step.

use std::sync::Arc;

use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};
use futures::future::try_join_all;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::data::{CartLine, Country, Dish, MAX_RATING};
use crate::db::{Notification, StorageEvent, StorageKey, Store};
use crate::error::{CatalogError, Result};
use crate::remote::MealSource;
use crate::task::CancelToken;
use crate::view::{self, MealQuery};

#[derive(Debug, Default)]
struct CatalogState {
    countries: Vec<Country>,
    selected_country: String,
    meals: Vec<Dish>,
    search: String,
    min_rating: u8,
    cart: Vec<CartLine>,
}

impl CatalogState {
    fn query(&self) -> MealQuery {
        MealQuery {
            search: self.search.clone(),
            min_rating: self.min_rating,
            country: None,
        }
    }
}

/// Append the dishes of `incoming` whose id is not in `cached` yet.
///
/// Cached entries are never replaced, so a dish keeps the price and rating it
/// got the first time it was enriched.
pub fn merge_meals(cached: Vec<Dish>, incoming: Vec<Dish>) -> Vec<Dish> {
    let mut merged: Vec<Dish> = Vec::with_capacity(cached.len() + incoming.len());
    for dish in cached.into_iter().chain(incoming) {
        if !merged.iter().any(|existing| existing.id() == dish.id()) {
            merged.push(dish);
        }
    }
    merged
}

pub struct Catalog {
    source: Arc<dyn MealSource>,
    store: Store,
    state: Mutex<CatalogState>,
    rng: Mutex<StdRng>,
    current_load: std::sync::Mutex<Option<CancelToken>>,
    /// Cancelled on drop, stops the sync task
    closed: CancelToken,
}

impl Drop for Catalog {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

impl Catalog {
    /// Build a catalog over `store`, restoring the persisted cart.
    pub async fn open(source: Arc<dyn MealSource>, store: Store, config: &Config) -> Self {
        let cart = match store.get::<Vec<CartLine>>(StorageKey::Cart).await {
            Ok(cart) => cart.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("discard stored cart: {e:#}");
                Vec::new()
            }
        };
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            source,
            store,
            state: Mutex::new(CatalogState {
                selected_country: config.default_country.clone(),
                min_rating: 1,
                cart,
                ..Default::default()
            }),
            rng: Mutex::new(rng),
            current_load: std::sync::Mutex::new(None),
            closed: CancelToken::new(),
        }
    }

    /// Initial load: countries, then the cached dishes or, when there are
    /// none yet, the dishes of the selected country.
    pub async fn mount(&self) {
        let _ = self.load_countries().await;

        match self.store.get::<Vec<Dish>>(StorageKey::Meals).await {
            Ok(Some(meals)) => {
                tracing::info!("restored {} cached meals", meals.len());
                self.state.lock().await.meals = meals;
            }
            Ok(None) => {
                let _ = self.load_meals_by_country().await;
            }
            Err(e) => {
                tracing::warn!("cached meals unreadable, reloading: {e:#}");
                let _ = self.load_meals_by_country().await;
            }
        }
    }

    pub async fn load_countries(&self) -> Result<usize> {
        let countries = match self.source.list_countries().await {
            Ok(countries) => countries,
            Err(e) => {
                tracing::error!("fail to load countries: {e:#}");
                return Err(CatalogError::RemoteFetch(e));
            }
        };
        let count = countries.len();
        self.state.lock().await.countries = countries;
        Ok(count)
    }

    /// Fetch, enrich and merge the dishes of the selected country.
    ///
    /// Starting a load cancels the one still in flight, if any. Returns how
    /// many dishes were new to the cache.
    pub async fn load_meals_by_country(&self) -> Result<usize> {
        let country = self.state.lock().await.selected_country.clone();
        if country.trim().is_empty() {
            tracing::warn!("no country selected, skip loading meals");
            return Err(CatalogError::InvalidSelection);
        }

        let token = self.begin_load();
        let batch = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            batch = self.fetch_batch(&country) => Some(batch),
        };
        let batch = match batch {
            None => {
                tracing::info!("loading {country} was cancelled");
                return Err(CatalogError::Cancelled);
            }
            Some(Err(e)) => {
                tracing::error!("fail to load meals of {country}: {e:#}");
                return Err(CatalogError::RemoteFetch(e));
            }
            Some(Ok(batch)) => batch,
        };

        let mut state = self.state.lock().await;
        // a newer load may have started while we were waiting for the lock
        if token.is_cancelled() {
            tracing::info!("loading {country} was cancelled");
            return Err(CatalogError::Cancelled);
        }

        let cached = match self.store.get::<Vec<Dish>>(StorageKey::Meals).await {
            Ok(cached) => cached.unwrap_or_default(),
            Err(e) => {
                tracing::warn!("discard stored meals: {e:#}");
                Vec::new()
            }
        };
        let before = cached.len();
        let merged = merge_meals(cached, batch);
        self.store
            .set(StorageKey::Meals, &merged)
            .await
            .map_err(CatalogError::Storage)?;

        let added = merged.len() - before;
        tracing::info!("loaded {country}: {added} new meals, {} cached", merged.len());
        state.meals = merged;
        Ok(added)
    }

    fn begin_load(&self) -> CancelToken {
        let token = CancelToken::new();
        let mut current = self
            .current_load
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(previous) = current.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Summary list, then every lookup at once. Any failure fails the batch.
    async fn fetch_batch(&self, country: &str) -> anyhow::Result<Vec<Dish>> {
        let summaries = self.source.filter_by_country(country).await?;
        tracing::debug!("{country}: looking up {} meals", summaries.len());

        let records = try_join_all(
            summaries
                .iter()
                .map(|summary| self.source.lookup_meal(&summary.id)),
        )
        .await?;

        let mut rng = self.rng.lock().await;
        Ok(records
            .into_iter()
            .map(|record| Dish::enrich(record, &mut *rng))
            .collect())
    }

    /// Select a country and reload its dishes. Failures are logged by the load.
    pub async fn select_country(&self, country: &str) -> Result<usize> {
        self.state.lock().await.selected_country = country.to_string();
        self.load_meals_by_country().await
    }

    pub async fn set_search(&self, search: &str) {
        self.state.lock().await.search = search.to_string();
    }

    pub async fn set_min_rating(&self, min_rating: u8) {
        self.state.lock().await.min_rating = min_rating.clamp(1, MAX_RATING);
    }

    pub async fn add_to_cart(&self, dish: &Dish) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(line) = state.cart.iter_mut().find(|line| line.id == dish.id()) {
            line.quantity += 1;
        } else {
            let line = CartLine::new(dish, &mut *self.rng.lock().await);
            state.cart.push(line);
        }
        self.persist_cart(&state.cart).await
    }

    /// Take one unit of `id` out of the cart. `false` when it wasn't there.
    pub async fn remove_from_cart(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(pos) = state.cart.iter().position(|line| line.id == id) else {
            return Ok(false);
        };
        if state.cart[pos].quantity > 1 {
            state.cart[pos].quantity -= 1;
        } else {
            state.cart.remove(pos);
        }
        self.persist_cart(&state.cart).await?;
        Ok(true)
    }

    async fn persist_cart(&self, cart: &[CartLine]) -> Result<()> {
        self.store.set(StorageKey::Cart, cart).await.map_err(|e| {
            tracing::error!("fail to persist cart: {e:#}");
            CatalogError::Storage(e)
        })
    }

    /// Remember `dish` as the one shown on the detail page.
    pub async fn view_details(&self, dish: &Dish) -> Result<()> {
        self.store
            .set(StorageKey::SelectedMeal, dish)
            .await
            .map_err(CatalogError::Storage)
    }

    pub async fn viewed_dish(&self) -> Result<Option<Dish>> {
        self.store
            .get(StorageKey::SelectedMeal)
            .await
            .map_err(CatalogError::Storage)
    }

    /// Apply a change another instance made to the shared storage.
    ///
    /// A new dish cache replaces ours as is; everything else is ignored.
    pub async fn apply_storage_event(&self, event: &StorageEvent) {
        if event.key != StorageKey::Meals {
            return;
        }
        if let Some(meals) = event.parse::<Vec<Dish>>() {
            tracing::debug!("meals replaced from storage: {} entries", meals.len());
            self.state.lock().await.meals = meals;
        }
    }

    async fn resync_meals(&self) {
        match self.store.get::<Vec<Dish>>(StorageKey::Meals).await {
            Ok(Some(meals)) => self.state.lock().await.meals = meals,
            Ok(None) => {}
            Err(e) => tracing::warn!("fail to resync meals: {e:#}"),
        }
    }

    /// Follow changes made by other instances until the catalog is dropped.
    ///
    /// The task only keeps a weak reference, so it never holds the catalog alive.
    pub fn spawn_sync(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut subscription = self.store.subscribe();
        let closed = self.closed.clone();
        let catalog = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let notification = tokio::select! {
                    _ = closed.cancelled() => break,
                    notification = subscription.recv() => notification,
                };
                let Some(notification) = notification else {
                    break;
                };
                let Some(catalog) = catalog.upgrade() else {
                    break;
                };
                match notification {
                    Notification::Changed(event) => catalog.apply_storage_event(&event).await,
                    Notification::Lagged(missed) => {
                        tracing::warn!("missed {missed} storage events, resyncing");
                        catalog.resync_meals().await;
                    }
                }
            }
        })
    }

    pub async fn countries(&self) -> Vec<Country> {
        self.state.lock().await.countries.clone()
    }

    /// Countries fuzzy-matching `pattern`, best match first.
    pub async fn search_countries(&self, pattern: &str) -> Vec<Country> {
        let countries = self.countries().await;
        if pattern.trim().is_empty() {
            return countries;
        }
        let matcher = SkimMatcherV2::default().ignore_case();
        let mut scored: Vec<(i64, Country)> = countries
            .into_iter()
            .filter_map(|country| {
                matcher
                    .fuzzy_match(&country.name, pattern)
                    .map(|score| (score, country))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().map(|(_, country)| country).collect()
    }

    pub async fn selected_country(&self) -> String {
        self.state.lock().await.selected_country.clone()
    }

    pub async fn search(&self) -> String {
        self.state.lock().await.search.clone()
    }

    pub async fn min_rating(&self) -> u8 {
        self.state.lock().await.min_rating
    }

    /// The whole dish cache
    pub async fn meals(&self) -> Vec<Dish> {
        self.state.lock().await.meals.clone()
    }

    pub async fn find_meal(&self, id: &str) -> Option<Dish> {
        self.state
            .lock()
            .await
            .meals
            .iter()
            .find(|dish| dish.id() == id)
            .cloned()
    }

    /// Dishes of the selected country passing the search and threshold
    pub async fn visible_meals(&self) -> Vec<Dish> {
        let state = self.state.lock().await;
        let query = state.query().scoped_to(state.selected_country.clone());
        query.apply(&state.meals).into_iter().cloned().collect()
    }

    /// Dishes of every cached country passing the search and threshold
    pub async fn filtered_meals(&self) -> Vec<Dish> {
        let state = self.state.lock().await;
        state.query().apply(&state.meals).into_iter().cloned().collect()
    }

    pub async fn progress_percentage(&self) -> f64 {
        let state = self.state.lock().await;
        view::progress_percentage(&state.meals, &state.query())
    }

    pub async fn cart(&self) -> Vec<CartLine> {
        self.state.lock().await.cart.clone()
    }

    pub async fn total_items(&self) -> u32 {
        self.state
            .lock()
            .await
            .cart
            .iter()
            .map(|line| line.quantity)
            .sum()
    }
}
