use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MAX_RATING: u8 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    #[serde(rename = "strArea")]
    pub name: String,
}

impl Country {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Minimal record returned by the filter endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealSummary {
    #[serde(rename = "idMeal")]
    pub id: String,
    #[serde(rename = "strMeal")]
    pub name: String,
    #[serde(rename = "strMealThumb", default)]
    pub thumbnail: Option<String>,
}

/// Full record returned by the lookup endpoint, before enrichment.
///
/// Fields we don't model are kept in `extra` and written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealRecord {
    #[serde(rename = "idMeal")]
    pub id: String,
    #[serde(rename = "strMeal")]
    pub name: String,
    #[serde(rename = "strArea", default)]
    pub area: Option<String>,
    #[serde(rename = "strMealThumb", default)]
    pub thumbnail: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A meal record carrying the synthesized commerce fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dish {
    #[serde(flatten)]
    pub record: MealRecord,
    pub price: u32,
    pub rating: u8,
}

impl Dish {
    /// Attach a price in [50, 250) and a rating in [1, 5].
    pub fn enrich(record: MealRecord, rng: &mut impl Rng) -> Self {
        Self {
            record,
            price: rng.gen_range(50..250),
            rating: rng.gen_range(1..=MAX_RATING),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn area(&self) -> Option<&str> {
        self.record.area.as_deref()
    }

    pub fn thumbnail(&self) -> Option<&str> {
        self.record.thumbnail.as_deref()
    }

    /// Render the rating as filled and empty stars, e.g. `★★★☆☆`.
    pub fn stars(&self) -> String {
        let filled = self.rating.min(MAX_RATING) as usize;
        format!(
            "{}{}",
            "★".repeat(filled),
            "☆".repeat(MAX_RATING as usize - filled)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    #[serde(rename = "idMeal")]
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub price: u32,
    pub quantity: u32,
}

impl CartLine {
    /// A new line for `dish` with quantity 1.
    ///
    /// The price is drawn from [100, 600] and is unrelated to the dish's own price.
    pub fn new(dish: &Dish, rng: &mut impl Rng) -> Self {
        Self {
            id: dish.id().to_string(),
            name: dish.name().to_string(),
            image: dish.record.thumbnail.clone(),
            price: rng.gen_range(100..=600),
            quantity: 1,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_dish(id: &str, name: &str, area: &str, rating: u8) -> Dish {
    Dish {
        record: MealRecord {
            id: id.to_string(),
            name: name.to_string(),
            area: Some(area.to_string()),
            thumbnail: Some(format!("https://img.example/{id}.jpg")),
            extra: Map::new(),
        },
        price: 100,
        rating,
    }
}
