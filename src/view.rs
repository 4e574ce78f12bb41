//! Derived views over the dish cache.
//!
//! Nothing here is cached: callers evaluate a [`MealQuery`] against the
//! current dish list every time they read a view.

use crate::data::Dish;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealQuery {
    /// Case-insensitive substring of the dish name
    pub search: String,
    pub min_rating: u8,
    /// Only dishes of this area when set
    pub country: Option<String>,
}

impl Default for MealQuery {
    fn default() -> Self {
        Self {
            search: String::new(),
            min_rating: 1,
            country: None,
        }
    }
}

impl MealQuery {
    pub fn scoped_to(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn apply<'a>(&self, meals: &'a [Dish]) -> Vec<&'a Dish> {
        let needle = self.search.to_lowercase();
        meals
            .iter()
            .filter(|dish| match &self.country {
                Some(country) => dish.area() == Some(country.as_str()),
                None => true,
            })
            .filter(|dish| dish.name().to_lowercase().contains(&needle))
            .filter(|dish| dish.rating >= self.min_rating)
            .collect()
    }
}

/// Share of the cache that passes `query`, in percent. 0 for an empty cache.
pub fn progress_percentage(meals: &[Dish], query: &MealQuery) -> f64 {
    if meals.is_empty() {
        return 0.0;
    }
    query.apply(meals).len() as f64 / meals.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_dish;

    fn query(search: &str, min_rating: u8) -> MealQuery {
        MealQuery {
            search: search.to_string(),
            min_rating,
            country: None,
        }
    }

    fn ids(dishes: Vec<&Dish>) -> Vec<&str> {
        dishes.into_iter().map(Dish::id).collect()
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let meals = vec![
            test_dish("1", "Tacos al Pastor", "Mexican", 3),
            test_dish("2", "Lasagne", "Italian", 3),
        ];
        for needle in ["tacos", "TACOS", "al pastor", "Pastor", ""] {
            let found = query(needle, 1).apply(&meals);
            assert!(found.iter().any(|d| d.id() == "1"), "{needle} should match");
        }
        assert!(query("burrito", 1).apply(&meals).is_empty());
    }

    #[test]
    fn country_scope_and_threshold() {
        let meals = vec![
            test_dish("1", "Chilaquiles", "Mexican", 2),
            test_dish("2", "Enchiladas", "Mexican", 4),
            test_dish("3", "Risotto", "Italian", 5),
        ];

        let visible = query("", 3).scoped_to("Mexican").apply(&meals);
        assert_eq!(ids(visible), vec!["2"]);

        let global = query("", 3).apply(&meals);
        assert_eq!(ids(global), vec!["2", "3"]);
    }

    #[test]
    fn progress() {
        assert_eq!(progress_percentage(&[], &query("", 1)), 0.0);
        assert_eq!(progress_percentage(&[], &query("zzz", 5)), 0.0);

        let meals = vec![
            test_dish("1", "Pozole", "Mexican", 1),
            test_dish("2", "Mole", "Mexican", 2),
            test_dish("3", "Tamales", "Mexican", 3),
            test_dish("4", "Sopes", "Mexican", 5),
        ];
        assert_eq!(progress_percentage(&meals, &query("", 1)), 100.0);
        assert_eq!(progress_percentage(&meals, &query("", 3)), 50.0);
        assert_eq!(progress_percentage(&meals, &query("mole", 1)), 25.0);
        assert_eq!(progress_percentage(&meals, &query("nothing", 1)), 0.0);

        for min_rating in 1..=5 {
            for search in ["", "o", "s", "xyz"] {
                let q = query(search, min_rating);
                let expected = 100.0 * q.apply(&meals).len() as f64 / meals.len() as f64;
                assert_eq!(progress_percentage(&meals, &q), expected);
            }
        }
    }
}
