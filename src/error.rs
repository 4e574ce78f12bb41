use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    /// Any network or API failure while talking to the recipe service
    #[error("fail to fetch from the recipe API: {0:#}")]
    RemoteFetch(#[source] anyhow::Error),

    #[error("no country selected")]
    InvalidSelection,

    /// A newer load replaced this one before it could merge
    #[error("load was cancelled by a newer request")]
    Cancelled,

    #[error("storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("no meal with id {0} in the catalog")]
    UnknownMeal(String),
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
