pub mod catalog;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod remote;
pub mod task;
pub mod view;

pub use catalog::Catalog;
pub use config::Config;
pub use error::CatalogError;
