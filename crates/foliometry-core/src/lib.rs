pub mod config;
pub mod error;
pub mod geo;
pub mod ping;
pub mod store;
