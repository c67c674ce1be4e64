pub mod app;
pub mod auth;
pub mod client_ip;
pub mod config;
pub mod error;
pub mod geo;
pub mod ingest;
pub mod routes;
pub mod state;
