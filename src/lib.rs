pub mod auth;
pub mod config;
pub mod error;
pub mod models;
pub mod openapi;
pub mod reconcile;
pub mod repo;
pub mod routes;
pub mod security;
pub mod submission;
pub mod summary; // response aggregation

pub use config::AppConfig;
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
