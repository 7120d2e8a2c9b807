pub mod analytics;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod models;
pub mod runner;
pub mod selector;
pub mod store;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
