pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod rules;
pub mod state;
