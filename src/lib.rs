pub mod aggregate;
pub mod app;
pub mod characterize;
pub mod config;
pub mod domain;
pub mod error;
pub mod groups;
pub mod interner;
pub mod loader;
pub mod output;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod store;
pub mod trend;
