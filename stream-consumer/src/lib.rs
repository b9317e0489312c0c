pub mod config;
pub mod handler;
pub mod kafka;
pub mod metrics_const;
pub mod schema;
pub mod service;
