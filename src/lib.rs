pub mod config;
pub mod error;
pub mod logger;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod retriever;
pub mod router;
pub mod session;
pub mod widget;
