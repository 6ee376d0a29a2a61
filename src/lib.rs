pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod mapper;
pub mod parser;
pub mod progress;
pub mod record;
pub mod sanitize;
pub mod scraper;
pub mod store;
pub mod workflow;
