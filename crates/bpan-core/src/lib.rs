pub mod config;

// Transfer engine modules.
pub mod api;
pub mod cancel;
pub mod digest;
pub mod download;
pub mod error;
pub mod http;
pub mod plan;
pub mod progress;
pub mod retry;
pub mod sanitize;
pub mod snapshot;
pub mod tier;
pub mod upload;
