//! HTTP and command-line front ends for the NLQ translator
//!
//! Wires the OpenAI generator and the Elasticsearch transport into the core
//! orchestrators and serves them over a JSON API.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod metrics;
pub mod state;

pub use api::router;
pub use config::Config;
pub use state::AppState;
