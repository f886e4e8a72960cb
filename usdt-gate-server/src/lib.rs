//! HTTP server for the usdt-gate deposit pipeline.
//!
//! Exposes payment intents, ledger balances and the background tracker over a
//! JSON API, and wires the pipeline components together from configuration.
//!
//! # Modules
//!
//! - [`handlers`] — Axum route handlers and router builder
//! - [`state`] — Shared pipeline components behind the handlers
//! - [`error`] — HTTP error type and status mapping
//! - [`config`] — Server configuration with environment variable expansion

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

pub use handlers::gateway_router;
pub use state::{AppState, Gateway};
