//! Protocol-translation and usage-accounting core for a multi-provider
//! LLM API gateway. The embedding application owns the HTTP server, auth
//! and persistence; this crate owns the channel adaptors, the relay
//! pipeline and the best-effort consumption reporting.

pub mod billing;
pub mod config;
pub mod error;
pub mod http_client;
pub mod relay;
pub mod token;

pub use error::{GatewayError, Result};
