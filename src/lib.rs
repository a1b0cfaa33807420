//! imagestore library — per-user image storage engine and HTTP API.
//!
//! This crate provides the components for running the image store server:
//! the filesystem storage engine, token authentication, request handling,
//! configuration and metrics.

use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod tokens;

use crate::config::Config;
use crate::storage::ImageStore;
use crate::tokens::TokenStore;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Image storage engine.
    pub storage: Arc<dyn ImageStore>,
    /// Persisted API token set.
    pub tokens: Arc<dyn TokenStore>,
}
