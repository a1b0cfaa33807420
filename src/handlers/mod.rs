//! HTTP API handlers.
//!
//! Route extraction lives in [`crate::server`]; these functions receive the
//! already-extracted inputs.

pub mod images;
