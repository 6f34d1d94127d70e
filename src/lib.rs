//! Routegate - keeps reverse-proxy configuration in sync with routing rules
//!
//! This library provides a small reconciliation service that:
//! - Accepts routing rules (an identifier plus a target URL or host/port)
//! - Renders each rule into a proxy configuration file from a template
//! - Persists the rule and the rendered file side by side in a config directory
//! - Signals the running proxy containers whose names match a pattern to reload

pub mod api;
pub mod config;
pub mod docker;
pub mod error;
pub mod matcher;
pub mod reconciler;
pub mod record;
pub mod render;
pub mod runtime;
pub mod signal;
pub mod store;
pub mod tls;
