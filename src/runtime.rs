//! Process runtime abstraction
//!
//! The reconciler only needs two things from whatever runs the proxy:
//! a snapshot of running processes with their names, and a way to tell one
//! of them to reload. Docker is the production implementation.

use async_trait::async_trait;
use thiserror::Error;

/// A running process as reported by the runtime at listing time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: String,
    pub names: Vec<String>,
}

impl ProcessInfo {
    pub fn new(id: impl Into<String>, names: &[&str]) -> Self {
        Self {
            id: id.into(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cannot connect to process runtime at '{endpoint}': {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait ProcessRuntime: Send + Sync {
    /// Snapshot of the processes running right now
    async fn list_processes(&self) -> Result<Vec<ProcessInfo>, RuntimeError>;

    /// Ask one process to reload its configuration
    async fn send_reload_signal(&self, id: &str) -> Result<(), RuntimeError>;
}
