//! Reload signal fan-out to running proxy processes

use crate::matcher::NameMatcher;
use crate::runtime::{ProcessInfo, ProcessRuntime, RuntimeError};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("error listing processes: {0}")]
    ListFailed(#[source] RuntimeError),

    #[error("error signaling process {process_id}: {source}")]
    SignalFailed {
        process_id: String,
        #[source]
        source: RuntimeError,
    },
}

/// Pick the processes that must be signaled: any process with at least one
/// matching name, each process once.
pub fn select_targets<'a>(processes: &'a [ProcessInfo], matcher: &NameMatcher) -> Vec<&'a ProcessInfo> {
    let mut seen = HashSet::new();
    processes
        .iter()
        .filter(|p| p.names.iter().any(|name| matcher.matches(name)))
        .filter(|p| seen.insert(p.id.as_str()))
        .collect()
}

/// Sends the reload signal to every running process whose name matches
pub struct ProcessController {
    runtime: Arc<dyn ProcessRuntime>,
    matcher: NameMatcher,
}

impl ProcessController {
    pub fn new(runtime: Arc<dyn ProcessRuntime>, matcher: NameMatcher) -> Self {
        Self { runtime, matcher }
    }

    /// List the running processes and signal every match.
    ///
    /// Stops at the first failed signal. Signals already delivered are not
    /// undone; a reload is safe to repeat. Returns the ids signaled.
    pub async fn signal_matching(&self) -> Result<Vec<String>, SignalError> {
        let processes = self
            .runtime
            .list_processes()
            .await
            .map_err(SignalError::ListFailed)?;

        let targets = select_targets(&processes, &self.matcher);
        debug!(
            listed = processes.len(),
            matched = targets.len(),
            pattern = self.matcher.pattern(),
            "Selected processes for reload"
        );

        let mut signaled = Vec::with_capacity(targets.len());
        for process in targets {
            self.runtime
                .send_reload_signal(&process.id)
                .await
                .map_err(|source| SignalError::SignalFailed {
                    process_id: process.id.clone(),
                    source,
                })?;
            info!(process_id = %process.id, names = ?process.names, "Reload signal sent");
            signaled.push(process.id.clone());
        }

        Ok(signaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::fake::FakeRuntime;

    fn fleet() -> Vec<ProcessInfo> {
        vec![
            ProcessInfo::new("id-web-1", &["/web-1"]),
            ProcessInfo::new("id-web-2", &["/web-2"]),
            ProcessInfo::new("id-cache-1", &["/cache-1"]),
        ]
    }

    #[tokio::test]
    async fn test_signals_only_matching_processes() {
        let runtime = Arc::new(FakeRuntime::with_processes(fleet()));
        let controller = ProcessController::new(runtime.clone(), NameMatcher::new("web-").unwrap());

        let signaled = controller.signal_matching().await.unwrap();

        assert_eq!(signaled, vec!["id-web-1", "id-web-2"]);
        assert_eq!(runtime.signaled(), vec!["id-web-1", "id-web-2"]);
    }

    #[tokio::test]
    async fn test_process_with_several_matching_names_is_signaled_once() {
        let runtime = Arc::new(FakeRuntime::with_processes(vec![ProcessInfo::new(
            "id-1",
            &["/web-a", "/web-b", "/other"],
        )]));
        let controller = ProcessController::new(runtime.clone(), NameMatcher::new("web").unwrap());

        controller.signal_matching().await.unwrap();

        assert_eq!(runtime.signaled(), vec!["id-1"]);
    }

    #[tokio::test]
    async fn test_empty_pattern_signals_everything() {
        let runtime = Arc::new(FakeRuntime::with_processes(fleet()));
        let controller = ProcessController::new(runtime.clone(), NameMatcher::match_all());

        controller.signal_matching().await.unwrap();

        assert_eq!(runtime.signaled().len(), 3);
    }

    #[tokio::test]
    async fn test_list_failure() {
        let runtime = Arc::new(FakeRuntime::failing_list());
        let controller = ProcessController::new(runtime.clone(), NameMatcher::match_all());

        let err = controller.signal_matching().await.unwrap_err();

        assert!(matches!(err, SignalError::ListFailed(_)));
        assert!(runtime.signaled().is_empty());
    }

    #[tokio::test]
    async fn test_stops_at_first_signal_failure() {
        let runtime = Arc::new(FakeRuntime::with_processes(fleet()).fail_signal_for("id-web-1"));
        let controller = ProcessController::new(runtime.clone(), NameMatcher::new("web-").unwrap());

        let err = controller.signal_matching().await.unwrap_err();

        match err {
            SignalError::SignalFailed { process_id, .. } => assert_eq!(process_id, "id-web-1"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(runtime.signaled().is_empty());
    }

    #[tokio::test]
    async fn test_earlier_signals_are_kept_on_failure() {
        let runtime = Arc::new(FakeRuntime::with_processes(fleet()).fail_signal_for("id-web-2"));
        let controller = ProcessController::new(runtime.clone(), NameMatcher::new("web-").unwrap());

        assert!(controller.signal_matching().await.is_err());
        assert_eq!(runtime.signaled(), vec!["id-web-1"]);
    }

    #[test]
    fn test_select_targets_dedupes_by_id() {
        let processes = vec![
            ProcessInfo::new("same", &["/web-1"]),
            ProcessInfo::new("same", &["/web-1"]),
        ];
        let matcher = NameMatcher::new("web").unwrap();
        assert_eq!(select_targets(&processes, &matcher).len(), 1);
    }

    #[test]
    fn test_select_targets_without_names() {
        let processes = vec![ProcessInfo::new("anon", &[])];
        assert!(select_targets(&processes, &NameMatcher::match_all()).is_empty());
    }
}
