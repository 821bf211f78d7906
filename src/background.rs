//! Detached best-effort side tasks
//!
//! Work spawned here runs independently of the caller: nobody awaits it and its
//! failure is only logged.

use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn a task whose result never reaches the caller
///
/// The returned handle may be dropped; it exists so tests can observe completion.
pub fn spawn_detached<F, E>(label: &'static str, task: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    tokio::spawn(async move {
        match task.await {
            Ok(()) => debug!(task = label, "Background task finished"),
            Err(e) => warn!(task = label, error = %e, "Background task failed"),
        }
    })
}
