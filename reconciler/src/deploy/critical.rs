//! Work that must not be interrupted once started

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::errors::DeployError;

/// Default time critical work may run past the run deadline
pub const DEFAULT_GRACE: Duration = Duration::from_secs(60);

/// Runs futures on a detached task so dropping the caller (timeout,
/// cancellation) does not stop them halfway
///
/// [`CriticalSection::drain`] waits for whatever is still in flight, up
/// to the grace period.
#[derive(Debug, Clone)]
pub struct CriticalSection {
    gate: Arc<Mutex<()>>,
    grace: Duration,
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }
}

impl CriticalSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            gate: Arc::new(Mutex::new(())),
            grace,
        }
    }

    /// How long critical work may outlive the run deadline
    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Run `fut` to completion even if the returned future is dropped
    pub async fn run<F, T>(&self, fut: F) -> Result<T, DeployError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.gate.clone().lock_owned().await;
        let handle = tokio::spawn(async move {
            let _guard = guard;
            fut.await
        });
        handle
            .await
            .map_err(|e| DeployError::Internal(format!("critical section panicked: {}", e)))
    }

    /// Wait until no critical work is running
    ///
    /// Returns `false` if the grace period ran out first; the work is
    /// then left to finish (or be killed host-side) on its own.
    pub async fn drain(&self) -> bool {
        tokio::time::timeout(self.grace, self.gate.lock()).await.is_ok()
    }
}
