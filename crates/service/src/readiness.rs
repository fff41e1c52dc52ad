//! Bounded readiness polling for accessories and service health checks.

use std::fmt;

use tracing::debug;

use crate::errors::DeployError;
use crate::retry::{retry_with_policy, RetryPolicy, Retryable};

/// Why polling stopped without the target becoming ready.
#[derive(Debug)]
pub enum PollError {
    /// Every attempt ran and none reported ready.
    Exhausted { attempts: u32 },
    /// A probe failed in a way another attempt cannot fix.
    Failed(DeployError),
}

enum Probe {
    NotReady,
    Error(DeployError),
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Probe::NotReady => write!(f, "not ready"),
            Probe::Error(e) => write!(f, "{e}"),
        }
    }
}

impl Retryable for Probe {
    fn is_retryable(&self) -> bool {
        match self {
            Probe::NotReady => true,
            Probe::Error(e) => e.is_retryable(),
        }
    }
}

/// Call `probe` until it reports `true`, at most `policy.max_attempts()` times
/// with the policy's interval between calls. Returns the attempt that succeeded.
pub async fn poll_until_ready<F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<u32, PollError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, DeployError>>,
{
    let mut attempts = 0;
    let outcome = retry_with_policy(policy, || {
        attempts += 1;
        let fut = probe();
        async move {
            match fut.await {
                Ok(true) => Ok(()),
                Ok(false) => Err(Probe::NotReady),
                Err(e) => Err(Probe::Error(e)),
            }
        }
    })
    .await;

    match outcome {
        Ok(()) => {
            debug!(attempts, "ready");
            Ok(attempts)
        }
        Err(Probe::Error(e)) if !e.is_retryable() => Err(PollError::Failed(e)),
        Err(_) => Err(PollError::Exhausted { attempts }),
    }
}
