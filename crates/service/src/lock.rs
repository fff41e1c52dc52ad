//! Per-target deploy lock.
//!
//! A lock is a JSON file created with exclusive-create semantics under
//! `<state_dir>/locks/<target>.lock`. At most one holder exists per target.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::DeployError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: Uuid,
    pub target: String,
    pub holder: String,
    pub pid: u32,
    #[serde(default)]
    pub message: Option<String>,
    pub acquired_at: DateTime<Utc>,
}

/// Handle to a held lock; call [`DeployLock::release`] when done.
#[derive(Debug)]
pub struct DeployLock {
    info: LockInfo,
    path: PathBuf,
}

fn lock_path(lock_dir: &Path, target: &str) -> PathBuf {
    lock_dir.join(format!("{target}.lock"))
}

/// Operator name recorded in the lock; `DEPLOY_USER`, then `USER`, then `unknown`.
pub fn current_holder() -> String {
    common::env::non_empty_var("DEPLOY_USER")
        .or_else(|| common::env::non_empty_var("USER"))
        .unwrap_or_else(|| "unknown".to_string())
}

impl DeployLock {
    pub async fn acquire(
        lock_dir: &Path,
        target: &str,
        holder: &str,
        message: Option<String>,
    ) -> Result<Self, DeployError> {
        tokio::fs::create_dir_all(lock_dir).await?;
        let path = lock_path(lock_dir, target);
        let info = LockInfo {
            id: Uuid::new_v4(),
            target: target.to_string(),
            holder: holder.to_string(),
            pid: std::process::id(),
            message,
            acquired_at: Utc::now(),
        };

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(match status(lock_dir, target).await.unwrap_or(None) {
                    Some(held) => DeployError::LockHeld {
                        target: target.to_string(),
                        holder: held.holder,
                        since: held.acquired_at.to_rfc3339(),
                    },
                    None => DeployError::LockHeld {
                        target: target.to_string(),
                        holder: "unknown".into(),
                        since: "unknown".into(),
                    },
                });
            }
            Err(e) => return Err(e.into()),
        };

        let body = serde_json::to_vec_pretty(&info).map_err(|e| DeployError::Store(e.to_string()))?;
        if let Err(e) = file.write_all(&body).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }
        file.flush().await?;
        info!(lock_target = target, holder, lock_id = %info.id, "deploy lock acquired");
        Ok(Self { info, path })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release the lock if the file still carries our id.
    pub async fn release(self) -> Result<(), DeployError> {
        match read_info(&self.path).await? {
            Some(current) if current.id == self.info.id => {
                tokio::fs::remove_file(&self.path).await?;
                info!(lock_target = %self.info.target, lock_id = %self.info.id, "deploy lock released");
            }
            Some(current) => {
                warn!(lock_target = %self.info.target, holder = %current.holder, "lock was taken over; leaving it in place");
            }
            None => warn!(lock_target = %self.info.target, "lock file already gone"),
        }
        Ok(())
    }
}

async fn read_info(path: &Path) -> Result<Option<LockInfo>, DeployError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| DeployError::Store(format!("{}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Current holder of the target's lock, if any.
pub async fn status(lock_dir: &Path, target: &str) -> Result<Option<LockInfo>, DeployError> {
    read_info(&lock_path(lock_dir, target)).await
}

/// Remove the target's lock regardless of holder; returns the removed record.
pub async fn force_release(lock_dir: &Path, target: &str) -> Result<Option<LockInfo>, DeployError> {
    let path = lock_path(lock_dir, target);
    let held = read_info(&path).await.unwrap_or(None);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => {
            warn!(lock_target = target, "deploy lock force-released");
            Ok(held)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
