//! Environment/runtime helpers
//!
//! Sanity checks to ensure the local state directory layout exists at startup.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Ensure `<state_dir>` and its `locks/` subdirectory exist; returns the lock directory.
pub async fn ensure_state_dir(state_dir: &Path) -> anyhow::Result<PathBuf> {
    let locks = state_dir.join("locks");
    tokio::fs::create_dir_all(&locks)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {e}", locks.display()))?;
    debug!(state_dir = %state_dir.display(), "state directory ready");
    Ok(locks)
}

/// Read an environment variable, treating empty values as unset.
pub fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_lock_directory() -> anyhow::Result<()> {
        let root = std::env::temp_dir().join(format!("state_dir_{}", std::process::id()));
        let locks = ensure_state_dir(&root).await?;
        assert!(tokio::fs::metadata(&locks).await?.is_dir());
        let _ = tokio::fs::remove_dir_all(&root).await;
        Ok(())
    }
}
