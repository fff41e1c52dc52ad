use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tokio::{fs, sync::RwLock};

use crate::errors::DeployError;

fn store_err(e: impl std::fmt::Display) -> DeployError {
    DeployError::Store(e.to_string())
}

/// JSON file-backed ordered map.
///
/// Every mutation is written to a sibling temp file and renamed over the
/// original so a crash never leaves a half-written map behind.
#[derive(Clone)]
pub struct JsonMapStore<V> {
    inner: Arc<RwLock<BTreeMap<String, V>>>,
    file_path: PathBuf,
}

impl<V> JsonMapStore<V>
where
    V: serde::Serialize + serde::de::DeserializeOwned + Clone + PartialEq,
{
    /// Open the store at `path`, creating an empty file if missing.
    /// A present but unparsable file is an error rather than silently emptied.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Arc<Self>, DeployError> {
        let file_path = path.into();
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let map: BTreeMap<String, V> = match fs::read(&file_path).await {
            Ok(bytes) if bytes.is_empty() => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DeployError::Store(format!("{}: {e}", file_path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let empty = BTreeMap::new();
                fs::write(&file_path, serde_json::to_vec(&empty).map_err(store_err)?).await?;
                empty
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Arc::new(Self { inner: Arc::new(RwLock::new(map)), file_path }))
    }

    async fn save(&self, map: &BTreeMap<String, V>) -> Result<(), DeployError> {
        let data = serde_json::to_vec_pretty(map).map_err(store_err)?;
        let tmp = self.file_path.with_extension("tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, &self.file_path).await?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<(String, V)> {
        let map = self.inner.read().await;
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        self.inner.read().await.get(key).cloned()
    }

    /// Insert or update; persists and returns `true` only when the stored value changed.
    pub async fn upsert(&self, key: &str, value: V) -> Result<bool, DeployError> {
        let mut map = self.inner.write().await;
        if map.get(key) == Some(&value) {
            return Ok(false);
        }
        map.insert(key.to_string(), value);
        self.save(&map).await?;
        Ok(true)
    }

    /// Remove a key and persist; returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, DeployError> {
        let mut map = self.inner.write().await;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.save(&map).await?;
        Ok(true)
    }

    /// Apply a checked mutation; nothing is persisted if `f` fails.
    pub async fn update_map<F, T>(&self, f: F) -> Result<T, DeployError>
    where
        F: FnOnce(&mut BTreeMap<String, V>) -> Result<T, DeployError>,
    {
        let mut map = self.inner.write().await;
        let mut draft = map.clone();
        let out = f(&mut draft)?;
        if draft != *map {
            self.save(&draft).await?;
            *map = draft;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn json_map_store_crud_persists() -> Result<(), anyhow::Error> {
        let tmp = std::env::temp_dir().join(format!("json_map_store_{}.json", uuid::Uuid::new_v4()));
        let store = JsonMapStore::<String>::open(&tmp).await?;

        assert!(store.list().await.is_empty());

        assert!(store.upsert("a", "1".into()).await?);
        assert!(store.upsert("b", "2".into()).await?);
        assert!(!store.upsert("a", "1".into()).await?, "same value is a no-op");

        store
            .update_map(|m| {
                if let Some(v) = m.get_mut("a") { *v = "10".into(); }
                Ok(())
            })
            .await?;
        assert_eq!(store.get("a").await.unwrap(), "10");

        let failed = store
            .update_map(|m| {
                m.clear();
                Err::<(), _>(DeployError::Store("rejected".into()))
            })
            .await;
        assert!(failed.is_err());
        assert_eq!(store.list().await.len(), 2, "failed mutation must not apply");

        assert!(store.remove("b").await?);
        assert!(!store.remove("b").await?);
        let reloaded = JsonMapStore::<String>::open(&tmp).await?;
        assert_eq!(reloaded.list().await, vec![("a".to_string(), "10".to_string())]);

        let _ = tokio::fs::remove_file(&tmp).await;
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let tmp = std::env::temp_dir().join(format!("json_map_store_{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, b"{not json").await.unwrap();
        assert!(JsonMapStore::<String>::open(&tmp).await.is_err());
        let _ = tokio::fs::remove_file(&tmp).await;
    }
}
