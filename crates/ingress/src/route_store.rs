//! Registered routes: persisted in a JSON map, served from a lock-free snapshot.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use service::errors::DeployError;
use service::routing::{RouteEntry, RouteTable};
use service::storage::json_map_store::JsonMapStore;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::observability::{ROUTES_REGISTERED, ROUTE_UPDATES_TOTAL};

/// Table plus one round-robin cursor per entry.
struct Snapshot {
    table: RouteTable,
    cursors: Vec<AtomicUsize>,
}

impl Snapshot {
    fn new(table: RouteTable) -> Self {
        let cursors = (0..table.len()).map(|_| AtomicUsize::new(0)).collect();
        Self { table, cursors }
    }
}

/// Where one request goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub service: String,
    pub upstream: String,
    /// Prefix to remove from the request path before forwarding.
    pub strip: Option<String>,
    pub tls: bool,
}

#[derive(Clone)]
pub struct RouteStore {
    store: Arc<JsonMapStore<RouteEntry>>,
    snapshot: Arc<ArcSwap<Snapshot>>,
    writes: Arc<Mutex<()>>,
}

impl RouteStore {
    /// Load persisted routes. A file whose routes conflict is rejected.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, DeployError> {
        let store = JsonMapStore::open(path).await?;
        let table = RouteTable::build(store.list().await)?;
        info!(routes = table.len(), "routes loaded");
        ROUTES_REGISTERED.set(table.len() as i64);
        Ok(Self {
            store,
            snapshot: Arc::new(ArcSwap::from_pointee(Snapshot::new(table))),
            writes: Arc::new(Mutex::new(())),
        })
    }

    pub async fn list(&self) -> Vec<(String, RouteEntry)> {
        self.store.list().await
    }

    /// Register or replace `service`'s route. Returns whether anything changed;
    /// an overlap with another service's route is rejected and nothing is stored.
    pub async fn upsert(&self, service: &str, entry: RouteEntry) -> Result<bool, DeployError> {
        let entry = entry.normalized();
        if entry.upstreams.is_empty() {
            return Err(DeployError::Config(format!("route for `{service}` has no upstreams")));
        }
        let _guard = self.writes.lock().await;
        let changed = self
            .store
            .update_map(|routes| {
                if routes.get(service) == Some(&entry) {
                    return Ok(false);
                }
                routes.insert(service.to_string(), entry.clone());
                RouteTable::build(routes.iter().map(|(k, v)| (k.clone(), v.clone())))?;
                Ok(true)
            })
            .await?;
        if changed {
            info!(%service, route = %entry.display_route(), upstreams = ?entry.upstreams, "route registered");
            self.refresh().await?;
        }
        Ok(changed)
    }

    pub async fn remove(&self, service: &str) -> Result<bool, DeployError> {
        let _guard = self.writes.lock().await;
        let removed = self.store.remove(service).await?;
        if removed {
            info!(%service, "route removed");
            self.refresh().await?;
        }
        Ok(removed)
    }

    async fn refresh(&self) -> Result<(), DeployError> {
        let table = RouteTable::build(self.store.list().await).map_err(|e| {
            warn!(error = %e, "stored routes no longer build a table");
            e
        })?;
        ROUTES_REGISTERED.set(table.len() as i64);
        ROUTE_UPDATES_TOTAL.inc();
        self.snapshot.store(Arc::new(Snapshot::new(table)));
        Ok(())
    }

    /// Pick the route for a request and advance its upstream cursor.
    pub fn resolve(&self, host: &str, path: &str) -> Option<Resolved> {
        let snap = self.snapshot.load();
        let (service, route) = snap.table.resolve(host, path)?;
        let idx = snap
            .table
            .entries()
            .iter()
            .position(|(s, _)| s == service)?;
        if route.upstreams.is_empty() {
            return None;
        }
        let n = snap.cursors[idx].fetch_add(1, Ordering::Relaxed);
        Some(Resolved {
            service: service.to_string(),
            upstream: route.upstreams[n % route.upstreams.len()].clone(),
            strip: if route.strip_prefix { route.path_prefix.clone() } else { None },
            tls: route.tls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(prefix: Option<&str>, upstreams: &[&str]) -> RouteEntry {
        RouteEntry {
            host: "App.Example.com".into(),
            path_prefix: prefix.map(str::to_string),
            upstreams: upstreams.iter().map(|s| s.to_string()).collect(),
            tls: false,
            strip_prefix: prefix.is_some(),
        }
    }

    fn tmp() -> PathBuf {
        std::env::temp_dir().join(format!("ingress_routes_{}.json", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn upsert_resolve_and_round_robin() -> Result<(), anyhow::Error> {
        let path = tmp();
        let store = RouteStore::open(&path).await?;
        assert!(store.upsert("web", entry(None, &["10.0.0.1:8080"])).await?);
        assert!(store.upsert("api", entry(Some("api"), &["10.0.0.1:3000", "10.0.0.2:3000"])).await?);
        assert!(!store.upsert("api", entry(Some("/api/"), &["10.0.0.1:3000", "10.0.0.2:3000"])).await?);

        let a = store.resolve("app.example.com", "/api/users").unwrap();
        let b = store.resolve("app.example.com", "/api/users").unwrap();
        assert_eq!(a.service, "api");
        assert_eq!(a.strip.as_deref(), Some("/api"));
        assert_ne!(a.upstream, b.upstream);
        assert_eq!(store.resolve("app.example.com", "/").unwrap().service, "web");
        assert!(store.resolve("other.example.com", "/").is_none());

        // reload from disk
        let reopened = RouteStore::open(&path).await?;
        assert_eq!(reopened.list().await.len(), 2);

        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }

    #[tokio::test]
    async fn conflicting_route_is_rejected_and_not_stored() -> Result<(), anyhow::Error> {
        let path = tmp();
        let store = RouteStore::open(&path).await?;
        store.upsert("web", entry(None, &["10.0.0.1:8080"])).await?;
        let err = store.upsert("landing", entry(None, &["10.0.0.3:8080"])).await.unwrap_err();
        assert!(matches!(err, DeployError::RouteConflict { .. }));
        assert_eq!(store.list().await.len(), 1);
        assert_eq!(store.resolve("app.example.com", "/").unwrap().service, "web");

        assert!(store.remove("web").await?);
        assert!(!store.remove("web").await?);
        assert!(store.resolve("app.example.com", "/").is_none());
        let _ = tokio::fs::remove_file(&path).await;
        Ok(())
    }
}
