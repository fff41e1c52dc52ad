//! Client side of the ingress route registry.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::DeployError;
use crate::retry::{retry_with_policy, RetryPolicy, Retryable};
use crate::routing::RouteEntry;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutesResponse {
    pub routes: BTreeMap<String, RouteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeResponse {
    pub changed: bool,
}

/// Body of a 409 answer to a route registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResponse {
    pub error: String,
    pub host: String,
    #[serde(default)]
    pub path_prefix: Option<String>,
    pub existing: String,
}

/// Route registrations on an ingress, addressed by its admin URL.
#[async_trait]
pub trait RouteRegistry: Send + Sync {
    async fn routes(&self, ingress: &str) -> Result<Vec<(String, RouteEntry)>, DeployError>;
    /// Register or replace a service's route; `false` when it was already identical.
    async fn register(&self, ingress: &str, service: &str, entry: &RouteEntry) -> Result<bool, DeployError>;
    /// Drop a service's route; `false` when none was registered.
    async fn deregister(&self, ingress: &str, service: &str) -> Result<bool, DeployError>;
}

#[derive(Clone)]
pub struct HttpRouteRegistry {
    client: reqwest::Client,
    retry: RetryPolicy,
    /// Admin bearer token per ingress URL.
    tokens: BTreeMap<String, String>,
}

impl std::fmt::Debug for HttpRouteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRouteRegistry")
            .field("retry", &self.retry)
            .field("ingresses_with_token", &self.tokens.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Only transport failures are retried; an answer from the ingress is final.
impl Retryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        self.is_connect() || self.is_timeout()
    }
}

impl Default for HttpRouteRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

fn registry_err(e: impl std::fmt::Display) -> DeployError {
    DeployError::Registry(e.to_string())
}

impl HttpRouteRegistry {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            retry: RetryPolicy::exponential(3, Duration::from_millis(200), Duration::from_secs(1)),
            tokens: BTreeMap::new(),
        }
    }

    /// Send `token` as the bearer credential to the ingress at `ingress`.
    pub fn with_token(mut self, ingress: &str, token: impl Into<String>) -> Self {
        self.tokens.insert(ingress.trim_end_matches('/').to_string(), token.into());
        self
    }

    fn request(&self, method: reqwest::Method, ingress: &str, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match self.tokens.get(ingress.trim_end_matches('/')) {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn send<F>(&self, build: F) -> Result<reqwest::Response, DeployError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let resp = retry_with_policy(&self.retry, || build().send()).await.map_err(registry_err)?;
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(DeployError::Registry(format!(
                "{} rejected the admin token; check proxy.ingress_token",
                resp.url().origin().ascii_serialization()
            )));
        }
        Ok(resp)
    }

    fn url(ingress: &str, tail: &str) -> String {
        format!("{}/{}", ingress.trim_end_matches('/'), tail.trim_start_matches('/'))
    }
}

#[async_trait]
impl RouteRegistry for HttpRouteRegistry {
    async fn routes(&self, ingress: &str) -> Result<Vec<(String, RouteEntry)>, DeployError> {
        let url = Self::url(ingress, "routes");
        let resp = self
            .send(|| self.request(reqwest::Method::GET, ingress, &url))
            .await?
            .error_for_status()
            .map_err(registry_err)?;
        let body: RoutesResponse = resp.json().await.map_err(registry_err)?;
        Ok(body.routes.into_iter().collect())
    }

    async fn register(&self, ingress: &str, service: &str, entry: &RouteEntry) -> Result<bool, DeployError> {
        let url = Self::url(ingress, &format!("routes/{service}"));
        let resp = self.send(|| self.request(reqwest::Method::PUT, ingress, &url).json(entry)).await?;
        match resp.status() {
            StatusCode::CONFLICT => {
                let c: ConflictResponse = resp.json().await.map_err(registry_err)?;
                Err(DeployError::RouteConflict {
                    host: c.host,
                    prefix: c.path_prefix,
                    first: c.existing,
                    second: service.to_string(),
                })
            }
            s if s.is_success() => {
                let body: ChangeResponse = resp.json().await.map_err(registry_err)?;
                if body.changed {
                    info!(%ingress, %service, route = %entry.display_route(), "route registered");
                }
                Ok(body.changed)
            }
            s => {
                let text = resp.text().await.unwrap_or_default();
                Err(DeployError::Registry(format!("PUT routes/{service}: {s} {text}")))
            }
        }
    }

    async fn deregister(&self, ingress: &str, service: &str) -> Result<bool, DeployError> {
        let url = Self::url(ingress, &format!("routes/{service}"));
        let resp = self
            .send(|| self.request(reqwest::Method::DELETE, ingress, &url))
            .await?
            .error_for_status()
            .map_err(registry_err)?;
        let body: ChangeResponse = resp.json().await.map_err(registry_err)?;
        Ok(body.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_ingress_is_a_registry_error_after_retries() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let registry = HttpRouteRegistry::new(Duration::from_secs(2))
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)));
        let err = registry.routes(&format!("http://{addr}")).await.unwrap_err();
        assert!(matches!(err, DeployError::Registry(_)), "{err}");
    }

    #[test]
    fn url_joins_without_double_slashes() {
        assert_eq!(HttpRouteRegistry::url("http://h:9188/", "/routes/api"), "http://h:9188/routes/api");
    }
}
