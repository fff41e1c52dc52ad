use std::time::{Duration, Instant};

use async_trait::async_trait;
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use tracing::{debug, info, warn};

use crate::observability::{
    REQUESTS_TOTAL, REQUEST_DURATION, ROUTED_TOTAL, ROUTE_MISSES_TOTAL, UPSTREAM_ERRORS_TOTAL,
};
use crate::route_store::{Resolved, RouteStore};

pub struct IngressProxy {
    pub routes: RouteStore,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

pub struct RequestCtx {
    started: Instant,
    route: Option<Resolved>,
}

/// Host the client asked for: the `Host` header, else the URI authority.
pub fn request_host(req: &RequestHeader) -> Option<String> {
    req.headers
        .get("host")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri.host().map(str::to_string))
}

/// Remove `prefix` from a path-and-query; the result always starts with `/`.
pub fn strip_path_prefix(prefix: &str, path_and_query: &str) -> String {
    match path_and_query.strip_prefix(prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) if rest.starts_with('?') => format!("/{rest}"),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => path_and_query.to_string(),
    }
}

#[async_trait]
impl ProxyHttp for IngressProxy {
    type CTX = RequestCtx;

    fn new_ctx(&self) -> Self::CTX {
        REQUESTS_TOTAL.inc();
        RequestCtx { started: Instant::now(), route: None }
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let req = session.req_header();
        let host = request_host(req).unwrap_or_default();
        let path = req.uri.path().to_string();
        match self.routes.resolve(&host, &path) {
            Some(route) => {
                ROUTED_TOTAL.with_label_values(&[route.service.as_str()]).inc();
                ctx.route = Some(route);
                Ok(false)
            }
            None => {
                ROUTE_MISSES_TOTAL.inc();
                debug!(%host, %path, "no route");
                let _ = session.respond_error(404).await;
                Ok(true)
            }
        }
    }

    async fn upstream_peer(&self, _session: &mut Session, ctx: &mut Self::CTX) -> Result<Box<HttpPeer>> {
        let Some(route) = ctx.route.as_ref() else {
            return Err(pingora_core::Error::new_str("request reached upstream selection without a route"));
        };
        let addr = match tokio::net::lookup_host(route.upstream.as_str()).await.map(|mut a| a.next()) {
            Ok(Some(addr)) => addr,
            Ok(None) | Err(_) => {
                UPSTREAM_ERRORS_TOTAL.inc();
                warn!(service = %route.service, upstream = %route.upstream, "upstream does not resolve");
                return Err(pingora_core::Error::new_str("upstream address does not resolve"));
            }
        };
        let mut peer = Box::new(HttpPeer::new(addr, false, String::new()));
        peer.options.connection_timeout = Some(self.connect_timeout);
        peer.options.read_timeout = Some(self.read_timeout);
        Ok(peer)
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let Some(route) = ctx.route.as_ref() else {
            return Ok(());
        };
        if let Some(prefix) = route.strip.as_deref() {
            let original = upstream_request
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            let rewritten = strip_path_prefix(prefix, &original);
            match rewritten.parse() {
                Ok(uri) => upstream_request.set_uri(uri),
                Err(e) => warn!(path = %rewritten, error = %e, "cannot rewrite path"),
            }
        }

        let client = session
            .client_addr()
            .and_then(|a| a.as_inet())
            .map(|a| a.ip().to_string());
        if let Some(ip) = client {
            upstream_request.insert_header("X-Forwarded-For", ip)?;
        }
        if let Some(host) = request_host(session.req_header()) {
            upstream_request.insert_header("X-Forwarded-Host", host)?;
        }
        upstream_request.insert_header("X-Forwarded-Proto", if route.tls { "https" } else { "http" })?;
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        _upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        REQUEST_DURATION.observe(ctx.started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn logging(&self, session: &mut Session, e: Option<&pingora_core::Error>, ctx: &mut Self::CTX) {
        let status = session.response_written().map_or(0, |r| r.status.as_u16());
        let service = ctx.route.as_ref().map(|r| r.service.as_str()).unwrap_or("-");
        info!(
            method = %session.req_header().method,
            uri = %session.req_header().uri,
            service,
            status,
            error = ?e.map(|e| e.to_string()),
            duration_ms = ctx.started.elapsed().as_millis() as u64,
            "request completed"
        );
    }
}
