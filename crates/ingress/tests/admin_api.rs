use std::net::SocketAddr;

use ingress::admin::{self, AdminToken};
use ingress::route_store::RouteStore;
use reqwest::StatusCode as HttpStatusCode;
use service::errors::DeployError;
use service::registry::{HttpRouteRegistry, RouteRegistry};
use service::routing::RouteEntry;
use tokio::net::TcpListener;
use uuid::Uuid;

const TOKEN: &str = "test-admin-token";

struct TestIngress {
    base_url: String,
    routes_path: std::path::PathBuf,
}

async fn start_ingress() -> anyhow::Result<TestIngress> {
    let routes_path = std::env::temp_dir().join(format!("ingress_admin_{}.json", Uuid::new_v4()));
    let store = RouteStore::open(&routes_path).await?;
    let app = common::admin_http::with_health(admin::router(store, AdminToken::new(TOKEN)));

    let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr: SocketAddr = listener.local_addr()?;
    let base_url = format!("http://{}:{}", addr.ip(), addr.port());

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await { eprintln!("server error: {}", e); }
    });

    Ok(TestIngress { base_url, routes_path })
}

impl TestIngress {
    fn registry(&self) -> HttpRouteRegistry {
        HttpRouteRegistry::default().with_token(&self.base_url, TOKEN)
    }
}

fn route(prefix: Option<&str>, upstream: &str) -> RouteEntry {
    RouteEntry {
        host: "app.example.com".into(),
        path_prefix: prefix.map(str::to_string),
        upstreams: vec![upstream.to_string()],
        tls: true,
        strip_prefix: false,
    }
}

#[tokio::test]
async fn register_list_and_deregister_through_client() -> anyhow::Result<()> {
    let app = start_ingress().await?;
    let registry = app.registry();

    assert!(registry.register(&app.base_url, "web", &route(None, "10.0.0.1:8080")).await?);
    assert!(registry.register(&app.base_url, "api", &route(Some("/api"), "10.0.0.1:3000")).await?);
    assert!(!registry.register(&app.base_url, "api", &route(Some("/api"), "10.0.0.1:3000")).await?);

    let routes = registry.routes(&app.base_url).await?;
    let names: Vec<&str> = routes.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(names, ["api", "web"]);

    assert!(registry.deregister(&app.base_url, "api").await?);
    assert!(!registry.deregister(&app.base_url, "api").await?);
    assert_eq!(registry.routes(&app.base_url).await?.len(), 1);

    let _ = tokio::fs::remove_file(&app.routes_path).await;
    Ok(())
}

#[tokio::test]
async fn overlapping_route_is_a_conflict() -> anyhow::Result<()> {
    let app = start_ingress().await?;
    let registry = app.registry();
    registry.register(&app.base_url, "web", &route(None, "10.0.0.1:8080")).await?;

    let err = registry
        .register(&app.base_url, "landing", &route(None, "10.0.0.2:8080"))
        .await
        .unwrap_err();
    match err {
        DeployError::RouteConflict { host, first, second, .. } => {
            assert_eq!(host, "app.example.com");
            assert_eq!(first, "web");
            assert_eq!(second, "landing");
        }
        other => panic!("expected conflict, got {other}"),
    }

    let _ = tokio::fs::remove_file(&app.routes_path).await;
    Ok(())
}

#[tokio::test]
async fn health_metrics_and_bad_requests() -> anyhow::Result<()> {
    let app = start_ingress().await?;
    let client = reqwest::Client::new();

    let res = client.get(format!("{}/healthz", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);
    let body: serde_json::Value = res.json().await?;
    assert_eq!(body["status"], "ok");

    let res = client
        .put(format!("{}/routes/Bad_Name", app.base_url))
        .bearer_auth(TOKEN)
        .json(&route(None, "10.0.0.1:8080"))
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);

    let mut empty = route(None, "x");
    empty.upstreams.clear();
    let res = client
        .put(format!("{}/routes/web", app.base_url))
        .bearer_auth(TOKEN)
        .json(&empty)
        .send()
        .await?;
    assert_eq!(res.status(), HttpStatusCode::BAD_REQUEST);

    let res = client.get(format!("{}/metrics", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);

    let _ = tokio::fs::remove_file(&app.routes_path).await;
    Ok(())
}

#[tokio::test]
async fn route_changes_need_the_admin_token() -> anyhow::Result<()> {
    let app = start_ingress().await?;
    let client = reqwest::Client::new();
    let url = format!("{}/routes/web", app.base_url);

    let res = client.put(&url).json(&route(None, "10.0.0.1:8080")).send().await?;
    assert_eq!(res.status(), HttpStatusCode::UNAUTHORIZED);
    let res = client.delete(&url).bearer_auth("wrong").send().await?;
    assert_eq!(res.status(), HttpStatusCode::UNAUTHORIZED);

    // reads stay open
    let res = client.get(format!("{}/routes", app.base_url)).send().await?;
    assert_eq!(res.status(), HttpStatusCode::OK);

    let err = HttpRouteRegistry::default()
        .register(&app.base_url, "web", &route(None, "10.0.0.1:8080"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeployError::Registry(ref m) if m.contains("admin token")), "{err}");
    assert!(app.registry().routes(&app.base_url).await?.is_empty());

    let _ = tokio::fs::remove_file(&app.routes_path).await;
    Ok(())
}
