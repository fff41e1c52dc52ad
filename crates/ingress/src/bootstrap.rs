use anyhow::{anyhow, Context};
use common::admin_http;
use pingora_core::server::Server;
use tracing::{error, info, warn};

use crate::admin::{self, AdminToken};
use crate::config::ADMIN_TOKEN_ENV;
use crate::config::IngressConfig;
use crate::proxy::IngressProxy;
use crate::route_store::RouteStore;

/// Open the route store, start the admin API and assemble the pingora server.
pub fn build(config: IngressConfig) -> anyhow::Result<Server> {
    let token = config
        .admin_token()
        .ok_or_else(|| anyhow!("no admin token; set {ADMIN_TOKEN_ENV} or admin_token in the config"))?;

    // The store is opened on a short-lived runtime; pingora brings its own.
    let routes = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(RouteStore::open(&config.routes_path))
        .with_context(|| format!("loading routes from {}", config.routes_path))?;

    admin_http::spawn_admin_server(&config.admin_listen, admin::router(routes.clone(), AdminToken::new(token)));

    let mut server = Server::new(None).map_err(|e| anyhow!("init server: {e}"))?;
    server.bootstrap();

    let proxy = IngressProxy {
        routes,
        connect_timeout: config.connect_timeout(),
        read_timeout: config.read_timeout(),
    };
    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);
    proxy_service.add_tcp(&config.listen);
    server.add_service(proxy_service);
    info!(listen = %config.listen, admin = %config.admin_listen, "ingress assembled");
    Ok(server)
}

/// Load the config and serve until the process exits. Expects logging to be initialised.
pub fn run() {
    let path = IngressConfig::path_from_env();
    let config = IngressConfig::load_from_file(&path).unwrap_or_else(|e| {
        warn!("Failed to load config file {}: {}, using defaults", path, e);
        IngressConfig::default()
    });
    info!(listen = %config.listen, admin = %config.admin_listen, routes = %config.routes_path, "Loaded configuration");

    match build(config) {
        Ok(server) => server.run_forever(),
        Err(e) => {
            error!(error = %e, "ingress failed to start");
            std::process::exit(1);
        }
    }
}
