use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{Next, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing_subscriber::EnvFilter;

use group_manager::prelude::*;

#[derive(Clone)]
struct DevAuthConfig {
    default_user_id: Option<String>,
    require_dev_header: bool,
}

#[derive(Clone)]
struct ExampleApp {
    store: Arc<Neo4jStore>,
    config: Arc<MembershipConfig>,
    auth: DevAuthConfig,
}

impl HasStore for ExampleApp {
    type Store = Neo4jStore;

    fn store(&self) -> Arc<Self::Store> {
        Arc::clone(&self.store)
    }
}

impl MembershipApp for ExampleApp {
    fn config(&self) -> Arc<MembershipConfig> {
        Arc::clone(&self.config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("= Group manager v{} =", env!("CARGO_PKG_VERSION"));

    let config = MembershipConfig::from_env().context("invalid membership configuration")?;
    let neo4j_uri = env::var("NEO4J_URI").context("NEO4J_URI must be set")?;
    let neo4j_user = env::var("NEO4J_USER").unwrap_or_default();
    let neo4j_password = env::var("NEO4J_PASSWORD").unwrap_or_default();
    let bind = env::var("APP_BIND").unwrap_or_else(|_| "0.0.0.0:80".to_string());
    let bind_addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid APP_BIND '{}'", bind))?;

    let store = Neo4jStore::connect(&neo4j_uri, &neo4j_user, &neo4j_password, &config)
        .context("failed to connect to neo4j")?;
    create_membership_indexes(store.graph(), &config)
        .await
        .context("failed to create membership indexes")?;

    let app_state = ExampleApp {
        store: Arc::new(store),
        config: Arc::new(config),
        auth: DevAuthConfig {
            default_user_id: env::var("GROUP_MANAGER_DEFAULT_USER_ID").ok(),
            require_dev_header: env_flag("GROUP_MANAGER_REQUIRE_DEV_HEADER"),
        },
    };

    let app = Router::new()
        .route("/healthz", get(health_handler))
        .route("/example/whoami", get(whoami_handler))
        .merge(routes::<ExampleApp>())
        .layer(from_fn_with_state(
            app_state.clone(),
            dev_identity_middleware,
        ))
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", bind_addr))?;

    tracing::info!("group manager listening on http://{}", bind_addr);
    tracing::info!("auth shim headers: x-dev-user-id, x-dev-admin");

    axum::serve(listener, app)
        .await
        .context("group manager server failed")
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
}

fn env_flag(name: &str) -> bool {
    env::var(name).is_ok_and(|value| is_truthy(&value))
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn whoami_handler(actor: ActingIdentity) -> Json<ActingIdentity> {
    Json(actor)
}

/// Stands in for a real authentication layer: trusts `x-dev-user-id` and `x-dev-admin`.
async fn dev_identity_middleware(
    State(app): State<ExampleApp>,
    mut req: Request,
    next: Next,
) -> Response {
    let header = |key: &str| req.headers().get(key).and_then(|value| value.to_str().ok());
    let user_id = match header("x-dev-user-id").map(str::trim) {
        Some(user_id) if !user_id.is_empty() => Some(user_id.to_string()),
        _ if app.auth.require_dev_header => {
            return (StatusCode::UNAUTHORIZED, "x-dev-user-id header is required")
                .into_response();
        }
        _ => app.auth.default_user_id.clone(),
    };
    let is_admin = header("x-dev-admin").is_some_and(is_truthy);

    req.extensions_mut().insert(ActingIdentity {
        id: user_id.map(EntityId::from),
        is_admin,
    });
    next.run(req).await
}
