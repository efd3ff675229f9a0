use axum::{response::Json, routing::get, Router};
use dotenv::dotenv;
use rb_auth::{
    AddressBinding, AuthConfig, AuthService, MemorySeed, MemoryStore, PgStore, RecordFromPath,
    Repositories, RequireRoutePermission,
};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

mod auth_routes;

use auth_routes::AuthServices;

#[derive(Debug, Deserialize)]
struct AppConfig {
    server: ServerCfg,
    auth: AuthCfgYaml,
    #[serde(default)]
    storage: StorageCfg,
    seed: Option<MemorySeed>,
}

#[derive(Debug, Deserialize)]
struct ServerCfg {
    host: String,
    port: u16,
    #[serde(default)]
    trust_forwarded_for: bool,
}

#[derive(Debug, Deserialize)]
struct AuthCfgYaml {
    jwt_secret_env: Option<String>,
    access_ttl_minutes: Option<i64>,
    refresh_ttl_days: Option<i64>,
    issuer: Option<String>,
    audience: Option<String>,
    address_binding: Option<AddressBinding>,
    bcrypt_cost: Option<u32>,
    signup_role: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageCfg {
    kind: String,
    database_url_env: Option<String>,
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            kind: "memory".into(),
            database_url_env: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let cfg: AppConfig = load_config()?;
    let auth_cfg = auth_config(&cfg.auth)?;
    info!(config = ?auth_cfg, "auth configured");

    let repositories = match cfg.storage.kind.as_str() {
        "memory" => {
            let store = MemoryStore::from_seed(cfg.seed.unwrap_or_default())?;
            Repositories::from_store(Arc::new(store))
        }
        "postgres" => {
            let url = read_env(
                &cfg.storage
                    .database_url_env
                    .unwrap_or_else(|| "DATABASE_URL".into()),
            )?;
            let store = PgStore::connect(&url).await?;
            store.migrate().await?;
            info!("postgres migrations applied");
            Repositories::from_store(Arc::new(store))
        }
        other => anyhow::bail!("unsupported storage kind={}", other),
    };

    let auth = Arc::new(AuthService::new(&auth_cfg, repositories)?);
    let app = build_router(AuthServices::new(auth, cfg.server.trust_forwarded_for));

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port).parse()?;
    tracing::info!(%addr, "rb-api listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

fn build_router(services: AuthServices) -> Router {
    let user_guard = RequireRoutePermission::layer(
        services.auth.clone(),
        Some(RecordFromPath {
            record_type: "user",
            segment: 3,
        }),
        services.trust_forwarded_for,
    );

    Router::new()
        .nest("/api/v1/auth", auth_routes::create_auth_routes())
        .merge(auth_routes::create_user_routes().route_layer(user_guard))
        .route("/api/v1/health", get(health))
        .with_state(services)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};
    let fmt_layer = fmt::layer().with_target(false);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("RB_CONFIG").unwrap_or_else(|_| "configs/default.yaml".into());
    let s = std::fs::read_to_string(&path)?;
    let cfg: AppConfig = serde_yaml::from_str(&s)?;
    info!(%path, "config loaded");
    Ok(cfg)
}

fn auth_config(yaml: &AuthCfgYaml) -> anyhow::Result<AuthConfig> {
    let secret_env = yaml.jwt_secret_env.as_deref().unwrap_or("JWT_SECRET");
    let mut cfg = AuthConfig::new(read_env(secret_env)?);

    if let Some(v) = yaml.access_ttl_minutes {
        cfg.access_ttl_minutes = v;
    }
    if let Some(v) = yaml.refresh_ttl_days {
        cfg.refresh_ttl_days = v;
    }
    if let Some(v) = yaml.issuer.as_ref() {
        cfg.issuer = v.clone();
    }
    if let Some(v) = yaml.audience.as_ref() {
        cfg.audience = v.clone();
    }
    if let Some(v) = yaml.address_binding {
        cfg.address_binding = v;
    }
    if let Some(v) = yaml.bcrypt_cost {
        cfg.bcrypt_cost = v;
    }
    if let Some(v) = yaml.signup_role.as_ref() {
        cfg.signup_role = v.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn read_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing env {}", key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        extract::connect_info::MockConnectInfo,
        http::{header, Request, StatusCode},
    };
    use rb_core::Permission;
    use tower::ServiceExt;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    async fn test_services() -> AuthServices {
        let store = MemoryStore::new();
        let admin = store.insert_role("admin").await;
        let member = store.insert_role("member").await;
        let own_user = store.insert_scope("own:user").await;
        let all = store.insert_scope("all").await;
        let password_route = store.insert_route("/api/v1/users/:id/password").await;
        let role_route = store.insert_route("/api/v1/users/:id/role").await;

        for (role_id, route_id, scope_id) in [
            (member.id, password_route.id, own_user.id),
            (admin.id, password_route.id, all.id),
            (admin.id, role_route.id, all.id),
        ] {
            store
                .grant(Permission {
                    role_id,
                    route_id,
                    scope_id,
                    allowed: true,
                })
                .await
                .unwrap();
        }

        let mut cfg = AuthConfig::new(SECRET);
        cfg.bcrypt_cost = 4;
        let auth = AuthService::new(&cfg, Repositories::from_store(Arc::new(store))).unwrap();
        AuthServices::new(Arc::new(auth), false)
    }

    async fn test_app() -> Router {
        build_router(test_services().await).layer(MockConnectInfo(
            "10.0.0.5:40000".parse::<SocketAddr>().unwrap(),
        ))
    }

    fn with_bearer(mut req: Request<Body>, token: &str) -> Request<Body> {
        req.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Bearer {}", token).parse().unwrap(),
        );
        req
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn signup_and_login(app: &Router, username: &str) -> (i64, String) {
        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/signup",
                serde_json::json!({"username": username, "password": "pw-123456"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let user_id = body_json(res).await["id"].as_i64().unwrap();

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/login",
                serde_json::json!({"username": username, "password": "pw-123456"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let token = body_json(res).await["access_token"]
            .as_str()
            .unwrap()
            .to_string();
        (user_id, token)
    }

    #[test]
    fn test_default_config_seeds_memory_store() {
        let cfg: AppConfig =
            serde_yaml::from_str(include_str!("../../../configs/default.yaml")).unwrap();
        assert_eq!(cfg.storage.kind, "memory");
        assert_eq!(cfg.auth.address_binding, Some(AddressBinding::Strict));
        assert_eq!(cfg.auth.signup_role.as_deref(), Some("member"));

        let seed = cfg.seed.unwrap();
        assert_eq!(seed.roles.len(), 3);
        assert!(MemoryStore::from_seed(seed).is_ok());
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let res = app
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_failure_is_generic() {
        let app = test_app().await;
        signup_and_login(&app, "alice").await;

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/login",
                serde_json::json!({"username": "alice", "password": "wrong"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let wrong_password = body_json(res).await;

        let res = app
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/login",
                serde_json::json!({"username": "nobody", "password": "wrong"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(res).await, wrong_password);
    }

    #[tokio::test]
    async fn test_member_changes_only_own_password() {
        let app = test_app().await;
        let (alice, alice_token) = signup_and_login(&app, "alice").await;
        let (bob, _) = signup_and_login(&app, "bob").await;

        let own = with_bearer(
            json_request(
                "PUT",
                &format!("/api/v1/users/{}/password", alice),
                serde_json::json!({"new_password": "new-secret"}),
            ),
            &alice_token,
        );
        let res = app.clone().oneshot(own).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let other = with_bearer(
            json_request(
                "PUT",
                &format!("/api/v1/users/{}/password", bob),
                serde_json::json!({"new_password": "new-secret"}),
            ),
            &alice_token,
        );
        let res = app.clone().oneshot(other).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let role_change = with_bearer(
            json_request(
                "PUT",
                &format!("/api/v1/users/{}/role", alice),
                serde_json::json!({"role_id": 1}),
            ),
            &alice_token,
        );
        let res = app.oneshot(role_change).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_user_routes_require_token() {
        let app = test_app().await;
        let res = app
            .oneshot(json_request(
                "PUT",
                "/api/v1/users/1/password",
                serde_json::json!({"new_password": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_check_uses_callers_role() {
        let app = test_app().await;
        let (alice, token) = signup_and_login(&app, "alice").await;

        let req = with_bearer(
            json_request(
                "POST",
                "/api/v1/auth/check",
                serde_json::json!({
                    "route": "/api/v1/users/:id/password",
                    "record_type": "user",
                    "record_id": alice.to_string(),
                }),
            ),
            &token,
        );
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["allowed"], true);

        let req = with_bearer(
            json_request(
                "POST",
                "/api/v1/auth/check",
                serde_json::json!({"route": "/api/v1/users/:id/role"}),
            ),
            &token,
        );
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(body_json(res).await["allowed"], false);
    }

    #[tokio::test]
    async fn test_signup_cannot_choose_role() {
        let app = test_app().await;
        let (victim, _) = signup_and_login(&app, "bob").await;

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/signup",
                serde_json::json!({"username": "mallory", "password": "pw-123456", "role_id": 1}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["role_id"], 2);

        let res = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/v1/auth/login",
                serde_json::json!({"username": "mallory", "password": "pw-123456"}),
            ))
            .await
            .unwrap();
        let token = body_json(res).await["access_token"]
            .as_str()
            .unwrap()
            .to_string();

        let promote = with_bearer(
            json_request(
                "PUT",
                &format!("/api/v1/users/{}/role", victim),
                serde_json::json!({"role_id": 1}),
            ),
            &token,
        );
        let res = app.oneshot(promote).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_guarded_route_needs_client_address() {
        let services = test_services().await;
        let user = services.auth.register("alice", "pw-123456").await.unwrap();
        let tokens = services.auth.issue_session(&user, "10.0.0.5").unwrap();

        // no connect info on the router, so the peer is unknown
        let app = build_router(services);
        let req = with_bearer(
            json_request(
                "PUT",
                &format!("/api/v1/users/{}/password", user.id),
                serde_json::json!({"new_password": "new-secret"}),
            ),
            &tokens.access.token,
        );
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
