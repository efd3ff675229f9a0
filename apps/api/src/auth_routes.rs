use axum::{
    extract::{ConnectInfo, Extension, Json, Path, State},
    http::HeaderMap,
    response::{IntoResponse, Json as ResponseJson, Response},
    routing::{post, put},
    Router,
};
use rb_auth::{
    client_address,
    jwt::JwtService,
    models::{
        AuthContext, ChangePasswordRequest, ChangeRoleRequest, ChangeUsernameRequest,
        LoginRequest, LoginResponse, PermissionCheckRequest, PermissionCheckResponse,
        RefreshTokenRequest, RefreshTokenResponse, SignUpRequest, UserInfo,
    },
    AuthService, RouteRef,
};
use rb_core::{RecordRef, UserId};
use rb_error::{ErrorMetadataBuilder, RbError, Result};
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared state of the auth and user routes.
#[derive(Clone)]
pub struct AuthServices {
    pub auth: Arc<AuthService>,
    pub trust_forwarded_for: bool,
}

impl AuthServices {
    pub fn new(auth: Arc<AuthService>, trust_forwarded_for: bool) -> Self {
        Self {
            auth,
            trust_forwarded_for,
        }
    }

    fn address(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        client_address(headers, Some(peer), self.trust_forwarded_for)
            .unwrap_or_else(|| peer.ip().to_string())
    }
}

/// Public endpoints under `/api/v1/auth`.
pub fn create_auth_routes() -> Router<AuthServices> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .route("/check", post(check_permission))
}

/// Account mutations under `/api/v1/users/:id`. Registered with full paths
/// so the permission layer sees the same URL the routes table stores.
pub fn create_user_routes() -> Router<AuthServices> {
    Router::new()
        .route("/api/v1/users/:id/password", put(change_password))
        .route("/api/v1/users/:id/username", put(change_username))
        .route("/api/v1/users/:id/role", put(change_role))
}

fn fail(error: RbError, operation: &str, address: &str) -> Response {
    let metadata = ErrorMetadataBuilder::new("api")
        .operation(operation)
        .client_address(address)
        .build(&error);
    error.log(&metadata);
    error.into_response()
}

fn fail_for(error: RbError, operation: &str, caller: &AuthContext) -> Response {
    let metadata = ErrorMetadataBuilder::new("api")
        .operation(operation)
        .user_id(&caller.user_id.to_string())
        .client_address(&caller.client_address)
        .build(&error);
    error.log(&metadata);
    error.into_response()
}

async fn signup(
    State(services): State<AuthServices>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<SignUpRequest>,
) -> Response {
    let address = services.address(&headers, peer);

    match services.auth.register(&req.username, &req.password).await {
        Ok(user) => ResponseJson(UserInfo::from(&user)).into_response(),
        Err(e) => fail(e, "signup", &address),
    }
}

async fn login(
    State(services): State<AuthServices>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Response {
    let address = services.address(&headers, peer);

    match services
        .auth
        .login(&req.username, &req.password, &address)
        .await
    {
        Ok((user, tokens)) => ResponseJson(LoginResponse::new(&user, tokens)).into_response(),
        Err(e) => fail(e, "login", &address),
    }
}

async fn refresh_token(
    State(services): State<AuthServices>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<RefreshTokenRequest>,
) -> Response {
    let address = services.address(&headers, peer);

    match services
        .auth
        .refresh_session(&req.refresh_token, &address)
        .await
    {
        Ok(access) => ResponseJson(RefreshTokenResponse {
            access_token: access.token,
            token_type: "Bearer",
            expires_at: access.expires_at,
        })
        .into_response(),
        Err(e) => fail(e, "refresh", &address),
    }
}

async fn check_permission(
    State(services): State<AuthServices>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<PermissionCheckRequest>,
) -> Response {
    let address = services.address(&headers, peer);

    match check_for_caller(&services.auth, &headers, &address, &req).await {
        Ok(allowed) => ResponseJson(PermissionCheckResponse { allowed }).into_response(),
        Err(e) => fail(e, "check", &address),
    }
}

async fn check_for_caller(
    auth: &AuthService,
    headers: &HeaderMap,
    address: &str,
    req: &PermissionCheckRequest,
) -> Result<bool> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RbError::TokenMalformed {
            reason: "missing Authorization header".to_string(),
        })?;
    let token = JwtService::extract_token_from_header(header)?;
    let validated = auth.validate_access(token, address)?;
    let record = RecordRef::from_parts(&req.record_type, &req.record_id);

    auth.authorize(&RouteRef::parse(&req.route), record.as_ref(), &validated)
        .await
}

async fn change_password(
    State(services): State<AuthServices>,
    Extension(caller): Extension<AuthContext>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ChangePasswordRequest>,
) -> Response {
    match services
        .auth
        .update_password(user_id, &req.new_password)
        .await
    {
        Ok(user) => ResponseJson(UserInfo::from(&user)).into_response(),
        Err(e) => fail_for(e, "update_password", &caller),
    }
}

async fn change_username(
    State(services): State<AuthServices>,
    Extension(caller): Extension<AuthContext>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ChangeUsernameRequest>,
) -> Response {
    match services.auth.update_username(user_id, &req.username).await {
        Ok(user) => ResponseJson(UserInfo::from(&user)).into_response(),
        Err(e) => fail_for(e, "update_username", &caller),
    }
}

async fn change_role(
    State(services): State<AuthServices>,
    Extension(caller): Extension<AuthContext>,
    Path(user_id): Path<UserId>,
    Json(req): Json<ChangeRoleRequest>,
) -> Response {
    match services.auth.update_role(user_id, req.role_id).await {
        Ok(user) => {
            tracing::info!(
                user_id,
                role_id = req.role_id,
                changed_by = caller.user_id,
                "role changed"
            );
            ResponseJson(UserInfo::from(&user)).into_response()
        }
        Err(e) => fail_for(e, "update_role", &caller),
    }
}
