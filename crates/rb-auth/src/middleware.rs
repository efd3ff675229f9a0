use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use rb_core::RecordRef;
use rb_error::RbError;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::auth::{AsyncAuthorizeRequest, AsyncRequireAuthorizationLayer};

use crate::{jwt::JwtService, models::AuthContext, rbac::RouteRef, service::AuthService};

/// Where in the path the record id of a protected route lives, e.g.
/// `("user", 3)` for `/api/v1/users/:id/...`.
#[derive(Debug, Clone, Copy)]
pub struct RecordFromPath {
    pub record_type: &'static str,
    pub segment: usize,
}

impl RecordFromPath {
    pub fn extract(&self, path: &str) -> Option<RecordRef> {
        path.split('/')
            .filter(|s| !s.is_empty())
            .nth(self.segment)
            .map(|id| RecordRef::new(self.record_type, id))
    }
}

/// Validates the access token and checks the request path against the
/// caller's role.
#[derive(Clone)]
pub struct RequireRoutePermission {
    auth: Arc<AuthService>,
    record: Option<RecordFromPath>,
    trust_forwarded_for: bool,
}

impl RequireRoutePermission {
    pub fn layer(
        auth: Arc<AuthService>,
        record: Option<RecordFromPath>,
        trust_forwarded_for: bool,
    ) -> AsyncRequireAuthorizationLayer<Self> {
        AsyncRequireAuthorizationLayer::new(Self {
            auth,
            record,
            trust_forwarded_for,
        })
    }

    async fn check(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
        path: &str,
    ) -> rb_error::Result<AuthContext> {
        let address = client_address(headers, peer, self.trust_forwarded_for).ok_or_else(|| {
            RbError::Configuration {
                key: "connect_info".to_string(),
                reason: "client address unavailable; serve with connect info".to_string(),
            }
        })?;

        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RbError::TokenMalformed {
                reason: "missing Authorization header".to_string(),
            })?;
        let token = JwtService::extract_token_from_header(header)?;
        let validated = self.auth.validate_access(token, &address)?;

        let record = self.record.and_then(|r| r.extract(path));
        let route = RouteRef::Url(path.to_string());

        if !self
            .auth
            .authorize(&route, record.as_ref(), &validated)
            .await?
        {
            return Err(RbError::NotAuthorized {
                operation: path.to_string(),
            });
        }

        Ok(AuthContext::from_token(&validated, &address))
    }
}

impl AsyncAuthorizeRequest<axum::body::Body> for RequireRoutePermission {
    type RequestBody = axum::body::Body;
    type ResponseBody = axum::body::Body;
    type Future = std::pin::Pin<
        Box<
            dyn std::future::Future<
                    Output = std::result::Result<Request<Self::RequestBody>, Response<Self::ResponseBody>>,
                > + Send,
        >,
    >;

    fn authorize(&mut self, request: Request<axum::body::Body>) -> Self::Future {
        let this = self.clone();

        Box::pin(async move {
            let (mut parts, body) = request.into_parts();
            // the extractor also honours MockConnectInfo
            let peer = ConnectInfo::<SocketAddr>::from_request_parts(&mut parts, &())
                .await
                .ok()
                .map(|ConnectInfo(addr)| addr);

            match this.check(&parts.headers, peer, parts.uri.path()).await {
                Ok(auth_context) => {
                    parts.extensions.insert(auth_context);
                    Ok(Request::from_parts(parts, body))
                }
                Err(e) => {
                    tracing::debug!(error = %e, path = %parts.uri.path(), "request rejected");
                    Err(e.into_response())
                }
            }
        })
    }
}

/// Client address of a request: the first `X-Forwarded-For` entry when the
/// proxy is trusted, else the socket peer. `None` when neither is known.
pub fn client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(forwarded) = forwarded {
            return Some(forwarded.to_string());
        }
    }
    peer.map(|addr| addr.ip().to_string())
}
