use chrono::{DateTime, Utc};
use rb_core::{RoleId, User, UserId};
use serde::{Deserialize, Serialize};

use crate::jwt::ValidatedToken;
use crate::service::SessionTokens;

/// Authenticated caller of the current request, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub client_address: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    pub fn from_token(token: &ValidatedToken, client_address: &str) -> Self {
        Self {
            user_id: token.user_id,
            role_id: token.role_id,
            client_address: client_address.to_string(),
            expires_at: token.expires_at,
        }
    }
}

// request / response types

/// Self-registration. There is no role field; new accounts get the
/// configured sign-up role.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: UserId,
    pub username: String,
    pub role_id: RoleId,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role_id: user.role_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

impl LoginResponse {
    pub fn new(user: &User, tokens: SessionTokens) -> Self {
        Self {
            access_token: tokens.access.token,
            refresh_token: tokens.refresh.token,
            token_type: "Bearer",
            expires_at: tokens.access.expires_at,
            refresh_expires_at: tokens.refresh.expires_at,
            user: UserInfo::from(user),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeUsernameRequest {
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role_id: RoleId,
}

/// Authorization check on behalf of the authenticated caller.
#[derive(Debug, Deserialize)]
pub struct PermissionCheckRequest {
    pub route: String,
    #[serde(default)]
    pub record_type: String,
    #[serde(default)]
    pub record_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermissionCheckResponse {
    pub allowed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_info_hides_hash() {
        let user = User {
            id: 3,
            username: "alice".into(),
            password_hash: "$2b$04$secret".into(),
            role_id: 1,
        };
        let json = serde_json::to_string(&UserInfo::from(&user)).unwrap();
        assert!(!json.contains("secret"));

        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("password_hash"));
    }

    #[test]
    fn test_signup_request_ignores_role() {
        let req: SignUpRequest = serde_json::from_str(
            r#"{"username":"mallory","password":"pw","role_id":1}"#,
        )
        .unwrap();
        assert_eq!(req.username, "mallory");
    }

    #[test]
    fn test_permission_check_defaults() {
        let req: PermissionCheckRequest =
            serde_json::from_str(r#"{"route":"/admin/rooms"}"#)
                .unwrap();
        assert!(req.record_type.is_empty());
        assert!(req.record_id.is_empty());
    }
}
