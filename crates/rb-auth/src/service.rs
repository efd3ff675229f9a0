use rb_core::{RecordRef, Role, RoleId, User, UserId};
use rb_error::{RbError, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::AuthConfig;
use crate::credentials::CredentialStore;
use crate::jwt::{IssuedToken, JwtService, TokenClass, ValidatedToken};
use crate::password::PasswordService;
use crate::rbac::{RbacService, RouteRef};
use crate::repository::{
    NewUserRecord, OwnershipResolver, PermissionRepository, RoleRepository, RouteRepository,
    ScopeRepository, UserRepository,
};

/// Every storage collaborator the auth core talks to.
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub routes: Arc<dyn RouteRepository>,
    pub scopes: Arc<dyn ScopeRepository>,
    pub permissions: Arc<dyn PermissionRepository>,
    pub ownership: Arc<dyn OwnershipResolver>,
}

impl Repositories {
    /// Uses one store for every collaborator.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: UserRepository
            + RoleRepository
            + RouteRepository
            + ScopeRepository
            + PermissionRepository
            + OwnershipResolver
            + 'static,
    {
        Self {
            users: store.clone(),
            roles: store.clone(),
            routes: store.clone(),
            scopes: store.clone(),
            permissions: store.clone(),
            ownership: store,
        }
    }
}

/// Sign-up input; the password is still plaintext here.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Public contract of the auth core: credentials, sessions, permissions.
pub struct AuthService {
    credentials: CredentialStore,
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    passwords: Arc<PasswordService>,
    jwt: JwtService,
    rbac: RbacService,
    signup_role: String,
}

impl AuthService {
    pub fn new(config: &AuthConfig, repositories: Repositories) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            credentials: CredentialStore::new(repositories.users.clone()),
            users: repositories.users,
            roles: repositories.roles,
            passwords: Arc::new(PasswordService::new(config.bcrypt_cost)),
            jwt: JwtService::new(config),
            rbac: RbacService::new(
                repositories.routes,
                repositories.scopes,
                repositories.permissions,
                repositories.ownership,
            ),
            signup_role: config.signup_role.trim().to_string(),
        })
    }

    pub async fn sign_up(&self, new_user: NewUser) -> Result<User> {
        let username = new_user.username.trim().to_string();
        if username.is_empty() {
            return Err(RbError::Validation {
                message: "username must not be empty".to_string(),
            });
        }
        self.require_role(new_user.role_id).await?;

        let password_hash = self.hash(new_user.password).await?;
        let user = self
            .users
            .create(NewUserRecord {
                username: username.clone(),
                password_hash,
                role_id: new_user.role_id,
            })
            .await
            .map_err(|e| username_conflict(e, &username))?;

        info!(user_id = user.id, username = %user.username, "user signed up");
        Ok(user)
    }

    /// Self-service registration. The account always gets the configured
    /// sign-up role; other roles are assigned through `update_role`.
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let role = self.role_by_name(&self.signup_role).await?;
        self.sign_up(NewUser {
            username: username.to_string(),
            password: password.to_string(),
            role_id: role.id,
        })
        .await
    }

    pub async fn update_password(&self, user_id: UserId, new_password: &str) -> Result<User> {
        let mut user = self.require_user(user_id).await?;
        user.password_hash = self.hash(new_password.to_string()).await?;
        let user = self.users.update(user).await?;

        info!(user_id, "password changed");
        Ok(user)
    }

    pub async fn update_username(&self, user_id: UserId, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(RbError::Validation {
                message: "username must not be empty".to_string(),
            });
        }

        let mut user = self.require_user(user_id).await?;
        user.username = username.to_string();
        let user = self
            .users
            .update(user)
            .await
            .map_err(|e| username_conflict(e, username))?;

        info!(user_id, username = %user.username, "username changed");
        Ok(user)
    }

    /// Tokens already issued keep the role they were issued with.
    pub async fn update_role(&self, user_id: UserId, role_id: RoleId) -> Result<User> {
        let role = self.require_role(role_id).await?;
        let mut user = self.require_user(user_id).await?;
        user.role_id = role.id;
        let user = self.users.update(user).await?;

        info!(user_id, role = %role.name, "role changed");
        Ok(user)
    }

    /// Unknown username and wrong password fail identically, in content and
    /// in time.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let Some(user) = self.credentials.find_by_username(username).await? else {
            self.burn(password.to_string()).await?;
            warn!("authentication failed");
            return Err(RbError::InvalidCredentials);
        };

        match self.verify(password.to_string(), user.password_hash.clone()).await {
            Ok(true) => Ok(user),
            Ok(false) => {
                warn!("authentication failed");
                Err(RbError::InvalidCredentials)
            }
            Err(e) => {
                error!(user_id = user.id, error = %e, "stored credential is unusable");
                Err(e)
            }
        }
    }

    pub fn issue_session(&self, user: &User, client_address: &str) -> Result<SessionTokens> {
        let access = self
            .jwt
            .issue(user.id, user.role_id, client_address, TokenClass::Access)?;
        let refresh = self
            .jwt
            .issue(user.id, user.role_id, client_address, TokenClass::Refresh)?;
        Ok(SessionTokens { access, refresh })
    }

    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client_address: &str,
    ) -> Result<(User, SessionTokens)> {
        let user = self.authenticate(username, password).await?;
        let tokens = self.issue_session(&user, client_address)?;
        info!(user_id = user.id, "session issued");
        Ok((user, tokens))
    }

    pub fn validate_access(&self, token: &str, client_address: &str) -> Result<ValidatedToken> {
        self.jwt.validate_access(token, client_address)
    }

    pub fn validate_refresh(&self, token: &str, client_address: &str) -> Result<ValidatedToken> {
        self.jwt.validate_refresh(token, client_address)
    }

    /// Exchanges a refresh token for a new access token carrying the user's
    /// current role.
    pub async fn refresh_session(
        &self,
        refresh_token: &str,
        client_address: &str,
    ) -> Result<IssuedToken> {
        let validated = self.validate_refresh(refresh_token, client_address)?;
        let user = self
            .credentials
            .find_by_id(validated.user_id)
            .await?
            .ok_or(RbError::InvalidCredentials)?;

        let access = self
            .jwt
            .issue(user.id, user.role_id, client_address, TokenClass::Access)?;
        info!(user_id = user.id, "access token refreshed");
        Ok(access)
    }

    /// Permission check from raw request values. An empty record type means
    /// no record context.
    pub async fn check_permissions(
        &self,
        route: &str,
        record_type: &str,
        record_id: &str,
        subject: UserId,
        role_name: &str,
    ) -> Result<bool> {
        let role = self.role_by_name(role_name).await?;
        let record = RecordRef::from_parts(record_type, record_id);

        self.decide(&RouteRef::parse(route), record.as_ref(), subject, &role)
            .await
    }

    /// Permission check for the bearer of an already validated token.
    pub async fn authorize(
        &self,
        route: &RouteRef,
        record: Option<&RecordRef>,
        token: &ValidatedToken,
    ) -> Result<bool> {
        let role = self.require_role(token.role_id).await?;
        self.decide(route, record, token.user_id, &role).await
    }

    async fn decide(
        &self,
        route: &RouteRef,
        record: Option<&RecordRef>,
        subject: UserId,
        role: &Role,
    ) -> Result<bool> {
        let allowed = self
            .rbac
            .check_permission(route, record, subject, role)
            .await?;
        if !allowed {
            warn!(subject, role = %role.name, route = %route, "permission denied");
        }
        Ok(allowed)
    }

    async fn require_user(&self, user_id: UserId) -> Result<User> {
        self.credentials
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| RbError::NotFound {
                resource: format!("user:{}", user_id),
            })
    }

    async fn role_by_name(&self, name: &str) -> Result<Role> {
        self.roles
            .find_by_name(name)
            .await?
            .ok_or_else(|| RbError::NotFound {
                resource: format!("role:{}", name),
            })
    }

    async fn require_role(&self, role_id: RoleId) -> Result<Role> {
        self.roles
            .find_by_id(role_id)
            .await?
            .ok_or_else(|| RbError::NotFound {
                resource: format!("role:{}", role_id),
            })
    }

    // bcrypt is CPU bound; keep it off the async workers.

    async fn hash(&self, password: String) -> Result<String> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash_password(&password))
            .await
            .map_err(join_error)?
    }

    async fn verify(&self, password: String, hash: String) -> Result<bool> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.verify_password(&password, &hash))
            .await
            .map_err(join_error)?
    }

    async fn burn(&self, password: String) -> Result<()> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.burn_verification(&password))
            .await
            .map_err(join_error)
    }
}

fn username_conflict(err: RbError, username: &str) -> RbError {
    match err {
        RbError::Conflict { .. } => RbError::UsernameTaken {
            username: username.to_string(),
        },
        other => other,
    }
}

fn join_error(err: tokio::task::JoinError) -> RbError {
    RbError::Internal {
        message: format!("password task failed: {}", err),
    }
}
