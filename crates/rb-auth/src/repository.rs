//! Storage collaborators consumed by the auth core.
//!
//! Lookups return `Ok(None)` on a miss. `create`/`update` report a uniqueness
//! violation as `RbError::Conflict` and a missing row as `RbError::NotFound`.
//! Anything else from the backend is `RbError::Storage`.

use async_trait::async_trait;
use rb_core::{Permission, Role, RoleId, Route, RouteId, Scope, ScopeId, User, UserId};
use rb_error::Result;

/// A user that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewUserRecord {
    pub username: String,
    pub password_hash: String,
    pub role_id: RoleId,
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>>;
    async fn create(&self, user: NewUserRecord) -> Result<User>;
    async fn update(&self, user: User) -> Result<User>;
}

#[async_trait]
pub trait RoleRepository: Send + Sync {
    async fn find_by_id(&self, role_id: RoleId) -> Result<Option<Role>>;
    async fn find_by_name(&self, name: &str) -> Result<Option<Role>>;
}

#[async_trait]
pub trait RouteRepository: Send + Sync {
    /// Exact URL first, then pattern match.
    async fn find_by_url(&self, url: &str) -> Result<Option<Route>>;
    async fn find_by_id(&self, route_id: RouteId) -> Result<Option<Route>>;
}

#[async_trait]
pub trait ScopeRepository: Send + Sync {
    async fn find_by_id(&self, scope_id: ScopeId) -> Result<Option<Scope>>;
}

#[async_trait]
pub trait PermissionRepository: Send + Sync {
    async fn find_by_role_and_route(
        &self,
        role_id: RoleId,
        route_id: RouteId,
    ) -> Result<Vec<Permission>>;
}

/// Answers "does this user own this record", backed by the Booking/Room
/// collaborators.
#[async_trait]
pub trait OwnershipResolver: Send + Sync {
    async fn is_owned_by(&self, record_type: &str, record_id: &str, user_id: UserId)
        -> Result<bool>;
}

/// Picks the best route for `url` out of `routes`: an exact pattern wins,
/// otherwise the most specific matching pattern. Ties keep the earlier route.
pub fn select_route<'a, I>(routes: I, url: &str) -> Option<&'a Route>
where
    I: IntoIterator<Item = &'a Route>,
{
    let mut best: Option<&'a Route> = None;
    for route in routes {
        if route.is_exact(url) {
            return Some(route);
        }
        if !route.matches(url) {
            continue;
        }
        if best.map_or(true, |b| route.specificity() > b.specificity()) {
            best = Some(route);
        }
    }
    best
}
