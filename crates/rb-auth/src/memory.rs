use async_trait::async_trait;
use rb_core::{
    Booking, BookingId, Permission, Role, RoleId, Room, RoomId, Route, RouteId, Scope, ScopeId,
    User, UserId,
};
use rb_error::{RbError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::repository::{
    select_route, NewUserRecord, OwnershipResolver, PermissionRepository, RoleRepository,
    RouteRepository, ScopeRepository, UserRepository,
};

/// Initial authorization data, typically loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemorySeed {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub rooms: Vec<Room>,
    #[serde(default)]
    pub bookings: Vec<Booking>,
}

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    roles: HashMap<RoleId, Role>,
    routes: Vec<Route>,
    scopes: HashMap<ScopeId, Scope>,
    permissions: Vec<Permission>,
    rooms: HashMap<RoomId, Room>,
    bookings: HashMap<BookingId, Booking>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_permission_refs(&self, permission: &Permission) -> Result<()> {
        if !self.roles.contains_key(&permission.role_id) {
            return Err(RbError::NotFound {
                resource: format!("role:{}", permission.role_id),
            });
        }
        if !self.routes.iter().any(|r| r.id == permission.route_id) {
            return Err(RbError::NotFound {
                resource: format!("route:{}", permission.route_id),
            });
        }
        if !self.scopes.contains_key(&permission.scope_id) {
            return Err(RbError::NotFound {
                resource: format!("scope:{}", permission.scope_id),
            });
        }
        Ok(())
    }
}

/// In-process store implementing every repository trait. Used by tests and
/// by the api binary when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from seed data, rejecting permissions that reference
    /// unknown roles, routes or scopes.
    pub fn from_seed(seed: MemorySeed) -> Result<Self> {
        let mut tables = Tables::default();

        for role in seed.roles {
            tables.roles.insert(role.id, role);
        }
        tables.routes = seed.routes;
        for scope in seed.scopes {
            tables.scopes.insert(scope.id, scope);
        }
        for room in seed.rooms {
            tables.rooms.insert(room.id, room);
        }
        for booking in seed.bookings {
            tables.bookings.insert(booking.id, booking);
        }
        for permission in &seed.permissions {
            tables.check_permission_refs(permission)?;
        }
        tables.permissions = seed.permissions;

        tables.next_id = tables
            .roles
            .keys()
            .chain(tables.routes.iter().map(|r| &r.id))
            .chain(tables.scopes.keys())
            .chain(tables.rooms.keys())
            .chain(tables.bookings.keys())
            .copied()
            .max()
            .unwrap_or(0);

        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    pub async fn insert_role(&self, name: &str) -> Role {
        let mut tables = self.tables.write().await;
        let role = Role {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.roles.insert(role.id, role.clone());
        role
    }

    pub async fn insert_route(&self, url_pattern: &str) -> Route {
        let mut tables = self.tables.write().await;
        let route = Route {
            id: tables.next_id(),
            url_pattern: url_pattern.to_string(),
        };
        tables.routes.push(route.clone());
        route
    }

    pub async fn insert_scope(&self, name: &str) -> Scope {
        let mut tables = self.tables.write().await;
        let scope = Scope {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.scopes.insert(scope.id, scope.clone());
        scope
    }

    pub async fn insert_booking(&self, mut booking: Booking) -> Booking {
        let mut tables = self.tables.write().await;
        booking.id = tables.next_id();
        tables.bookings.insert(booking.id, booking.clone());
        booking
    }

    pub async fn grant(&self, permission: Permission) -> Result<Permission> {
        let mut tables = self.tables.write().await;
        tables.check_permission_refs(&permission)?;
        tables.permissions.push(permission.clone());
        Ok(permission)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn create(&self, user: NewUserRecord) -> Result<User> {
        let mut tables = self.tables.write().await;
        if tables.users.values().any(|u| u.username == user.username) {
            return Err(RbError::Conflict {
                details: format!("username {} exists", user.username),
            });
        }

        let user = User {
            id: tables.next_id(),
            username: user.username,
            password_hash: user.password_hash,
            role_id: user.role_id,
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update(&self, user: User) -> Result<User> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&user.id) {
            return Err(RbError::NotFound {
                resource: format!("user:{}", user.id),
            });
        }
        if tables
            .users
            .values()
            .any(|u| u.id != user.id && u.username == user.username)
        {
            return Err(RbError::Conflict {
                details: format!("username {} exists", user.username),
            });
        }

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn find_by_id(&self, role_id: RoleId) -> Result<Option<Role>> {
        Ok(self.tables.read().await.roles.get(&role_id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let tables = self.tables.read().await;
        Ok(tables.roles.values().find(|r| r.name == name).cloned())
    }
}

#[async_trait]
impl RouteRepository for MemoryStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<Route>> {
        let tables = self.tables.read().await;
        Ok(select_route(&tables.routes, url).cloned())
    }

    async fn find_by_id(&self, route_id: RouteId) -> Result<Option<Route>> {
        let tables = self.tables.read().await;
        Ok(tables.routes.iter().find(|r| r.id == route_id).cloned())
    }
}

#[async_trait]
impl ScopeRepository for MemoryStore {
    async fn find_by_id(&self, scope_id: ScopeId) -> Result<Option<Scope>> {
        Ok(self.tables.read().await.scopes.get(&scope_id).cloned())
    }
}

#[async_trait]
impl PermissionRepository for MemoryStore {
    async fn find_by_role_and_route(
        &self,
        role_id: RoleId,
        route_id: RouteId,
    ) -> Result<Vec<Permission>> {
        let tables = self.tables.read().await;
        Ok(tables
            .permissions
            .iter()
            .filter(|p| p.role_id == role_id && p.route_id == route_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OwnershipResolver for MemoryStore {
    async fn is_owned_by(
        &self,
        record_type: &str,
        record_id: &str,
        user_id: UserId,
    ) -> Result<bool> {
        let Ok(id) = record_id.parse::<i64>() else {
            return Ok(false);
        };

        let tables = self.tables.read().await;
        let owned = match record_type {
            "booking" => tables
                .bookings
                .get(&id)
                .map(|b| b.is_owned_by(user_id))
                .unwrap_or(false),
            "user" => id == user_id && tables.users.contains_key(&id),
            _ => false,
        };
        Ok(owned)
    }
}
