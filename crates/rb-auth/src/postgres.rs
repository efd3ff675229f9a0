use async_trait::async_trait;
use rb_core::{Permission, Role, RoleId, Route, RouteId, Scope, ScopeId, User, UserId};
use rb_error::{RbError, Result};
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::repository::{
    select_route, NewUserRecord, OwnershipResolver, PermissionRepository, RoleRepository,
    RouteRepository, ScopeRepository, UserRepository,
};

/// Postgres-backed implementation of every repository trait.
#[derive(Clone)]
pub struct PgStore {
    db_pool: PgPool,
}

impl PgStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let db_pool = PgPool::connect(database_url)
            .await
            .map_err(|e| RbError::storage("connect", e))?;
        Ok(Self::new(db_pool))
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("migrate", e))
    }
}

fn user_from_row(row: &PgRow) -> User {
    User {
        id: row.get("id"),
        username: row.get("username"),
        password_hash: row.get("password_hash"),
        role_id: row.get("role_id"),
    }
}

fn route_from_row(row: &PgRow) -> Route {
    Route {
        id: row.get("id"),
        url_pattern: row.get("url_pattern"),
    }
}

fn write_error(operation: &str, err: sqlx::Error) -> RbError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RbError::Conflict {
            details: format!("{}: {}", operation, db.message()),
        },
        _ => RbError::storage(operation, err),
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, role_id FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| RbError::storage("users.find_by_username", e))?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, username, password_hash, role_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("users.find_by_id", e))?;

        Ok(row.as_ref().map(user_from_row))
    }

    async fn create(&self, user: NewUserRecord) -> Result<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (username, password_hash, role_id)
            VALUES ($1, $2, $3)
            RETURNING id, username, password_hash, role_id
            "#,
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .fetch_one(&self.db_pool)
        .await
        .map_err(|e| write_error("users.create", e))?;

        Ok(user_from_row(&row))
    }

    async fn update(&self, user: User) -> Result<User> {
        let row = sqlx::query(
            r#"
            UPDATE users SET username = $2, password_hash = $3, role_id = $4
            WHERE id = $1
            RETURNING id, username, password_hash, role_id
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.role_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| write_error("users.update", e))?;

        row.as_ref()
            .map(user_from_row)
            .ok_or_else(|| RbError::NotFound {
                resource: format!("user:{}", user.id),
            })
    }
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn find_by_id(&self, role_id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT id, name FROM roles WHERE id = $1")
            .bind(role_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("roles.find_by_id", e))?;

        Ok(row.map(|r| Role {
            id: r.get("id"),
            name: r.get("name"),
        }))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Role>> {
        let row = sqlx::query("SELECT id, name FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("roles.find_by_name", e))?;

        Ok(row.map(|r| Role {
            id: r.get("id"),
            name: r.get("name"),
        }))
    }
}

#[async_trait]
impl RouteRepository for PgStore {
    async fn find_by_url(&self, url: &str) -> Result<Option<Route>> {
        let exact = sqlx::query("SELECT id, url_pattern FROM routes WHERE url_pattern = $1")
            .bind(url)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("routes.find_by_url", e))?;
        if let Some(row) = exact {
            return Ok(Some(route_from_row(&row)));
        }

        // pattern routes are few; match them in process
        let rows = sqlx::query("SELECT id, url_pattern FROM routes ORDER BY id")
            .fetch_all(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("routes.find_by_url", e))?;
        let routes: Vec<Route> = rows.iter().map(route_from_row).collect();

        Ok(select_route(&routes, url).cloned())
    }

    async fn find_by_id(&self, route_id: RouteId) -> Result<Option<Route>> {
        let row = sqlx::query("SELECT id, url_pattern FROM routes WHERE id = $1")
            .bind(route_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("routes.find_by_id", e))?;

        Ok(row.as_ref().map(route_from_row))
    }
}

#[async_trait]
impl ScopeRepository for PgStore {
    async fn find_by_id(&self, scope_id: ScopeId) -> Result<Option<Scope>> {
        let row = sqlx::query("SELECT id, name FROM scopes WHERE id = $1")
            .bind(scope_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| RbError::storage("scopes.find_by_id", e))?;

        Ok(row.map(|r| Scope {
            id: r.get("id"),
            name: r.get("name"),
        }))
    }
}

#[async_trait]
impl PermissionRepository for PgStore {
    async fn find_by_role_and_route(
        &self,
        role_id: RoleId,
        route_id: RouteId,
    ) -> Result<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT role_id, route_id, scope_id, allowed
            FROM permissions
            WHERE role_id = $1 AND route_id = $2
            "#,
        )
        .bind(role_id)
        .bind(route_id)
        .fetch_all(&self.db_pool)
        .await
        .map_err(|e| RbError::storage("permissions.find_by_role_and_route", e))?;

        Ok(rows
            .into_iter()
            .map(|r| Permission {
                role_id: r.get("role_id"),
                route_id: r.get("route_id"),
                scope_id: r.get("scope_id"),
                allowed: r.get("allowed"),
            })
            .collect())
    }
}

#[async_trait]
impl OwnershipResolver for PgStore {
    async fn is_owned_by(
        &self,
        record_type: &str,
        record_id: &str,
        user_id: UserId,
    ) -> Result<bool> {
        let Ok(id) = record_id.parse::<i64>() else {
            return Ok(false);
        };

        match record_type {
            "booking" => {
                let row = sqlx::query(
                    "SELECT 1 FROM bookings WHERE id = $1 AND (user_id = $2 OR created_by = $2)",
                )
                .bind(id)
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await
                .map_err(|e| RbError::storage("bookings.is_owned_by", e))?;
                Ok(row.is_some())
            }
            "user" => {
                if id != user_id {
                    return Ok(false);
                }
                let row = sqlx::query("SELECT 1 FROM users WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&self.db_pool)
                    .await
                    .map_err(|e| RbError::storage("users.is_owned_by", e))?;
                Ok(row.is_some())
            }
            _ => Ok(false),
        }
    }
}
