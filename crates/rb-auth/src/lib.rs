pub mod config;
pub mod credentials;
pub mod jwt;
pub mod memory;
pub mod middleware;
pub mod models;
pub mod password;
pub mod postgres;
pub mod rbac;
pub mod repository;
pub mod service;

// re-exports
pub use config::{AddressBinding, AuthConfig};
pub use credentials::CredentialStore;
pub use jwt::{Claims, IssuedToken, JwtService, TokenClass, ValidatedToken};
pub use memory::{MemorySeed, MemoryStore};
pub use middleware::{client_address, RecordFromPath, RequireRoutePermission};
pub use models::AuthContext;
pub use password::PasswordService;
pub use postgres::PgStore;
pub use rbac::{RbacService, RouteRef, ScopeRule};
pub use repository::{
    OwnershipResolver, PermissionRepository, RoleRepository, RouteRepository, ScopeRepository,
    UserRepository,
};
pub use service::{AuthService, NewUser, Repositories, SessionTokens};

pub use rb_error::{RbError, Result};
