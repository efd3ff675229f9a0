use rb_core::{Permission, RecordRef, Role, Route, RouteId, UserId};
use rb_error::{RbError, Result};
use std::sync::Arc;
use tracing::debug;

use crate::repository::{OwnershipResolver, PermissionRepository, RouteRepository, ScopeRepository};

/// How a caller names a route: by URL or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRef {
    Id(RouteId),
    Url(String),
}

impl RouteRef {
    /// All-digit input is an id, anything else a URL.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = raw.parse() {
                return RouteRef::Id(id);
            }
        }
        RouteRef::Url(raw.to_string())
    }
}

impl std::fmt::Display for RouteRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteRef::Id(id) => write!(f, "#{}", id),
            RouteRef::Url(url) => write!(f, "{}", url),
        }
    }
}

/// Meaning of a scope name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeRule {
    /// `all` / `*`
    All,
    /// `own` / `own:<type>`
    Own { record_type: Option<String> },
    /// any other name: only records of that type
    RecordType(String),
}

impl ScopeRule {
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        match name {
            "all" | "*" => ScopeRule::All,
            "own" => ScopeRule::Own { record_type: None },
            _ => match name.strip_prefix("own:") {
                Some(record_type) => ScopeRule::Own {
                    record_type: Some(record_type.to_string()),
                },
                None => ScopeRule::RecordType(name.to_string()),
            },
        }
    }

    fn applies_to(&self, record: &RecordRef) -> bool {
        match self {
            ScopeRule::All | ScopeRule::Own { record_type: None } => true,
            ScopeRule::Own {
                record_type: Some(t),
            }
            | ScopeRule::RecordType(t) => t == &record.record_type,
        }
    }

    fn needs_ownership(&self) -> bool {
        matches!(self, ScopeRule::Own { .. })
    }
}

/// Role-based access control over routes, permissions and scopes.
pub struct RbacService {
    routes: Arc<dyn RouteRepository>,
    scopes: Arc<dyn ScopeRepository>,
    permissions: Arc<dyn PermissionRepository>,
    ownership: Arc<dyn OwnershipResolver>,
}

impl RbacService {
    pub fn new(
        routes: Arc<dyn RouteRepository>,
        scopes: Arc<dyn ScopeRepository>,
        permissions: Arc<dyn PermissionRepository>,
        ownership: Arc<dyn OwnershipResolver>,
    ) -> Self {
        Self {
            routes,
            scopes,
            permissions,
            ownership,
        }
    }

    pub async fn resolve_route(&self, route: &RouteRef) -> Result<Route> {
        let found = match route {
            RouteRef::Id(id) => self.routes.find_by_id(*id).await?,
            RouteRef::Url(url) => self.routes.find_by_url(url).await?,
        };
        found.ok_or_else(|| RbError::RouteNotFound {
            route: route.to_string(),
        })
    }

    /// Decides whether `role` may use `route`, optionally on `record`.
    ///
    /// Deny rows are evaluated first and any one that takes effect denies.
    /// Otherwise at least one allow row must take effect. A role without rows
    /// for the route is denied.
    pub async fn check_permission(
        &self,
        route: &RouteRef,
        record: Option<&RecordRef>,
        subject: UserId,
        role: &Role,
    ) -> Result<bool> {
        let route = self.resolve_route(route).await?;
        let rows = self
            .permissions
            .find_by_role_and_route(role.id, route.id)
            .await?;

        if rows.is_empty() {
            debug!(role = %role.name, route = %route.url_pattern, "no permission rows, deny");
            return Ok(false);
        }

        let (denies, allows): (Vec<&Permission>, Vec<&Permission>) =
            rows.iter().partition(|p| !p.allowed);

        for row in denies {
            if self.takes_effect(row, record, subject).await? {
                debug!(
                    role = %role.name,
                    route = %route.url_pattern,
                    scope_id = row.scope_id,
                    "explicit deny"
                );
                return Ok(false);
            }
        }

        let mut allowed = false;
        for row in allows {
            if self.takes_effect(row, record, subject).await? {
                allowed = true;
                break;
            }
        }

        debug!(role = %role.name, route = %route.url_pattern, allowed, "permission resolved");
        Ok(allowed)
    }

    async fn takes_effect(
        &self,
        row: &Permission,
        record: Option<&RecordRef>,
        subject: UserId,
    ) -> Result<bool> {
        let Some(record) = record else {
            return Ok(true);
        };

        let scope = self
            .scopes
            .find_by_id(row.scope_id)
            .await?
            .ok_or_else(|| RbError::NotFound {
                resource: format!("scope:{}", row.scope_id),
            })?;
        let rule = ScopeRule::parse(&scope.name);

        if !rule.applies_to(record) {
            return Ok(false);
        }
        if rule.needs_ownership() {
            return self
                .ownership
                .is_owned_by(&record.record_type, &record.record_id, subject)
                .await;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::repository::UserRepository;
    use chrono::Utc;
    use rb_core::Booking;

    struct Fixture {
        store: Arc<MemoryStore>,
        rbac: RbacService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let rbac = RbacService::new(store.clone(), store.clone(), store.clone(), store.clone());
        Fixture { store, rbac }
    }

    async fn grant(store: &MemoryStore, role: &Role, route: &Route, scope: &str, allowed: bool) {
        let scope = store.insert_scope(scope).await;
        store
            .grant(Permission {
                role_id: role.id,
                route_id: route.id,
                scope_id: scope.id,
                allowed,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_route_ref_parse() {
        assert_eq!(RouteRef::parse("42"), RouteRef::Id(42));
        assert_eq!(RouteRef::parse(" /rooms "), RouteRef::Url("/rooms".into()));
        assert_eq!(RouteRef::parse("-1"), RouteRef::Url("-1".into()));
    }

    #[test]
    fn test_scope_rule_parse() {
        assert_eq!(ScopeRule::parse("all"), ScopeRule::All);
        assert_eq!(ScopeRule::parse("*"), ScopeRule::All);
        assert_eq!(ScopeRule::parse("own"), ScopeRule::Own { record_type: None });
        assert_eq!(
            ScopeRule::parse("own:booking"),
            ScopeRule::Own {
                record_type: Some("booking".into())
            }
        );
        assert_eq!(
            ScopeRule::parse("room"),
            ScopeRule::RecordType("room".into())
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_error() {
        let f = fixture();
        let guest = f.store.insert_role("guest").await;
        let err = f
            .rbac
            .check_permission(&RouteRef::parse("/missing"), None, 1, &guest)
            .await
            .unwrap_err();
        assert!(matches!(err, RbError::RouteNotFound { .. }));
    }

    #[tokio::test]
    async fn test_guest_without_rows_is_denied() {
        let f = fixture();
        let guest = f.store.insert_role("guest").await;
        f.store.insert_route("/admin/rooms").await;

        let allowed = f
            .rbac
            .check_permission(&RouteRef::parse("/admin/rooms"), None, 1, &guest)
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_allow_row_grants() {
        let f = fixture();
        let member = f.store.insert_role("member").await;
        let route = f.store.insert_route("/rooms").await;
        grant(&f.store, &member, &route, "all", true).await;

        let by_url = f
            .rbac
            .check_permission(&RouteRef::parse("/rooms"), None, 1, &member)
            .await
            .unwrap();
        let by_id = f
            .rbac
            .check_permission(&RouteRef::Id(route.id), None, 1, &member)
            .await
            .unwrap();
        assert!(by_url && by_id);
    }

    #[tokio::test]
    async fn test_deny_overrides_allow() {
        let f = fixture();
        let member = f.store.insert_role("member").await;
        let route = f.store.insert_route("/rooms/:id").await;
        grant(&f.store, &member, &route, "all", true).await;
        grant(&f.store, &member, &route, "all", false).await;

        let allowed = f
            .rbac
            .check_permission(&RouteRef::parse("/rooms/3"), None, 1, &member)
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_ownership_scope() {
        let f = fixture();
        let member = f.store.insert_role("member").await;
        let route = f.store.insert_route("/bookings/:id").await;
        grant(&f.store, &member, &route, "own:booking", true).await;

        let owner = f
            .store
            .create(crate::repository::NewUserRecord {
                username: "owner".into(),
                password_hash: "h".into(),
                role_id: member.id,
            })
            .await
            .unwrap();
        let booking = f
            .store
            .insert_booking(Booking {
                id: 0,
                user_id: owner.id,
                room_id: 1,
                starts_at: Utc::now(),
                ends_at: Utc::now(),
                created_by: owner.id,
            })
            .await;
        let record = RecordRef::new("booking", booking.id.to_string());
        let url = RouteRef::parse(&format!("/bookings/{}", booking.id));

        assert!(f
            .rbac
            .check_permission(&url, Some(&record), owner.id, &member)
            .await
            .unwrap());
        assert!(!f
            .rbac
            .check_permission(&url, Some(&record), owner.id + 1000, &member)
            .await
            .unwrap());

        // the scope names another record type, so it grants nothing here
        let room = RecordRef::new("room", "1");
        assert!(!f
            .rbac
            .check_permission(&url, Some(&room), owner.id, &member)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_record_type_scope_and_scoped_deny() {
        let f = fixture();
        let staff = f.store.insert_role("staff").await;
        let route = f.store.insert_route("/records/*").await;
        grant(&f.store, &staff, &route, "room", true).await;
        grant(&f.store, &staff, &route, "booking", false).await;

        let rooms = f
            .rbac
            .check_permission(
                &RouteRef::parse("/records/x"),
                Some(&RecordRef::new("room", "7")),
                1,
                &staff,
            )
            .await
            .unwrap();
        let bookings = f
            .rbac
            .check_permission(
                &RouteRef::parse("/records/x"),
                Some(&RecordRef::new("booking", "7")),
                1,
                &staff,
            )
            .await
            .unwrap();
        assert!(rooms);
        assert!(!bookings);

        // without a record context every row applies, so the deny wins
        let unscoped = f
            .rbac
            .check_permission(&RouteRef::parse("/records/x"), None, 1, &staff)
            .await
            .unwrap();
        assert!(!unscoped);
    }
}
