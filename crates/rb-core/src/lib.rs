use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type RoleId = i64;
pub type RouteId = i64;
pub type ScopeId = i64;
pub type RoomId = i64;
pub type BookingId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: RoleId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A protected resource/action, addressed by a URL pattern such as
/// `/rooms/:id` or `/admin/*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub url_pattern: String,
}

impl Route {
    /// Literal equality after dropping the query string and trailing slashes.
    pub fn is_exact(&self, url: &str) -> bool {
        trim_path(&self.url_pattern) == trim_path(url)
    }

    /// Ranking among patterns that match the same URL: more literal segments
    /// first, then more parameters, and a trailing `*` last.
    pub fn specificity(&self) -> (usize, usize, bool) {
        let (mut literals, mut params, mut wildcard) = (0, 0, false);
        for segment in segments(&self.url_pattern) {
            if segment == "*" {
                wildcard = true;
            } else if is_param(segment) {
                params += 1;
            } else {
                literals += 1;
            }
        }
        (literals, params, !wildcard)
    }

    /// Matches `url` against the pattern. `:name` and `{name}` segments match
    /// one non-empty segment, a trailing `*` matches any remainder.
    pub fn matches(&self, url: &str) -> bool {
        let mut pattern = segments(&self.url_pattern);
        let mut path = segments(url);

        loop {
            match (pattern.next(), path.next()) {
                (None, None) => return true,
                (Some("*"), _) => return pattern.next().is_none(),
                (Some(p), Some(s)) => {
                    if !is_param(p) && p != s {
                        return false;
                    }
                }
                _ => return false,
            }
        }
    }
}

fn is_param(segment: &str) -> bool {
    segment.starts_with(':') || (segment.starts_with('{') && segment.ends_with('}'))
}

fn path_only(path: &str) -> &str {
    let path = path.trim();
    path.split_once('?').map_or(path, |(path, _)| path)
}

fn trim_path(path: &str) -> &str {
    let trimmed = path_only(path).trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path_only(path).split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub id: ScopeId,
    pub name: String,
}

/// Grant or denial of a route to a role, narrowed by a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub role_id: RoleId,
    pub route_id: RouteId,
    pub scope_id: ScopeId,
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub created_by: UserId,
}

impl Booking {
    pub fn is_owned_by(&self, user_id: UserId) -> bool {
        self.user_id == user_id || self.created_by == user_id
    }
}

/// The record a permission check is about, e.g. `("booking", "42")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub record_type: String,
    pub record_id: String,
}

impl RecordRef {
    pub fn new(record_type: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: record_id.into(),
        }
    }

    /// Builds a record context from raw request values. An empty record type
    /// means the check is not about a particular record.
    pub fn from_parts(record_type: &str, record_id: &str) -> Option<Self> {
        let record_type = record_type.trim();
        if record_type.is_empty() {
            None
        } else {
            Some(Self::new(record_type, record_id.trim()))
        }
    }
}

pub use rb_error::{RbError as Error, Result};

#[cfg(test)]
mod tests {
    use super::*;

    fn route(pattern: &str) -> Route {
        Route {
            id: 1,
            url_pattern: pattern.to_string(),
        }
    }

    #[test]
    fn test_route_literal_match() {
        let r = route("/admin/rooms");
        assert!(r.matches("/admin/rooms"));
        assert!(r.matches("/admin/rooms/"));
        assert!(r.is_exact("/admin/rooms/"));
        assert!(!r.matches("/admin/rooms/1"));
        assert!(!r.matches("/admin"));
    }

    #[test]
    fn test_route_param_and_wildcard() {
        assert!(route("/bookings/:id").matches("/bookings/42"));
        assert!(route("/bookings/{id}/cancel").matches("/bookings/42/cancel"));
        assert!(!route("/bookings/:id").matches("/bookings"));
        assert!(route("/admin/*").matches("/admin/rooms/3"));
        assert!(route("/admin/*").matches("/admin"));
        assert!(!route("/admin/*").matches("/rooms"));
        assert!(route("/rooms").matches("/rooms?page=2"));
    }

    #[test]
    fn test_exact_match_ignores_query_string() {
        let r = route("/bookings/mine");
        assert!(r.is_exact("/bookings/mine?page=2"));
        assert!(r.is_exact("/bookings/mine/?page=2"));
        assert!(!r.is_exact("/bookings/minefield"));
    }

    #[test]
    fn test_route_specificity() {
        let wildcard = route("/admin/*").specificity();
        let param = route("/admin/rooms/:id").specificity();
        let literal = route("/admin/rooms/7").specificity();
        assert!(literal > param);
        assert!(param > wildcard);
        assert!(route("/admin/:section").specificity() > wildcard);
    }

    #[test]
    fn test_record_ref_from_parts() {
        assert_eq!(RecordRef::from_parts("", ""), None);
        assert_eq!(RecordRef::from_parts("  ", "3"), None);
        assert_eq!(
            RecordRef::from_parts("booking", "3"),
            Some(RecordRef::new("booking", "3"))
        );
    }

    #[test]
    fn test_booking_ownership() {
        let booking = Booking {
            id: 1,
            user_id: 10,
            room_id: 2,
            starts_at: Utc::now(),
            ends_at: Utc::now(),
            created_by: 11,
        };
        assert!(booking.is_owned_by(10));
        assert!(booking.is_owned_by(11));
        assert!(!booking.is_owned_by(12));
    }
}
