use chrono::Duration;
use rb_error::{RbError, Result};
use serde::{Deserialize, Serialize};

/// Whether a token must be presented from the address it was issued to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AddressBinding {
    #[default]
    Strict,
    Ignore,
}

/// Process-wide authentication settings, fixed at startup.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_access_ttl_minutes")]
    pub access_ttl_minutes: i64,
    #[serde(default = "default_refresh_ttl_days")]
    pub refresh_ttl_days: i64,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default)]
    pub address_binding: AddressBinding,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    /// Role given to self-registered accounts, by name.
    #[serde(default = "default_signup_role")]
    pub signup_role: String,
}

fn default_access_ttl_minutes() -> i64 {
    15
}

fn default_refresh_ttl_days() -> i64 {
    7
}

fn default_issuer() -> String {
    "rb-auth".to_string()
}

fn default_audience() -> String {
    "rb-api".to_string()
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_signup_role() -> String {
    "member".to_string()
}

const MIN_SECRET_LEN: usize = 32;

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            access_ttl_minutes: default_access_ttl_minutes(),
            refresh_ttl_days: default_refresh_ttl_days(),
            issuer: default_issuer(),
            audience: default_audience(),
            address_binding: AddressBinding::default(),
            bcrypt_cost: default_bcrypt_cost(),
            signup_role: default_signup_role(),
        }
    }

    pub fn access_ttl(&self) -> Duration {
        Duration::minutes(self.access_ttl_minutes)
    }

    pub fn refresh_ttl(&self) -> Duration {
        Duration::days(self.refresh_ttl_days)
    }

    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(RbError::Configuration {
                key: "jwt_secret".to_string(),
                reason: format!("must be at least {} bytes", MIN_SECRET_LEN),
            });
        }
        if self.access_ttl_minutes <= 0 || self.refresh_ttl_days <= 0 {
            return Err(RbError::Configuration {
                key: "token_ttl".to_string(),
                reason: "token lifetimes must be positive".to_string(),
            });
        }
        if self.access_ttl() >= self.refresh_ttl() {
            return Err(RbError::Configuration {
                key: "access_ttl_minutes".to_string(),
                reason: "access tokens must expire before refresh tokens".to_string(),
            });
        }
        if !(4..=31).contains(&self.bcrypt_cost) {
            return Err(RbError::Configuration {
                key: "bcrypt_cost".to_string(),
                reason: "must be between 4 and 31".to_string(),
            });
        }
        if self.signup_role.trim().is_empty() {
            return Err(RbError::Configuration {
                key: "signup_role".to_string(),
                reason: "must name a role".to_string(),
            });
        }
        Ok(())
    }
}

// Keeps the secret out of logs.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_ttl_minutes", &self.access_ttl_minutes)
            .field("refresh_ttl_days", &self.refresh_ttl_days)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("address_binding", &self.address_binding)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .field("signup_role", &self.signup_role)
            .finish()
    }
}
