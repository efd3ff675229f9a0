use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rb_core::{RoleId, UserId};
use rb_error::{RbError, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

use crate::config::{AddressBinding, AuthConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenClass {
    Access,
    Refresh,
}

impl std::fmt::Display for TokenClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenClass::Access => write!(f, "access"),
            TokenClass::Refresh => write!(f, "refresh"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,  // subject (user ID)
    pub rol: RoleId,  // role at issue time
    pub addr: String, // client address the token is bound to
    pub typ: TokenClass,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<UserId> {
        self.sub.parse().map_err(|e| RbError::TokenMalformed {
            reason: format!("invalid subject: {}", e),
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.exp
    }
}

/// An encoded token and when it stops being valid.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub class: TokenClass,
    pub expires_at: DateTime<Utc>,
}

/// What a successfully validated token vouches for.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub class: TokenClass,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining: Duration,
}

/// Issues and validates signed, expiring, address-bound tokens.
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    address_binding: AddressBinding,
}

impl JwtService {
    pub fn new(config: &AuthConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        // expiry is checked against the caller's clock in `validate_at`
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: config.access_ttl(),
            refresh_ttl: config.refresh_ttl(),
            address_binding: config.address_binding,
        }
    }

    pub fn ttl(&self, class: TokenClass) -> Duration {
        match class {
            TokenClass::Access => self.access_ttl,
            TokenClass::Refresh => self.refresh_ttl,
        }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        role_id: RoleId,
        client_address: &str,
        class: TokenClass,
    ) -> Result<IssuedToken> {
        self.issue_at(user_id, role_id, client_address, class, Utc::now())
    }

    pub fn issue_at(
        &self,
        user_id: UserId,
        role_id: RoleId,
        client_address: &str,
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken> {
        let expires_at = now + self.ttl(class);
        let claims = Claims {
            sub: user_id.to_string(),
            rol: role_id,
            addr: client_address.trim().to_string(),
            typ: class,
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key).map_err(
            |e| RbError::Internal {
                message: format!("failed to sign {} token: {}", class, e),
            },
        )?;

        Ok(IssuedToken {
            token,
            class,
            expires_at: claims.expires_at(),
        })
    }

    /// Decodes and checks signature, issuer and audience. Expiry, class and
    /// address are left to `validate_at`.
    pub fn decode_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| RbError::TokenMalformed {
                reason: e.to_string(),
            })
    }

    pub fn validate(
        &self,
        token: &str,
        presented_address: &str,
        expected: TokenClass,
    ) -> Result<ValidatedToken> {
        self.validate_at(token, presented_address, expected, Utc::now())
    }

    pub fn validate_at(
        &self,
        token: &str,
        presented_address: &str,
        expected: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<ValidatedToken> {
        let claims = self.decode_token(token)?;

        if claims.is_expired_at(now) {
            return Err(RbError::TokenExpired);
        }

        if claims.typ != expected {
            return Err(RbError::TokenWrongClass {
                expected: expected.to_string(),
                found: claims.typ.to_string(),
            });
        }

        if self.address_binding == AddressBinding::Strict
            && !same_address(&claims.addr, presented_address)
        {
            return Err(RbError::TokenAddressMismatch);
        }

        let expires_at = claims.expires_at();
        Ok(ValidatedToken {
            user_id: claims.user_id()?,
            role_id: claims.rol,
            class: claims.typ,
            issued_at: claims.issued_at(),
            expires_at,
            remaining: expires_at - now,
        })
    }

    pub fn validate_access(&self, token: &str, presented_address: &str) -> Result<ValidatedToken> {
        self.validate(token, presented_address, TokenClass::Access)
    }

    pub fn validate_refresh(&self, token: &str, presented_address: &str) -> Result<ValidatedToken> {
        self.validate(token, presented_address, TokenClass::Refresh)
    }

    /// Pulls the token out of an `Authorization: Bearer ...` header value.
    pub fn extract_token_from_header(authorization: &str) -> Result<&str> {
        authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RbError::TokenMalformed {
                reason: "invalid Authorization header format".to_string(),
            })
    }
}

fn same_address(bound: &str, presented: &str) -> bool {
    let (bound, presented) = (bound.trim(), presented.trim());
    match (bound.parse::<IpAddr>(), presented.parse::<IpAddr>()) {
        (Ok(a), Ok(b)) => a.to_canonical() == b.to_canonical(),
        _ => bound == presented,
    }
}
