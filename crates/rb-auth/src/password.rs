use bcrypt::{hash, verify};
use once_cell::sync::OnceCell;
use rb_error::{RbError, Result};

// Only ever compared against, never matched.
const DUMMY_PLAINTEXT: &str = "rb-auth timing equaliser";

/// Password service: salted one-way hashing and verification.
pub struct PasswordService {
    cost: u32,
    dummy_hash: OnceCell<String>,
}

impl PasswordService {
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Hashes a password. Every call draws a fresh salt, so equal inputs
    /// produce different outputs.
    pub fn hash_password(&self, password: &str) -> Result<String> {
        if password.is_empty() {
            return Err(RbError::Validation {
                message: "password must not be empty".to_string(),
            });
        }

        hash(password, self.cost).map_err(|e| RbError::Internal {
            message: format!("failed to hash password: {}", e),
        })
    }

    /// A wrong password is `Ok(false)`. A hash that cannot be parsed is
    /// `MalformedHash`, reported only after a full-cost dummy verification.
    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        match verify(password, hash) {
            Ok(matched) => Ok(matched),
            Err(e) => {
                self.burn_verification(password);
                Err(RbError::MalformedHash {
                    message: e.to_string(),
                })
            }
        }
    }

    /// Spends the time of one verification without checking anything. Used
    /// when there is no stored hash to compare against.
    pub fn burn_verification(&self, password: &str) {
        match self.dummy_hash() {
            Ok(dummy) => {
                let _ = verify(password, dummy);
            }
            Err(e) => tracing::error!(error = %e, "failed to prepare dummy hash"),
        }
    }

    fn dummy_hash(&self) -> Result<&String> {
        self.dummy_hash.get_or_try_init(|| {
            hash(DUMMY_PLAINTEXT, self.cost).map_err(|e| RbError::Internal {
                message: format!("failed to hash dummy password: {}", e),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> PasswordService {
        PasswordService::new(4)
    }

    #[test]
    fn test_password_hashing() {
        let passwords = service();
        let hash = passwords.hash_password("p@ss1").unwrap();

        assert!(passwords.verify_password("p@ss1", &hash).unwrap());
        assert!(!passwords.verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn test_hashes_are_salted() {
        let passwords = service();
        let first = passwords.hash_password("same input").unwrap();
        let second = passwords.hash_password("same input").unwrap();

        assert_ne!(first, second);
        assert!(passwords.verify_password("same input", &first).unwrap());
        assert!(passwords.verify_password("same input", &second).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_distinct_error() {
        let err = service()
            .verify_password("p@ss1", "not-a-bcrypt-hash")
            .unwrap_err();
        assert!(matches!(err, RbError::MalformedHash { .. }));
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(matches!(
            service().hash_password(""),
            Err(RbError::Validation { .. })
        ));
    }

    #[test]
    fn test_burn_verification_does_not_panic() {
        let passwords = service();
        passwords.burn_verification("anything");
        passwords.burn_verification("again");
    }
}
