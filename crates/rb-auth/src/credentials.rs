use rb_core::{User, UserId};
use rb_error::Result;
use std::sync::Arc;

use crate::repository::UserRepository;

/// Read side of the user repository as seen by credential checks.
#[derive(Clone)]
pub struct CredentialStore {
    users: Arc<dyn UserRepository>,
}

impl CredentialStore {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        self.users.find_by_username(username.trim()).await
    }

    pub async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>> {
        self.users.find_by_id(user_id).await
    }

    /// Stored password hash for `username`, if the user exists.
    pub async fn stored_hash(&self, username: &str) -> Result<Option<String>> {
        Ok(self
            .find_by_username(username)
            .await?
            .map(|user| user.password_hash))
    }
}
