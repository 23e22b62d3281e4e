//! # Authentication
//!
//! Sessions check credentials through the [`Authenticator`] trait. Password
//! hashing and account persistence live behind it; the in-memory
//! implementation here is what the bundled server uses.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::protocol::{LoginResponseCode, RegisterResponseCode};

/// Shortest accepted account name.
pub const MIN_USERNAME_LEN: usize = 3;
/// Longest accepted account name.
pub const MAX_USERNAME_LEN: usize = 16;
/// Shortest accepted password.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Longest accepted password.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Credential checks used by every session.
pub trait Authenticator: Send + Sync {
    /// Checks a username/password pair.
    fn login(&self, username: &str, password: &str) -> Result<(), LoginResponseCode>;

    /// Creates an account.
    fn register(&self, username: &str, password: &str) -> RegisterResponseCode;
}

/// Accounts kept in memory for the lifetime of the process.
#[derive(Debug)]
pub struct MemoryAuthenticator {
    accounts: RwLock<HashMap<String, String>>,
    registration_enabled: bool,
}

impl MemoryAuthenticator {
    /// Creates an empty account table.
    #[must_use]
    pub fn new(registration_enabled: bool) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            registration_enabled,
        }
    }

    /// Number of accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.read().len()
    }

    /// Returns true if no account exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.read().is_empty()
    }
}

impl Default for MemoryAuthenticator {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Names are ASCII letters, digits and underscores.
fn valid_username(username: &str) -> bool {
    (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len())
        && username.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn valid_password(password: &str) -> bool {
    (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len())
}

impl Authenticator for MemoryAuthenticator {
    fn login(&self, username: &str, password: &str) -> Result<(), LoginResponseCode> {
        match self.accounts.read().get(username) {
            None => Err(LoginResponseCode::UnknownUser),
            Some(stored) if stored == password => Ok(()),
            Some(_) => Err(LoginResponseCode::WrongPassword),
        }
    }

    fn register(&self, username: &str, password: &str) -> RegisterResponseCode {
        if !self.registration_enabled {
            return RegisterResponseCode::RegistrationDisabled;
        }
        if !valid_username(username) {
            return RegisterResponseCode::InvalidName;
        }
        if !valid_password(password) {
            return RegisterResponseCode::InvalidPassword;
        }

        let mut accounts = self.accounts.write();
        if accounts.contains_key(username) {
            return RegisterResponseCode::UsedName;
        }
        accounts.insert(username.to_owned(), password.to_owned());
        RegisterResponseCode::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_login() {
        let auth = MemoryAuthenticator::default();
        assert_eq!(auth.register("alice", "secret1"), RegisterResponseCode::Ok);
        assert_eq!(auth.login("alice", "secret1"), Ok(()));
        assert_eq!(auth.login("alice", "nope-nope"), Err(LoginResponseCode::WrongPassword));
        assert_eq!(auth.login("bob", "secret1"), Err(LoginResponseCode::UnknownUser));
        assert_eq!(auth.len(), 1);
    }

    #[test]
    fn test_registration_rules() {
        let auth = MemoryAuthenticator::default();
        assert_eq!(auth.register("al", "secret1"), RegisterResponseCode::InvalidName);
        assert_eq!(auth.register("al ice", "secret1"), RegisterResponseCode::InvalidName);
        assert_eq!(auth.register("alice", "short"), RegisterResponseCode::InvalidPassword);
        assert_eq!(auth.register("alice_2", "secret1"), RegisterResponseCode::Ok);
        assert_eq!(auth.register("alice_2", "secret2"), RegisterResponseCode::UsedName);
    }

    #[test]
    fn test_registration_disabled() {
        let auth = MemoryAuthenticator::new(false);
        assert_eq!(auth.register("alice", "secret1"), RegisterResponseCode::RegistrationDisabled);
        assert!(auth.is_empty());
    }
}
