//! Password management service
//!
//! Handles password hashing, storage, and validation independent of HTTP concerns.

use crate::{
    datastore::Datastore,
    services::user::{Role, User, UserService},
};
use anyhow::{Context, Result, anyhow, ensure};
use argon2::{
    Argon2, PasswordHash, PasswordVerifier,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use log::{debug, info};
use serde::Deserialize;
use serde_valid::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub password: String,
    #[validate(min_length = 6)]
    #[validate(max_length = 16)]
    pub new_password: String,
    pub confirm: String,
}

/// Service for password management operations
pub struct PasswordService;

impl PasswordService {
    /// Validate a user's password against the stored hash
    ///
    /// # Returns
    /// The authenticated user
    pub fn validate_password(datastore: &Datastore, name: &str, password: &str) -> Result<User> {
        ensure!(!password.is_empty(), "failed to validate password: empty");

        let user = UserService::find_by_name(datastore, name)?
            .with_context(|| format!("failed to validate password: unknown user {name}"))?;

        Self::verify(&user, password)?;
        Ok(user)
    }

    fn verify(user: &User, password: &str) -> Result<()> {
        let password_hash = user
            .password
            .as_deref()
            .filter(|hash| !hash.is_empty())
            .context("failed to validate password: hash is empty")?;

        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| anyhow!(e))
            .context("failed to parse password hash")?;

        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|e| anyhow!(e))
            .context("failed to verify password")
    }

    /// Hash a password using Argon2
    pub fn hash_password(password: &str) -> Result<String> {
        debug!("hash_password() called");

        let salt = SaltString::generate(&mut OsRng);

        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!(e))
            .context("failed to hash password")
    }

    /// Check the current password and the new one of a change request
    pub fn validate_change(user: &User, request: &ChangePasswordRequest) -> Result<()> {
        debug!("validate_change() called");

        Self::verify(user, &request.password).context("current password is not correct")?;
        request
            .validate()
            .context("new password must be between 6 and 16 characters")?;
        ensure!(
            request.new_password == request.confirm,
            "new password and confirmation do not match"
        );

        Ok(())
    }

    /// Store a fresh hash of `password` for the user
    pub fn update_password(datastore: &Datastore, user_id: i64, password: &str) -> Result<()> {
        let hash = Self::hash_password(password)?;
        UserService::set_password_hash(datastore, user_id, &hash)
    }

    /// Store or update the password of `name`, creating an administrator if
    /// the user does not exist yet
    pub fn store_or_update_password(datastore: &Datastore, name: &str, password: &str) -> Result<()> {
        debug!("store_or_update_password() called");

        ensure!(!password.is_empty(), "failed to store password: empty");
        let hash = Self::hash_password(password)?;

        match UserService::find_by_name(datastore, name)? {
            Some(user) => UserService::set_password_hash(datastore, user.id, &hash),
            None => {
                info!("creating administrator {name}");
                UserService::create(datastore, name, &hash, Role::Admin).map(|_| ())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(password: &str, new_password: &str, confirm: &str) -> ChangePasswordRequest {
        ChangePasswordRequest {
            password: password.to_string(),
            new_password: new_password.to_string(),
            confirm: confirm.to_string(),
        }
    }

    fn datastore_with_admin(password: &str) -> (Datastore, User) {
        let datastore = Datastore::in_memory().unwrap();
        PasswordService::store_or_update_password(&datastore, "admin", password)
            .expect("should store password");
        let user = UserService::find_by_name(&datastore, "admin").unwrap().unwrap();
        (datastore, user)
    }

    #[test]
    fn test_hash_password() {
        let hash = PasswordService::hash_password("testpassword").expect("should hash");
        assert!(hash.starts_with("$argon2"));
        assert_ne!(hash, PasswordService::hash_password("testpassword").unwrap());
    }

    #[test]
    fn test_store_and_validate_password() {
        let (datastore, user) = datastore_with_admin("testpass");

        assert_eq!(user.role, Role::Admin);
        assert!(PasswordService::validate_password(&datastore, "admin", "testpass").is_ok());
        assert!(PasswordService::validate_password(&datastore, "admin", "wrong").is_err());
        assert!(PasswordService::validate_password(&datastore, "admin", "").is_err());
        assert!(PasswordService::validate_password(&datastore, "nobody", "testpass").is_err());
    }

    mod change_password {
        use super::*;

        #[test]
        fn succeeds_with_valid_request() {
            let (datastore, user) = datastore_with_admin("secret1");
            let request = request("secret1", "secret22", "secret22");

            PasswordService::validate_change(&user, &request).expect("should be valid");
            PasswordService::update_password(&datastore, user.id, &request.new_password)
                .expect("should store password");

            assert!(PasswordService::validate_password(&datastore, "admin", "secret22").is_ok());
            assert!(PasswordService::validate_password(&datastore, "admin", "secret1").is_err());
        }

        #[test]
        fn rejects_wrong_current_password() {
            let (_, user) = datastore_with_admin("secret1");

            let result =
                PasswordService::validate_change(&user, &request("secret2", "secret22", "secret22"));

            assert!(format!("{:#}", result.unwrap_err()).contains("current password"));
        }

        #[test]
        fn rejects_bad_length() {
            let (_, user) = datastore_with_admin("secret1");

            for new_password in ["short", "seventeen-chars-x"] {
                assert!(
                    PasswordService::validate_change(
                        &user,
                        &request("secret1", new_password, new_password),
                    )
                    .is_err()
                );
            }
        }

        #[test]
        fn rejects_mismatched_confirmation() {
            let (_, user) = datastore_with_admin("secret1");

            assert!(
                PasswordService::validate_change(&user, &request("secret1", "secret22", "secret23"))
                    .is_err()
            );
        }
    }
}
