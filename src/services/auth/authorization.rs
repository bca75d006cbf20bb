//! Authorization service
//!
//! Role checks independent of HTTP concerns.

use crate::services::user::{Role, User, UserStatus};
use anyhow::{Result, ensure};

/// Service for authorization operations
pub struct AuthorizationService;

impl AuthorizationService {
    /// Only active users may log in
    pub fn ensure_active(user: &User) -> Result<()> {
        ensure!(
            user.status == UserStatus::Active,
            "user {} is not active",
            user.name
        );
        Ok(())
    }

    /// Host, network, reboot and backup operations are reserved for administrators
    pub fn ensure_admin(user: &User) -> Result<()> {
        ensure!(
            user.role == Role::Admin,
            "user {} is not an administrator",
            user.name
        );
        Ok(())
    }
}
