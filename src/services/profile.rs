//! User profile and avatar

use crate::{
    datastore::Datastore,
    services::user::{Role, User, UserDetail, UserService, UserStatus},
};
use anyhow::{Context, Result, ensure};
use chrono::Local;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use sha2::{Digest, Sha256};
use std::{
    fs,
    path::{Path, PathBuf},
};

const AVATAR_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];

#[derive(Debug, PartialEq, Serialize)]
pub struct Profile {
    pub name: String,
    pub email: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub avatar: Option<String>,
    #[serde(flatten)]
    pub detail: UserDetail,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(pattern = r"^[^@\s]+@[^@\s]+\.[^@\s]+$")]
    #[validate(max_length = 100)]
    pub email: Option<String>,
    pub role: Option<Role>,
    pub status: Option<UserStatus>,
    #[validate(minimum = 0)]
    #[validate(maximum = 150)]
    pub age: Option<i64>,
    #[validate(max_length = 20)]
    pub phone: Option<String>,
    #[validate(max_length = 100)]
    pub url: Option<String>,
    pub deposit: Option<f64>,
    #[validate(max_length = 100)]
    pub location: Option<String>,
    #[validate(max_length = 500)]
    pub bio: Option<String>,
}

pub struct ProfileService;

impl ProfileService {
    pub fn profile(datastore: &Datastore, user: &User) -> Result<Profile> {
        Ok(Profile {
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
            status: user.status,
            avatar: user.avatar.clone(),
            detail: UserService::details(datastore, user)?,
        })
    }

    /// Store the profile of `user`
    ///
    /// Role and status changes are only taken from administrators.
    pub fn update(
        datastore: &Datastore,
        user: &User,
        request: UpdateProfileRequest,
    ) -> Result<Profile> {
        debug!("update profile of {}", user.name);
        request.validate().context("invalid profile")?;

        let mut updated = user.clone();

        if user.is_admin() {
            updated.role = request.role.unwrap_or(user.role);
            updated.status = request.status.unwrap_or(user.status);
        } else if request.role.is_some_and(|role| role != user.role)
            || request.status.is_some_and(|status| status != user.status)
        {
            warn!("ignoring role or status change requested by {}", user.name);
        }

        let email = request.email.filter(|email| !email.is_empty());
        let detail = UserDetail {
            age: request.age,
            phone: request.phone,
            url: request.url,
            deposit: request.deposit,
            location: request.location,
            bio: request.bio,
        };

        UserService::update_profile(datastore, &updated, email.as_deref(), &detail)?;

        let reloaded = UserService::find_by_id(datastore, user.id)?
            .context("failed to reload profile")?;
        Self::profile(datastore, &reloaded)
    }

    /// Store an uploaded avatar and make it the user's current one
    ///
    /// # Returns
    /// File name `<sha256 of content>__<YYYY-MM-DD><extension>`
    pub fn save_avatar(
        datastore: &Datastore,
        upload_dir: &Path,
        user: &User,
        original_name: &str,
        content: &[u8],
    ) -> Result<String> {
        let extension = Path::new(original_name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| AVATAR_EXTENSIONS.contains(&ext.as_str()))
            .with_context(|| format!("file type of {original_name} is not allowed"))?;

        let user_dir = Self::user_dir(upload_dir, user);
        fs::create_dir_all(&user_dir).context("failed to create upload directory")?;

        let file_name = format!(
            "{:x}_{}.{extension}",
            Sha256::digest(content),
            Local::now().format("_%Y-%m-%d")
        );

        fs::write(user_dir.join(&file_name), content).context("failed to store avatar")?;
        UserService::set_avatar(datastore, user.id, &file_name)?;

        Ok(file_name)
    }

    /// Path of the user's current avatar
    pub fn avatar_path(upload_dir: &Path, user: &User, file_name: &str) -> Result<PathBuf> {
        ensure!(
            user.avatar.as_deref() == Some(file_name),
            "avatar {file_name} does not belong to {}",
            user.name
        );

        Ok(Self::user_dir(upload_dir, user).join(file_name))
    }

    fn user_dir(upload_dir: &Path, user: &User) -> PathBuf {
        upload_dir.join(format!("user_{}", user.id))
    }
}
