//! Users and their profile details

use crate::{datastore::Datastore, services::archive::TIMESTAMP_FORMAT};
use anyhow::{Context, Result, bail};
use chrono::Local;
use log::debug;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Clone, Copy, Debug, Default, Deserialize_repr, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum Role {
    Admin = 0,
    Staff = 1,
    #[default]
    User = 2,
}

impl TryFrom<i64> for Role {
    type Error = anyhow::Error;

    fn try_from(code: i64) -> Result<Self> {
        Ok(match code {
            0 => Role::Admin,
            1 => Role::Staff,
            2 => Role::User,
            _ => bail!("unknown role code {code}"),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize_repr, PartialEq, Eq, Serialize_repr)]
#[repr(u8)]
pub enum UserStatus {
    Inactive = 0,
    New = 1,
    #[default]
    Active = 2,
}

impl TryFrom<i64> for UserStatus {
    type Error = anyhow::Error;

    fn try_from(code: i64) -> Result<Self> {
        Ok(match code {
            0 => UserStatus::Inactive,
            1 => UserStatus::New,
            2 => UserStatus::Active,
            _ => bail!("unknown status code {code}"),
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    /// argon2 hash
    pub password: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub avatar: Option<String>,
    pub user_detail_id: Option<i64>,
}

impl User {
    const COLUMNS: &str = "id, name, email, password, role_code, status_code, avatar, user_detail_id";

    fn from_row(row: &Row) -> rusqlite::Result<(Self, i64, i64)> {
        Ok((
            User {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                password: row.get(3)?,
                role: Role::default(),
                status: UserStatus::default(),
                avatar: row.get(6)?,
                user_detail_id: row.get(7)?,
            },
            row.get(4)?,
            row.get(5)?,
        ))
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct UserDetail {
    pub age: Option<i64>,
    pub phone: Option<String>,
    pub url: Option<String>,
    pub deposit: Option<f64>,
    pub location: Option<String>,
    pub bio: Option<String>,
}

pub struct UserService;

impl UserService {
    pub fn find_by_name(datastore: &Datastore, name: &str) -> Result<Option<User>> {
        Self::find(datastore, "name = ?1", params![name])
            .with_context(|| format!("failed to look up user {name}"))
    }

    pub fn find_by_id(datastore: &Datastore, id: i64) -> Result<Option<User>> {
        Self::find(datastore, "id = ?1", params![id])
            .with_context(|| format!("failed to look up user {id}"))
    }

    fn find(
        datastore: &Datastore,
        condition: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Option<User>> {
        let row = datastore.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {} FROM users WHERE {condition}", User::COLUMNS),
                params,
                User::from_row,
            )
            .optional()
            .context("failed to query users")
        })?;

        let Some((mut user, role_code, status_code)) = row else {
            return Ok(None);
        };

        user.role = Role::try_from(role_code)?;
        user.status = UserStatus::try_from(status_code)?;

        Ok(Some(user))
    }

    pub fn details(datastore: &Datastore, user: &User) -> Result<UserDetail> {
        let Some(detail_id) = user.user_detail_id else {
            return Ok(UserDetail::default());
        };

        let detail = datastore.with_conn(|conn| {
            conn.query_row(
                "SELECT age, phone, url, deposit, location, bio FROM user_details WHERE id = ?1",
                params![detail_id],
                |row| {
                    Ok(UserDetail {
                        age: row.get(0)?,
                        phone: row.get(1)?,
                        url: row.get(2)?,
                        deposit: row.get(3)?,
                        location: row.get(4)?,
                        bio: row.get(5)?,
                    })
                },
            )
            .optional()
            .context("failed to read user details")
        })?;

        Ok(detail.unwrap_or_default())
    }

    /// Store email, role, status and details of a user in one transaction
    pub fn update_profile(
        datastore: &Datastore,
        user: &User,
        email: Option<&str>,
        detail: &UserDetail,
    ) -> Result<()> {
        debug!("update profile of {}", user.name);

        datastore.with_conn(|conn| {
            let tx = conn.transaction().context("failed to begin transaction")?;

            let detail_id = match user.user_detail_id {
                Some(detail_id) => {
                    tx.execute(
                        "UPDATE user_details SET age = ?1, phone = ?2, url = ?3, deposit = ?4,
                            location = ?5, bio = ?6 WHERE id = ?7",
                        params![
                            detail.age,
                            detail.phone,
                            detail.url,
                            detail.deposit,
                            detail.location,
                            detail.bio,
                            detail_id
                        ],
                    )
                    .context("failed to update user details")?;
                    detail_id
                }
                None => {
                    tx.execute(
                        "INSERT INTO user_details (age, phone, url, deposit, location, bio, created_time)
                            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            detail.age,
                            detail.phone,
                            detail.url,
                            detail.deposit,
                            detail.location,
                            detail.bio,
                            now()
                        ],
                    )
                    .context("failed to create user details")?;
                    tx.last_insert_rowid()
                }
            };

            tx.execute(
                "UPDATE users SET email = ?1, role_code = ?2, status_code = ?3, user_detail_id = ?4
                    WHERE id = ?5",
                params![
                    email,
                    user.role as i64,
                    user.status as i64,
                    detail_id,
                    user.id
                ],
            )
            .context("failed to update user")?;

            tx.commit().context("failed to commit profile")
        })
    }

    pub fn set_avatar(datastore: &Datastore, user_id: i64, avatar: &str) -> Result<()> {
        Self::update_column(datastore, user_id, "avatar", avatar)
    }

    pub fn set_password_hash(datastore: &Datastore, user_id: i64, hash: &str) -> Result<()> {
        Self::update_column(datastore, user_id, "password", hash)
    }

    fn update_column(datastore: &Datastore, user_id: i64, column: &str, value: &str) -> Result<()> {
        datastore.with_conn(|conn| {
            let updated = conn
                .execute(
                    &format!("UPDATE users SET {column} = ?1 WHERE id = ?2"),
                    params![value, user_id],
                )
                .with_context(|| format!("failed to update {column}"))?;

            anyhow::ensure!(updated == 1, "failed to update {column}: no user {user_id}");
            Ok(())
        })
    }

    /// Insert a new user and return its id
    pub fn create(datastore: &Datastore, name: &str, hash: &str, role: Role) -> Result<i64> {
        datastore.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (name, password, role_code, status_code, created_time)
                    VALUES (?1, ?2, ?3, ?4, ?5)",
                params![name, hash, role as i64, UserStatus::Active as i64, now()],
            )
            .with_context(|| format!("failed to create user {name}"))?;

            Ok(conn.last_insert_rowid())
        })
    }
}

fn now() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}
