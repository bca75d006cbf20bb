//! Settings store
//!
//! Read access to the `settings` table. A row carries either an integer or a
//! string value; booleans are stored as integers.

use crate::datastore::Datastore;
use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, params};

/// Raw value of a setting row
#[derive(Clone, Debug, PartialEq)]
pub enum SettingValue {
    Integer(i64),
    Text(String),
}

/// Conversion from a stored setting value into a typed value
pub trait FromSetting: Sized {
    fn from_setting(value: &SettingValue) -> Option<Self>;
}

impl FromSetting for String {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Text(text) => Some(text.clone()),
            SettingValue::Integer(int) => Some(int.to_string()),
        }
    }
}

impl FromSetting for i64 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Integer(int) => Some(*int),
            SettingValue::Text(text) => text.trim().parse().ok(),
        }
    }
}

impl FromSetting for u32 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|int| u32::try_from(int).ok())
    }
}

impl FromSetting for u16 {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        i64::from_setting(value).and_then(|int| u16::try_from(int).ok())
    }
}

impl FromSetting for bool {
    fn from_setting(value: &SettingValue) -> Option<Self> {
        match value {
            SettingValue::Integer(int) => Some(*int != 0),
            SettingValue::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" | "" => Some(false),
                _ => None,
            },
        }
    }
}

/// Service for looking up application settings by name
pub struct SettingsStore;

impl SettingsStore {
    /// Look up a setting by name
    ///
    /// # Returns
    /// `None` if no row exists or the row carries neither an integer nor a string value
    pub fn get_by_name(datastore: &Datastore, name: &str) -> Result<Option<SettingValue>> {
        datastore.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT int_value, string_value FROM settings WHERE name = ?1",
                    params![name],
                    |row| {
                        Ok((
                            row.get::<_, Option<i64>>(0)?,
                            row.get::<_, Option<String>>(1)?,
                        ))
                    },
                )
                .optional()
                .with_context(|| format!("failed to read setting {name}"))?;

            Ok(match row {
                Some((Some(int), _)) => Some(SettingValue::Integer(int)),
                Some((None, Some(text))) => Some(SettingValue::Text(text)),
                _ => None,
            })
        })
    }

    /// Look up a setting and convert it, falling back to `default` when the
    /// setting is missing or cannot be converted
    pub fn value_or<T: FromSetting>(datastore: &Datastore, name: &str, default: T) -> Result<T> {
        Ok(Self::get_by_name(datastore, name)?
            .and_then(|value| T::from_setting(&value))
            .unwrap_or(default))
    }

    /// Store a setting, replacing any previous value
    pub fn set(datastore: &Datastore, name: &str, value: SettingValue) -> Result<()> {
        let (int_value, string_value) = match value {
            SettingValue::Integer(int) => (Some(int), None),
            SettingValue::Text(text) => (None, Some(text)),
        };

        datastore.with_conn(|conn| {
            conn.execute(
                "INSERT INTO settings (name, int_value, string_value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET
                    int_value = excluded.int_value,
                    string_value = excluded.string_value",
                params![name, int_value, string_value],
            )
            .with_context(|| format!("failed to store setting {name}"))?;

            Ok(())
        })
    }
}
