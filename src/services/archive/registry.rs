//! Static description of every table that takes part in export and import

/// How a column value is represented in an exported document
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Boolean,
    /// Stored and exported as `YYYY-MM-DD HH:MM:SS.ffffff`
    Timestamp,
    /// Relationship collections; never exported, ignored on import
    Opaque,
}

#[derive(Debug)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Archive file name to table mapping for one model
#[derive(Debug)]
pub struct ModelDescriptor {
    pub file_name: &'static str,
    pub table: &'static str,
    pub fields: &'static [Field],
    /// Column holding an already hashed credential, written verbatim on import
    pub credential_field: Option<&'static str>,
}

impl ModelDescriptor {
    pub fn field(&self, name: &str) -> Option<&'static Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Fields that map onto real table columns
    pub fn stored_fields(&self) -> impl Iterator<Item = &'static Field> {
        self.fields
            .iter()
            .filter(|field| field.kind != FieldKind::Opaque)
    }

    pub fn is_credential(&self, name: &str) -> bool {
        self.credential_field == Some(name)
    }
}

macro_rules! fields {
    ($($name:literal => $kind:ident),* $(,)?) => {
        &[$(Field { name: $name, kind: FieldKind::$kind }),*]
    };
}

pub static MODEL_REGISTRY: &[ModelDescriptor] = &[
    ModelDescriptor {
        file_name: "settings.json",
        table: "settings",
        fields: fields![
            "id" => Number,
            "name" => Text,
            "int_value" => Number,
            "string_value" => Text,
        ],
        credential_field: None,
    },
    ModelDescriptor {
        file_name: "certificates.json",
        table: "certificates",
        fields: fields![
            "id" => Number,
            "name" => Text,
            "description" => Text,
            "serial_number" => Text,
            "status" => Number,
            "type" => Number,
            "certificate" => Text,
            "key" => Text,
            "created_on" => Timestamp,
            "revoked_on" => Timestamp,
            "user_id" => Number,
        ],
        credential_field: None,
    },
    ModelDescriptor {
        file_name: "notifications.json",
        table: "notifications",
        fields: fields![
            "id" => Number,
            "type" => Number,
            "description" => Text,
            "user_id" => Number,
            "enabled" => Boolean,
            "settings" => Opaque,
        ],
        credential_field: None,
    },
    ModelDescriptor {
        file_name: "notification_settings.json",
        table: "notification_settings",
        fields: fields![
            "id" => Number,
            "name" => Text,
            "notification_id" => Number,
            "int_value" => Number,
            "string_value" => Text,
        ],
        credential_field: None,
    },
    ModelDescriptor {
        file_name: "users.json",
        table: "users",
        fields: fields![
            "id" => Number,
            "name" => Text,
            "email" => Text,
            "password" => Text,
            "role_code" => Number,
            "status_code" => Number,
            "activation_key" => Text,
            "avatar" => Text,
            "created_time" => Timestamp,
            "user_detail_id" => Number,
            "notifications" => Opaque,
        ],
        credential_field: Some("password"),
    },
    ModelDescriptor {
        file_name: "user_details.json",
        table: "user_details",
        fields: fields![
            "id" => Number,
            "age" => Number,
            "phone" => Text,
            "url" => Text,
            "deposit" => Number,
            "location" => Text,
            "bio" => Text,
            "created_time" => Timestamp,
        ],
        credential_field: None,
    },
    ModelDescriptor {
        file_name: "zones.json",
        table: "zones",
        fields: fields![
            "id" => Number,
            "zone_id" => Number,
            "name" => Text,
            "description" => Text,
        ],
        credential_field: None,
    },
];

/// Find the model exported under `file_name`
pub fn lookup(file_name: &str) -> Option<&'static ModelDescriptor> {
    MODEL_REGISTRY
        .iter()
        .find(|model| model.file_name == file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn file_names_and_tables_are_unique() {
        let files: HashSet<_> = MODEL_REGISTRY.iter().map(|m| m.file_name).collect();
        let tables: HashSet<_> = MODEL_REGISTRY.iter().map(|m| m.table).collect();

        assert_eq!(files.len(), MODEL_REGISTRY.len());
        assert_eq!(tables.len(), MODEL_REGISTRY.len());
    }

    #[test]
    fn every_model_has_an_id() {
        for model in MODEL_REGISTRY {
            assert_eq!(
                model.field("id").map(|f| f.kind),
                Some(FieldKind::Number),
                "{} has no numeric id",
                model.table
            );
        }
    }

    #[test]
    fn only_users_carry_a_credential() {
        let with_credential: Vec<_> = MODEL_REGISTRY
            .iter()
            .filter(|m| m.credential_field.is_some())
            .map(|m| m.table)
            .collect();

        assert_eq!(with_credential, vec!["users"]);
        assert!(lookup("users.json").unwrap().is_credential("password"));
    }

    #[test]
    fn opaque_fields_are_not_stored() {
        let users = lookup("users.json").unwrap();

        assert!(users.field("notifications").is_some());
        assert!(users.stored_fields().all(|f| f.name != "notifications"));
    }

    #[test]
    fn lookup_unknown_file() {
        assert!(lookup("users.txt").is_none());
        assert!(lookup("").is_none());
    }
}
