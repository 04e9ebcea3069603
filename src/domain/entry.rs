use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only metadata format currently accepted on an [`Entry`]
pub const META_FORMAT: &str = "JSON";

/// Mutation an [`Entry`] describes for its object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Object has been created
    Create,
    /// Object has been updated
    Update,
    /// Object has been deleted
    Delete,
}

/// Producer submitted event record
///
/// The `id` is assigned by the store on append and never travels over the
/// wire; producers submit everything else. Once appended, an entry is
/// immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store assigned identifier of the form `<millis>-<seq>`, empty until appended
    #[serde(skip)]
    pub id: String,

    /// Identifier of the object the event refers to
    pub object_id: u64,

    /// Type discriminator of the object the event refers to
    pub object_type: u64,

    /// Mutation that happened to the object
    pub action: Action,

    /// Format of any attached metadata, currently always `"JSON"`
    pub meta: String,
}

/// Reasons an [`Entry`] may be rejected before it is appended
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `object_id` was zero or absent
    #[error("object_id is required and may not be zero")]
    MissingObjectId,
    /// `object_type` was zero or absent
    #[error("object_type is required and may not be zero")]
    MissingObjectType,
    /// `meta` named a format other than [`META_FORMAT`]
    #[error("unsupported meta format {0:?}, expected {META_FORMAT:?}")]
    UnsupportedMeta(String),
}

impl Entry {
    /// Checks the well-formedness rules producers have to satisfy
    ///
    /// Action values are already constrained by the type system and do not
    /// need a separate check.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.object_id == 0 {
            return Err(ValidationError::MissingObjectId);
        }

        if self.object_type == 0 {
            return Err(ValidationError::MissingObjectType);
        }

        if self.meta != META_FORMAT {
            return Err(ValidationError::UnsupportedMeta(self.meta.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod does {
    use super::*;

    fn valid_entry() -> Entry {
        Entry {
            id: String::new(),
            object_id: 42,
            object_type: 3,
            action: Action::Create,
            meta: META_FORMAT.to_owned(),
        }
    }

    #[test]
    fn accept_valid_entry() {
        assert_eq!(valid_entry().validate(), Ok(()));
    }

    #[test]
    fn reject_zero_object_id() {
        let mut entry = valid_entry();
        entry.object_id = 0;

        assert_eq!(entry.validate(), Err(ValidationError::MissingObjectId));
    }

    #[test]
    fn reject_zero_object_type() {
        let mut entry = valid_entry();
        entry.object_type = 0;

        assert_eq!(entry.validate(), Err(ValidationError::MissingObjectType));
    }

    #[test]
    fn reject_unknown_meta_format() {
        let mut entry = valid_entry();
        entry.meta = "XML".to_owned();

        assert_eq!(
            entry.validate(),
            Err(ValidationError::UnsupportedMeta("XML".to_owned()))
        );
    }

    #[test]
    fn serialize_without_id() {
        let mut entry = valid_entry();
        entry.id = "1234-0".to_owned();

        let serialized = serde_json::to_string(&entry).unwrap();

        assert_eq!(
            serialized,
            r#"{"object_id":42,"object_type":3,"action":"create","meta":"JSON"}"#
        );
    }

    #[test]
    fn deserialize_lowercase_actions() {
        let entry: Entry = serde_json::from_str(
            r#"{"object_id":1,"object_type":2,"action":"delete","meta":"JSON"}"#,
        )
        .unwrap();

        assert_eq!(entry.action, Action::Delete);
        assert!(entry.id.is_empty());
    }

    #[test]
    fn reject_unknown_actions_while_parsing() {
        let result = serde_json::from_str::<Entry>(
            r#"{"object_id":1,"object_type":2,"action":"archive","meta":"JSON"}"#,
        );

        assert!(result.is_err());
    }
}
