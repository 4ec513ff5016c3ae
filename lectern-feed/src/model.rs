//! Feed documents decoded from cached records.

use chrono::{DateTime, Utc};
use lectern_core::{Record, Timestamp, ValidationError};
use serde_json::Value;

/// Shown when neither `displayName` nor `name` is set.
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// A message in the feed. Replies carry the id of their root in `reply_to`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub created_at: Timestamp,
    pub user_id: String,
    pub user_display_name: String,
    pub user_photo_url: Option<String>,
    /// User ids that liked the message.
    pub likes: Vec<String>,
    pub reply_to: Option<String>,
}

impl Message {
    pub fn is_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    pub fn is_liked_by(&self, uid: &str) -> bool {
        self.likes.iter().any(|liker| liker == uid)
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }
}

fn required_str(record: &Record, field: &str) -> Result<String, ValidationError> {
    record
        .get_str(field)
        .map(str::to_owned)
        .ok_or_else(|| ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        })
}

fn optional_str(record: &Record, field: &str) -> Option<String> {
    record.get_str(field).map(str::to_owned)
}

impl TryFrom<&Record> for Message {
    type Error = ValidationError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        let millis = record
            .get_i64("createdAt")
            .ok_or_else(|| ValidationError::RequiredFieldMissing {
                field: "createdAt".to_string(),
            })?;
        let created_at =
            DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| ValidationError::InvalidValue {
                field: "createdAt".to_string(),
                reason: format!("{millis} is out of range"),
            })?;

        let likes = match record.get("likes") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect(),
            Some(other) => {
                return Err(ValidationError::InvalidValue {
                    field: "likes".to_string(),
                    reason: format!("expected an array of user ids, got {other}"),
                })
            }
        };

        Ok(Self {
            id: record.id.clone(),
            content: required_str(record, "content")?,
            created_at,
            user_id: required_str(record, "userId")?,
            user_display_name: optional_str(record, "userDisplayName")
                .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
            user_photo_url: optional_str(record, "userPhotoURL"),
            likes,
            reply_to: optional_str(record, "replyTo"),
        })
    }
}

/// Decode every well-formed message, skipping and logging the rest.
pub fn decode_messages(records: &[Record]) -> Vec<Message> {
    records
        .iter()
        .filter_map(|record| match Message::try_from(record) {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "skipping malformed message");
                None
            }
        })
        .collect()
}

/// A user offered as a mention target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSummary {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
}

impl From<&Record> for UserSummary {
    fn from(record: &Record) -> Self {
        let display_name = [record.get_str("displayName"), record.get_str("name")]
            .into_iter()
            .flatten()
            .find(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME)
            .to_string();

        Self {
            uid: record.id.clone(),
            display_name,
            photo_url: optional_str(record, "photoURL"),
        }
    }
}

/// The signed-in user posting or liking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub uid: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

impl Author {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            display_name: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_test_utils::fixtures;
    use serde_json::json;

    #[test]
    fn test_decode_message() {
        let record = fixtures::reply("r1", "m1", "Thanks!", 1_500, "u2")
            .with_field("likes", json!(["u1", "u3"]));
        let message = Message::try_from(&record).unwrap();

        assert_eq!(message.id, "r1");
        assert_eq!(message.created_at.timestamp_millis(), 1_500);
        assert_eq!(message.reply_to.as_deref(), Some("m1"));
        assert!(message.is_reply());
        assert!(message.is_liked_by("u3"));
        assert_eq!(message.like_count(), 2);
        assert!(message.user_photo_url.is_none());
    }

    #[test]
    fn test_null_reply_to_is_root() {
        let record = fixtures::message("m1", "hello", 1_000, "u1");
        let message = Message::try_from(&record).unwrap();
        assert!(!message.is_reply());
    }

    #[test]
    fn test_missing_content_is_rejected() {
        let record = Record::empty("m1")
            .with_field("createdAt", json!(1))
            .with_field("userId", json!("u1"));
        assert_eq!(
            Message::try_from(&record).unwrap_err(),
            ValidationError::RequiredFieldMissing {
                field: "content".to_string()
            }
        );
    }

    #[test]
    fn test_decode_messages_skips_malformed() {
        let records = vec![
            fixtures::message("m1", "hello", 1_000, "u1"),
            Record::empty("broken"),
            fixtures::message("m2", "again", 2_000, "u1").with_field("likes", json!("u1")),
        ];
        let messages = decode_messages(&records);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
    }

    #[test]
    fn test_user_display_name_fallbacks() {
        let named = UserSummary::from(&fixtures::user("u1", Some("Ana Souza"), Some("Ana")));
        assert_eq!(named.display_name, "Ana Souza");

        let legacy = UserSummary::from(&fixtures::user("u2", None, Some("Bruno")));
        assert_eq!(legacy.display_name, "Bruno");

        let anonymous = UserSummary::from(&fixtures::user("u3", Some(""), None));
        assert_eq!(anonymous.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(anonymous.uid, "u3");
    }
}
