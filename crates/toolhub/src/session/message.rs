use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a session's history. Messages are never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub created: DateTime<Utc>,
}

impl Message {
    fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            created: Utc::now(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn is_from_user(&self) -> bool {
        self.role == Role::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors() {
        let user = Message::user("hi");
        let reply = Message::assistant("hello");

        assert!(user.is_from_user());
        assert!(!reply.is_from_user());
        assert_ne!(user.id, reply.id);
    }

    #[test]
    fn test_role_serialization() {
        let value = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(value["role"], json!("user"));
        assert_eq!(value["content"], json!("hi"));
    }
}
