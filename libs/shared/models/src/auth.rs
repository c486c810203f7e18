use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    pub exp: Option<u64>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub app_metadata: Option<serde_json::Value>,
    pub user_metadata: Option<serde_json::Value>,
    pub aud: Option<String>,
    pub iat: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin")
    }

    pub fn is_therapist(&self) -> bool {
        self.role.as_deref() == Some("therapist")
    }

    /// The owning therapist or an admin.
    pub fn can_manage_therapist(&self, therapist_id: &str) -> bool {
        self.is_admin() || (self.is_therapist() && self.id == therapist_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, role: &str) -> User {
        User {
            id: id.to_string(),
            email: None,
            role: Some(role.to_string()),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn only_owner_or_admin_manages_a_therapist() {
        assert!(user("t-1", "therapist").can_manage_therapist("t-1"));
        assert!(!user("t-2", "therapist").can_manage_therapist("t-1"));
        assert!(!user("t-1", "patient").can_manage_therapist("t-1"));
        assert!(user("a-1", "admin").can_manage_therapist("t-1"));
    }
}
