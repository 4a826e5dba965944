use serde::{Deserialize, Serialize};

/// Read-only reference to an authenticated participant.
///
/// Identity is owned by the external auth collaborator; the core never
/// creates or mutates users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub name: String,
    pub role: UserRole,
}

/// Participant role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Customer,
    Agent,
    Admin,
}

impl UserRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: UserRole) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }

    /// Whether this user may view the consultation queue
    pub fn is_agent(&self) -> bool {
        matches!(self.role, UserRole::Agent | UserRole::Admin)
    }
}
