use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    #[default]
    Sales,
    Finance,
    Admin,
    /// Soft-deleted account; history stays attached to it.
    Deactivated,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sales => "SALES",
            Self::Finance => "FINANCE",
            Self::Admin => "ADMIN",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}
