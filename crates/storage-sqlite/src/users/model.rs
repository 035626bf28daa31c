use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use gatekeeper_core::users::User;

use crate::repository::{enum_from_db, timestamp_from_db, timestamp_to_db};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_null = true)]
pub struct UserDB {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl From<&User> for UserDB {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role.as_str().to_string(),
            created_at: user.created_at.as_ref().map(timestamp_to_db),
            updated_at: user.updated_at.as_ref().map(timestamp_to_db),
        }
    }
}

impl From<UserDB> for User {
    fn from(db: UserDB) -> Self {
        Self {
            role: enum_from_db(&db.role).unwrap_or_default(),
            created_at: db.created_at.as_deref().and_then(timestamp_from_db),
            updated_at: db.updated_at.as_deref().and_then(timestamp_from_db),
            id: db.id,
            email: db.email,
            full_name: db.full_name,
        }
    }
}
