use async_trait::async_trait;
use diesel::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;

use gatekeeper_core::persistence::WriteOutcome;
use gatekeeper_core::remote::{Filter, RemoteQuery};
use gatekeeper_core::sync::{SyncPayload, SyncTable};
use gatekeeper_core::users::{User, UserRepositoryTrait, UserRole};
use gatekeeper_core::{Error, Result};

use super::model::UserDB;
use crate::db::ConnectionManager;
use crate::errors::StorageError;
use crate::repository::{from_rows, now_timestamp, to_row, RepositoryBase};
use crate::schema::profiles;

pub struct UserRepository {
    base: RepositoryBase,
}

impl UserRepository {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            base: RepositoryBase::new(manager, SyncTable::Profiles),
        }
    }

    fn table(&self) -> &'static str {
        SyncTable::Profiles.as_str()
    }

    /// Writes remote results into the local mirror for offline lookups.
    async fn cache(&self, users: &[User]) {
        if users.is_empty() {
            return;
        }
        let rows: Vec<UserDB> = users.iter().map(UserDB::from).collect();
        let context = if rows.len() == 1 {
            rows[0].id.clone()
        } else {
            format!("{} users", rows.len())
        };
        self.base
            .mirror_local(&context, move |conn| {
                for row in &rows {
                    diesel::insert_into(profiles::table)
                        .values(row)
                        .on_conflict(profiles::id)
                        .do_update()
                        .set(row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await;
    }

    async fn find_remote(&self, context: &str, column: &'static str, value: &str) -> Option<User> {
        let table = self.table();
        let value = value.to_string();
        let found = self
            .base
            .remote_read(context, |remote| async move {
                let result = remote
                    .select(table, &RemoteQuery::new().eq(column, value))
                    .await?;
                Ok(from_rows::<User>(result.rows)?.into_iter().next())
            })
            .await?;
        self.cache(std::slice::from_ref(&found)).await;
        Some(found)
    }

    fn find_local(&self, context: &str, user_id: Option<&str>, full_name: Option<&str>) -> Option<User> {
        let user_id = user_id.map(str::to_string);
        let full_name = full_name.map(str::to_string);
        self.base.local_read(context, move |conn| {
            let mut query = profiles::table.into_boxed();
            if let Some(id) = user_id {
                query = query.filter(profiles::id.eq(id));
            }
            if let Some(name) = full_name {
                query = query.filter(profiles::full_name.eq(name));
            }
            let row = query
                .select(UserDB::as_select())
                .first::<UserDB>(conn)
                .optional()
                .map_err(StorageError::from)?;
            Ok(row.map(User::from))
        })
    }
}

#[async_trait]
impl UserRepositoryTrait for UserRepository {
    async fn get_by_id(&self, user_id: &str) -> Option<User> {
        match self.find_remote("get_by_id", "id", user_id).await {
            Some(user) => Some(user),
            None => self.find_local("get_by_id", Some(user_id), None),
        }
    }

    async fn get_by_full_name(&self, full_name: &str) -> Option<User> {
        match self.find_remote("get_by_full_name", "full_name", full_name).await {
            Some(user) => Some(user),
            None => self.find_local("get_by_full_name", None, Some(full_name)),
        }
    }

    async fn get_all(&self) -> Vec<User> {
        let table = self.table();
        let remote = self
            .base
            .remote_read("get_all", |remote| async move {
                let result = remote
                    .select(table, &RemoteQuery::new().order("full_name", false))
                    .await?;
                Ok(Some(from_rows::<User>(result.rows)?))
            })
            .await;
        if let Some(users) = remote {
            self.cache(&users).await;
            return users;
        }

        self.base.local_read("get_all", |conn| {
            let rows = profiles::table
                .order((profiles::full_name.asc(), profiles::id.asc()))
                .select(UserDB::as_select())
                .load::<UserDB>(conn)
                .map_err(StorageError::from)?;
            Ok(rows.into_iter().map(User::from).collect())
        })
    }

    async fn upsert(&self, user: User) -> Result<WriteOutcome<User>> {
        let row = to_row(&user)?;
        let stored = match self.base.remote() {
            Ok(remote) => remote
                .upsert(self.table(), vec![Value::Object(row.clone())])
                .await
                .map(|stored| {
                    from_rows::<User>(stored)
                        .ok()
                        .and_then(|users| users.into_iter().next())
                        .unwrap_or_else(|| user.clone())
                }),
            Err(err) => Err(err),
        };

        match stored {
            Ok(confirmed) => {
                self.cache(std::slice::from_ref(&confirmed)).await;
                Ok(WriteOutcome::Remote(confirmed))
            }
            Err(err) => {
                self.base.log_remote_write_failure("upsert", &user.id, &err);
                self.cache(std::slice::from_ref(&user)).await;
                self.base
                    .enqueue_pending(SyncPayload::Upsert(row), &user.id)
                    .await;
                Ok(WriteOutcome::Queued(user))
            }
        }
    }

    async fn update_role(
        &self,
        user_id: &str,
        role: UserRole,
    ) -> Result<WriteOutcome<Option<User>>> {
        let updated_at = now_timestamp();
        let patch = match json!({ "role": role.as_str(), "updated_at": updated_at }) {
            Value::Object(patch) => patch,
            _ => return Err(Error::Sync("role patch is not an object".to_string())),
        };

        let remote = match self.base.remote() {
            Ok(remote) => remote
                .update(
                    self.table(),
                    &[Filter::eq("id", user_id)],
                    Value::Object(patch.clone()),
                )
                .await
                .and_then(|rows| {
                    if rows.is_empty() {
                        Err(Error::remote(format!("No remote profile {} to update", user_id)))
                    } else {
                        Ok(rows)
                    }
                }),
            Err(err) => Err(err),
        };

        let id = user_id.to_string();
        let role_text = role.as_str();
        let stamp = updated_at.clone();
        self.base
            .mirror_local(user_id, move |conn| {
                diesel::update(profiles::table.find(&id))
                    .set((
                        profiles::role.eq(role_text),
                        profiles::updated_at.eq(Some(stamp)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await;

        match remote {
            Ok(rows) => {
                let confirmed = from_rows::<User>(rows)
                    .ok()
                    .and_then(|users| users.into_iter().next())
                    .or_else(|| self.find_local("update_role", Some(user_id), None));
                Ok(WriteOutcome::Remote(confirmed))
            }
            Err(err) => {
                self.base
                    .log_remote_write_failure("update_role", user_id, &err);
                self.base
                    .enqueue_pending(SyncPayload::Update(patch), user_id)
                    .await;
                Ok(WriteOutcome::Queued(self.find_local(
                    "update_role",
                    Some(user_id),
                    None,
                )))
            }
        }
    }
}
