use async_trait::async_trait;

use super::{User, UserRole};
use crate::persistence::WriteOutcome;
use crate::Result;

/// Profiles repository. Remote reads are cached into the local mirror so
/// offline sign-in can resolve users seen before.
#[async_trait]
pub trait UserRepositoryTrait: Send + Sync {
    async fn get_by_id(&self, user_id: &str) -> Option<User>;

    async fn get_by_full_name(&self, full_name: &str) -> Option<User>;

    /// All users ordered by full name.
    async fn get_all(&self) -> Vec<User>;

    async fn upsert(&self, user: User) -> Result<WriteOutcome<User>>;

    async fn update_role(&self, user_id: &str, role: UserRole)
        -> Result<WriteOutcome<Option<User>>>;
}
