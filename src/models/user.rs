use chrono::{DateTime, Utc};

use crate::{store::BadgerStore, Award, Badge, BadgerModelError};

/// Local view of the identity directory: enough of a user to compare
/// identities and evaluate staff/superuser powers.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            name: name.into(),
            email: email.into(),
            is_staff: false,
            is_superuser: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn displayname(&self) -> &str {
        &self.name
    }

    pub async fn save(&mut self, store: &dyn BadgerStore) -> Result<(), BadgerModelError> {
        self.updated_at = Utc::now();
        if self.id == 0 {
            self.id = store.insert_user(self).await?;
        } else {
            store.update_user(self).await?;
        }
        Ok(())
    }

    pub async fn get_id(
        store: &dyn BadgerStore,
        id: i64,
    ) -> Result<Option<User>, BadgerModelError> {
        store.user_by_id(id).await
    }

    /// All awards this user has received, oldest first.
    pub async fn awards(&self, store: &dyn BadgerStore) -> Result<Vec<Award>, BadgerModelError> {
        store.awards_for_user(self.id).await
    }

    /// The distinct badges this user holds at least one award for.
    pub async fn badges(&self, store: &dyn BadgerStore) -> Result<Vec<Badge>, BadgerModelError> {
        store.badges_for_user(self.id).await
    }
}
