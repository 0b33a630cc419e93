use chrono::{DateTime, Utc};

use crate::{
    acl::{Capability, Permissible},
    store::BadgerStore,
    Badge, BadgerModelError, Nomination, User,
};

/// Representation of a badge awarded to a user. Awards are immutable once
/// created; creation goes through [`Badge::award_to`].
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Award {
    pub id: i64,
    pub badge_id: i64,
    pub user_id: i64,
    pub nomination_id: Option<i64>,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Award {
    pub(crate) fn new(
        badge: &Badge,
        recipient: &User,
        awarder: &User,
        nomination: Option<&Nomination>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            badge_id: badge.id,
            user_id: recipient.id,
            nomination_id: nomination.map(|n| n.id),
            creator_id: awarder.id,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn get_for_user(
        store: &dyn BadgerStore,
        user: &User,
    ) -> Result<Vec<Award>, BadgerModelError> {
        store.awards_for_user(user.id).await
    }

    pub async fn badge(&self, store: &dyn BadgerStore) -> Result<Badge, BadgerModelError> {
        store
            .badge_by_id(self.badge_id)
            .await?
            .ok_or(BadgerModelError::NotFound {
                what: "badge",
                id: self.badge_id,
            })
    }

    /// The nomination this award traces back to, if it came out of one.
    pub async fn nomination(
        &self,
        store: &dyn BadgerStore,
    ) -> Result<Option<Nomination>, BadgerModelError> {
        match self.nomination_id {
            Some(id) => store.nomination_by_id(id).await,
            None => Ok(None),
        }
    }
}

impl Permissible for Award {
    type Ctx = ();

    fn capability_table() -> &'static [Capability<Self>] {
        &[]
    }
}
