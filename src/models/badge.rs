use chrono::{DateTime, Utc};

use crate::{
    acl::{Capability, Permissible},
    slug::sluggify,
    store::BadgerStore,
    Award, BadgerModelError, Nomination, User,
};

/// Representation of a badge. Title and slug are each unique across all
/// badges; the slug is derived from the title when not set explicitly.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Badge {
    pub id: i64,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Badge {
    pub fn new(creator: &User, title: impl Into<String>) -> Self {
        let title = title.into();
        let now = Utc::now();
        Self {
            id: 0,
            slug: sluggify(&title),
            title,
            description: String::new(),
            creator_id: creator.id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Save the badge, deriving the slug from the title if it is still blank.
    pub async fn save(&mut self, store: &dyn BadgerStore) -> Result<(), BadgerModelError> {
        if self.slug.is_empty() {
            self.slug = sluggify(&self.title);
        }
        self.updated_at = Utc::now();
        if self.id == 0 {
            self.id = store.insert_badge(self).await?;
        } else {
            store.update_badge(self).await?;
        }
        Ok(())
    }

    /// Award this badge to `awardee`, optionally tracing back to the
    /// nomination that produced the award. Repeat awards of the same badge
    /// to the same user are permitted.
    pub async fn award_to(
        &self,
        store: &dyn BadgerStore,
        awarder: &User,
        awardee: &User,
        nomination: Option<&Nomination>,
    ) -> Result<Award, BadgerModelError> {
        let mut award = Award::new(self, awardee, awarder, nomination);
        award.id = store.insert_award(&award).await?;
        info!(
            "badge {} awarded to {} by {}",
            self.slug, awardee.name, awarder.name
        );
        Ok(award)
    }

    pub async fn is_awarded_to(
        &self,
        store: &dyn BadgerStore,
        user: &User,
    ) -> Result<bool, BadgerModelError> {
        Ok(store.count_awards(self.id, user.id).await? > 0)
    }

    /// Open a new nomination of `nominee` for this badge, unapproved and
    /// unaccepted.
    pub async fn nominate_for(
        &self,
        store: &dyn BadgerStore,
        nominator: &User,
        nominee: &User,
    ) -> Result<Nomination, BadgerModelError> {
        let mut nomination = Nomination::new(self, nominator, nominee);
        nomination.id = store.insert_nomination(&nomination).await?;
        debug!(
            "user {} nominated {} for badge {}",
            nominator.name, nominee.name, self.slug
        );
        Ok(nomination)
    }

    /// Whether any nomination, pending or completed, names `user` as nominee.
    pub async fn is_nominated_for(
        &self,
        store: &dyn BadgerStore,
        user: &User,
    ) -> Result<bool, BadgerModelError> {
        Ok(store.count_nominations(self.id, user.id).await? > 0)
    }

    pub async fn get_id(
        store: &dyn BadgerStore,
        id: i64,
    ) -> Result<Option<Badge>, BadgerModelError> {
        store.badge_by_id(id).await
    }

    pub async fn get_slug(
        store: &dyn BadgerStore,
        slug: &str,
    ) -> Result<Option<Badge>, BadgerModelError> {
        store.badge_by_slug(slug).await
    }

    pub async fn get_all(
        store: &dyn BadgerStore,
        offset: Option<u64>,
        limit: Option<u64>,
    ) -> Result<Vec<Badge>, BadgerModelError> {
        let offset = offset.unwrap_or(0).min(i64::MAX as u64) as i64;
        let limit = limit.unwrap_or(25).min(100) as i64;
        store.all_badges(offset, limit).await
    }
}

impl Permissible for Badge {
    type Ctx = ();

    fn capability_table() -> &'static [Capability<Self>] {
        &[]
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MemoryStore;

    async fn store_with_creator() -> (MemoryStore, User) {
        let store = MemoryStore::new();
        let mut creator = User::new("alice", "alice@example.com");
        creator.save(&store).await.unwrap();
        (store, creator)
    }

    #[tokio::test]
    async fn test_slug_derived_on_save_when_blank() {
        let (store, creator) = store_with_creator().await;
        let mut badge = Badge::new(&creator, "Helpful Reviewer");
        badge.slug = String::new();
        badge.save(&store).await.unwrap();
        assert_eq!("helpful-reviewer", badge.slug);

        let found = Badge::get_slug(&store, "helpful-reviewer").await.unwrap();
        assert_eq!(Some(badge), found);
    }

    #[tokio::test]
    async fn test_duplicate_titles_are_rejected() {
        let (store, creator) = store_with_creator().await;
        let mut badge = Badge::new(&creator, "Pythonista");
        badge.save(&store).await.unwrap();

        let mut dup = Badge::new(&creator, "Pythonista");
        let err = dup.save(&store).await.unwrap_err();
        assert!(matches!(err, BadgerModelError::DuplicateBadge { .. }));
    }

    #[tokio::test]
    async fn test_direct_awards_allow_repeats() {
        let (store, creator) = store_with_creator().await;
        let mut badge = Badge::new(&creator, "Pythonista");
        badge.save(&store).await.unwrap();
        let mut recipient = User::new("bob", "bob@example.com");
        recipient.save(&store).await.unwrap();

        assert!(!badge.is_awarded_to(&store, &recipient).await.unwrap());
        let first = badge
            .award_to(&store, &creator, &recipient, None)
            .await
            .unwrap();
        assert_eq!(None, first.nomination_id);
        // a re-grant without nomination is a new row, not a conflict
        badge
            .award_to(&store, &creator, &recipient, None)
            .await
            .unwrap();
        assert!(badge.is_awarded_to(&store, &recipient).await.unwrap());
        assert_eq!(2, store.count_awards(badge.id, recipient.id).await.unwrap());
        assert_eq!(2, recipient.awards(&store).await.unwrap().len());
        assert_eq!(1, recipient.badges(&store).await.unwrap().len());
    }

    #[tokio::test]
    async fn test_get_all_pages_by_title() {
        let (store, creator) = store_with_creator().await;
        for title in ["Zealot", "Apprentice", "Mentor"] {
            let mut badge = Badge::new(&creator, title);
            badge.save(&store).await.unwrap();
        }

        let page = Badge::get_all(&store, None, Some(2)).await.unwrap();
        let titles: Vec<&str> = page.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(vec!["Apprentice", "Mentor"], titles);

        let rest = Badge::get_all(&store, Some(2), None).await.unwrap();
        let titles: Vec<&str> = rest.iter().map(|b| b.title.as_str()).collect();
        assert_eq!(vec!["Zealot"], titles);
    }
}
