use chrono::{DateTime, Utc};

use crate::{
    acl::{Capability, Permissible},
    store::BadgerStore,
    Award, Badge, BadgerModelError, User,
};

/// Typed refusal reasons for the permission-gated transitions.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NominationError {
    #[error("User {} may not approve nomination {}", .user, .nomination)]
    ApproveNotAllowed { nomination: i64, user: i64 },
    #[error("User {} may not accept nomination {}", .user, .nomination)]
    AcceptNotAllowed { nomination: i64, user: i64 },
}

/// Representation of a user nominated by another user for a badge.
///
/// A nomination starts unapproved and unaccepted. It is approved by staff,
/// a superuser or the badge's creator, and accepted by staff, a superuser
/// or the nominee; when the second of the two happens, the badge is awarded
/// to the nominee on behalf of the approver. The record stays around as
/// history afterwards.
#[derive(sqlx::FromRow, Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Nomination {
    pub id: i64,
    pub badge_id: i64,
    pub nominee_id: i64,
    pub accepted: bool,
    pub creator_id: i64,
    pub approver_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Nomination {
    pub fn new(badge: &Badge, creator: &User, nominee: &User) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            badge_id: badge.id,
            nominee_id: nominee.id,
            accepted: false,
            creator_id: creator.id,
            approver_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn save(&mut self, store: &dyn BadgerStore) -> Result<(), BadgerModelError> {
        self.updated_at = Utc::now();
        if self.id == 0 {
            self.id = store.insert_nomination(self).await?;
        } else {
            store.update_nomination(self).await?;
        }
        Ok(())
    }

    pub async fn get_id(
        store: &dyn BadgerStore,
        id: i64,
    ) -> Result<Option<Nomination>, BadgerModelError> {
        store.nomination_by_id(id).await
    }

    /// Unapproved nominations for a badge, oldest first.
    pub async fn get_pending_for_badge(
        store: &dyn BadgerStore,
        badge: &Badge,
    ) -> Result<Vec<Nomination>, BadgerModelError> {
        store.pending_nominations(badge.id).await
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

    pub fn allows_approve_by(&self, badge: &Badge, user: &User) -> bool {
        if user.is_staff || user.is_superuser {
            return true;
        }
        user.id == badge.creator_id
    }

    pub fn allows_accept_by(&self, _badge: &Badge, user: &User) -> bool {
        if user.is_staff || user.is_superuser {
            return true;
        }
        user.id == self.nominee_id
    }

    /// Approve this nomination. Also awards, if already accepted.
    pub async fn approve_by(
        &mut self,
        store: &dyn BadgerStore,
        approver: &User,
    ) -> Result<(), BadgerModelError> {
        let badge = self.badge(store).await?;
        if !self.allows_approve_by(&badge, approver) {
            return Err(NominationError::ApproveNotAllowed {
                nomination: self.id,
                user: approver.id,
            }
            .into());
        }
        if self.approver_id.is_some() {
            // the approver is recorded once and never rewritten
            return Ok(());
        }
        self.approver_id = Some(approver.id);
        self.save(store).await?;
        debug!("nomination {} approved by user {}", self.id, approver.id);
        self.award_if_ready(store, &badge).await?;
        Ok(())
    }

    /// Has this nomination been approved?
    pub fn is_approved(&self) -> bool {
        self.approver_id.is_some()
    }

    /// Accept this nomination for the nominee. Also awards, if already
    /// approved.
    pub async fn accept(
        &mut self,
        store: &dyn BadgerStore,
        user: &User,
    ) -> Result<(), BadgerModelError> {
        let badge = self.badge(store).await?;
        if !self.allows_accept_by(&badge, user) {
            return Err(NominationError::AcceptNotAllowed {
                nomination: self.id,
                user: user.id,
            }
            .into());
        }
        if self.accepted {
            return Ok(());
        }
        self.accepted = true;
        self.save(store).await?;
        debug!("nomination {} accepted by user {}", self.id, user.id);
        self.award_if_ready(store, &badge).await?;
        Ok(())
    }

    /// Has this nomination been accepted?
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    /// If approved and accepted, award the badge to the nominee on behalf of
    /// the approver.
    async fn award_if_ready(
        &self,
        store: &dyn BadgerStore,
        badge: &Badge,
    ) -> Result<Option<Award>, BadgerModelError> {
        let approver_id = match self.approver_id {
            Some(v) if self.accepted => v,
            _ => return Ok(None),
        };
        let approver =
            store
                .user_by_id(approver_id)
                .await?
                .ok_or(BadgerModelError::NotFound {
                    what: "user",
                    id: approver_id,
                })?;
        let nominee =
            store
                .user_by_id(self.nominee_id)
                .await?
                .ok_or(BadgerModelError::NotFound {
                    what: "user",
                    id: self.nominee_id,
                })?;
        let award = badge.award_to(store, &approver, &nominee, Some(self)).await?;
        Ok(Some(award))
    }
}

impl Permissible for Nomination {
    type Ctx = Badge;

    fn capability_table() -> &'static [Capability<Self>] {
        const TABLE: &[Capability<Nomination>] = &[
            Capability {
                action: "approve",
                check: Nomination::allows_approve_by,
            },
            Capability {
                action: "accept",
                check: Nomination::allows_accept_by,
            },
        ];
        TABLE
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::MemoryStore;

    struct Fixture {
        store: MemoryStore,
        creator: User,
        nominee: User,
        outsider: User,
        badge: Badge,
    }

    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let mut creator = User::new("alice", "alice@example.com");
        creator.save(&store).await.unwrap();
        let mut nominee = User::new("bob", "bob@example.com");
        nominee.save(&store).await.unwrap();
        let mut outsider = User::new("carol", "carol@example.com");
        outsider.save(&store).await.unwrap();
        let mut badge = Badge::new(&creator, "Pythonista");
        badge.save(&store).await.unwrap();
        Fixture {
            store,
            creator,
            nominee,
            outsider,
            badge,
        }
    }

    #[tokio::test]
    async fn test_approve_then_accept_awards_once() {
        let f = fixture().await;
        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();
        assert!(f.badge.is_nominated_for(&f.store, &f.nominee).await.unwrap());

        nomination.approve_by(&f.store, &f.creator).await.unwrap();
        assert!(nomination.is_approved());
        assert!(!nomination.is_accepted());
        assert!(!f.badge.is_awarded_to(&f.store, &f.nominee).await.unwrap());

        nomination.accept(&f.store, &f.nominee).await.unwrap();
        assert!(nomination.is_accepted());
        assert!(f.badge.is_awarded_to(&f.store, &f.nominee).await.unwrap());
        assert_eq!(
            1,
            f.store
                .count_awards(f.badge.id, f.nominee.id)
                .await
                .unwrap()
        );

        let awards = f.nominee.awards(&f.store).await.unwrap();
        assert_eq!(1, awards.len());
        assert_eq!(Some(nomination.id), awards[0].nomination_id);
        assert_eq!(f.creator.id, awards[0].creator_id);
        assert_eq!(f.badge.id, awards[0].badge_id);
    }

    #[tokio::test]
    async fn test_accept_then_approve_awards_once() {
        let f = fixture().await;
        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();

        nomination.accept(&f.store, &f.nominee).await.unwrap();
        assert!(nomination.is_accepted());
        assert!(!nomination.is_approved());
        assert!(!f.badge.is_awarded_to(&f.store, &f.nominee).await.unwrap());

        nomination.approve_by(&f.store, &f.creator).await.unwrap();
        assert!(f.badge.is_awarded_to(&f.store, &f.nominee).await.unwrap());
        assert_eq!(
            1,
            f.store
                .count_awards(f.badge.id, f.nominee.id)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unrelated_user_may_not_approve() {
        let f = fixture().await;
        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();

        let err = nomination
            .approve_by(&f.store, &f.outsider)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BadgerModelError::Nomination(NominationError::ApproveNotAllowed { .. })
        ));
        assert!(!nomination.is_approved());

        let stored = Nomination::get_id(&f.store, nomination.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_approved());
        assert!(!stored.is_accepted());
    }

    #[tokio::test]
    async fn test_unrelated_user_may_not_accept() {
        let f = fixture().await;
        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();

        let err = nomination.accept(&f.store, &f.outsider).await.unwrap_err();
        assert!(matches!(
            err,
            BadgerModelError::Nomination(NominationError::AcceptNotAllowed { .. })
        ));
        assert!(!nomination.is_accepted());

        let stored = Nomination::get_id(&f.store, nomination.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_accepted());
    }

    #[tokio::test]
    async fn test_staff_and_superusers_may_act() {
        let f = fixture().await;
        let mut staff = User::new("dave", "dave@example.com");
        staff.is_staff = true;
        staff.save(&f.store).await.unwrap();
        let mut root = User::new("erin", "erin@example.com");
        root.is_superuser = true;
        root.save(&f.store).await.unwrap();

        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();
        nomination.approve_by(&f.store, &staff).await.unwrap();
        nomination.accept(&f.store, &root).await.unwrap();
        assert!(f.badge.is_awarded_to(&f.store, &f.nominee).await.unwrap());

        let awards = f.nominee.awards(&f.store).await.unwrap();
        assert_eq!(staff.id, awards[0].creator_id);
    }

    #[tokio::test]
    async fn test_repeat_transitions_do_not_reaward() {
        let f = fixture().await;
        let mut nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();
        nomination.approve_by(&f.store, &f.creator).await.unwrap();
        nomination.accept(&f.store, &f.nominee).await.unwrap();

        nomination.approve_by(&f.store, &f.creator).await.unwrap();
        nomination.accept(&f.store, &f.nominee).await.unwrap();
        assert_eq!(
            1,
            f.store
                .count_awards(f.badge.id, f.nominee.id)
                .await
                .unwrap()
        );
        assert_eq!(Some(f.creator.id), nomination.approver_id);
    }

    #[tokio::test]
    async fn test_permission_mapping_for_nomination() {
        let f = fixture().await;
        let nomination = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();

        let perms = nomination.permissions_for(&f.badge, &f.nominee);
        assert_eq!(2, perms.len());
        assert_eq!(Some(&false), perms.get("approve"));
        assert_eq!(Some(&true), perms.get("accept"));

        let perms = nomination.permissions_for(&f.badge, &f.creator);
        assert_eq!(Some(&true), perms.get("approve"));
        assert_eq!(Some(&false), perms.get("accept"));

        let perms = nomination.permissions_for(&f.badge, &f.outsider);
        assert_eq!(Some(&false), perms.get("approve"));
        assert_eq!(Some(&false), perms.get("accept"));
    }

    #[tokio::test]
    async fn test_pending_queue_excludes_approved() {
        let f = fixture().await;
        let mut first = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.nominee)
            .await
            .unwrap();
        let second = f
            .badge
            .nominate_for(&f.store, &f.creator, &f.outsider)
            .await
            .unwrap();

        first.approve_by(&f.store, &f.creator).await.unwrap();
        let pending = Nomination::get_pending_for_badge(&f.store, &f.badge)
            .await
            .unwrap();
        assert_eq!(1, pending.len());
        assert_eq!(second.id, pending[0].id);
    }
}
