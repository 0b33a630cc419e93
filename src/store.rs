use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use sqlx::Row;

use crate::{Award, Badge, BadgerModelError, Client, Nomination, User};

/// Persistence operations the models need. [`Client`] talks to PostgreSQL,
/// [`MemoryStore`] keeps everything in process.
///
/// Stores assign record ids on insert; timestamps and derived fields arrive
/// already filled by the model constructors. Awards have no update or delete
/// operation.
#[async_trait]
pub trait BadgerStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<i64, BadgerModelError>;
    async fn update_user(&self, user: &User) -> Result<(), BadgerModelError>;
    async fn user_by_id(&self, id: i64) -> Result<Option<User>, BadgerModelError>;

    async fn insert_badge(&self, badge: &Badge) -> Result<i64, BadgerModelError>;
    async fn update_badge(&self, badge: &Badge) -> Result<(), BadgerModelError>;
    async fn badge_by_id(&self, id: i64) -> Result<Option<Badge>, BadgerModelError>;
    async fn badge_by_slug(&self, slug: &str) -> Result<Option<Badge>, BadgerModelError>;
    async fn all_badges(&self, offset: i64, limit: i64) -> Result<Vec<Badge>, BadgerModelError>;

    async fn insert_nomination(&self, nomination: &Nomination) -> Result<i64, BadgerModelError>;
    async fn update_nomination(&self, nomination: &Nomination) -> Result<(), BadgerModelError>;
    async fn nomination_by_id(&self, id: i64) -> Result<Option<Nomination>, BadgerModelError>;
    async fn pending_nominations(&self, badge_id: i64)
        -> Result<Vec<Nomination>, BadgerModelError>;
    async fn count_nominations(
        &self,
        badge_id: i64,
        nominee_id: i64,
    ) -> Result<i64, BadgerModelError>;

    async fn insert_award(&self, award: &Award) -> Result<i64, BadgerModelError>;
    async fn count_awards(&self, badge_id: i64, user_id: i64) -> Result<i64, BadgerModelError>;
    async fn awards_for_user(&self, user_id: i64) -> Result<Vec<Award>, BadgerModelError>;
    async fn badges_for_user(&self, user_id: i64) -> Result<Vec<Badge>, BadgerModelError>;
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        name CHARACTER VARYING(255) NOT NULL,
        email CHARACTER VARYING(255) NOT NULL,
        is_staff BOOLEAN NOT NULL DEFAULT false,
        is_superuser BOOLEAN NOT NULL DEFAULT false,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS badges (
        id BIGSERIAL PRIMARY KEY,
        title CHARACTER VARYING(255) NOT NULL UNIQUE,
        slug CHARACTER VARYING(255) NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        creator_id BIGINT NOT NULL REFERENCES users (id),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS nominations (
        id BIGSERIAL PRIMARY KEY,
        badge_id BIGINT NOT NULL REFERENCES badges (id),
        nominee_id BIGINT NOT NULL REFERENCES users (id),
        accepted BOOLEAN NOT NULL DEFAULT false,
        creator_id BIGINT NOT NULL REFERENCES users (id),
        approver_id BIGINT REFERENCES users (id),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS awards (
        id BIGSERIAL PRIMARY KEY,
        badge_id BIGINT NOT NULL REFERENCES badges (id),
        user_id BIGINT NOT NULL REFERENCES users (id),
        nomination_id BIGINT REFERENCES nominations (id),
        creator_id BIGINT NOT NULL REFERENCES users (id),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )",
    // one award per nomination, direct grants stay unconstrained
    "CREATE UNIQUE INDEX IF NOT EXISTS index_awards_on_nomination_id
        ON awards (nomination_id) WHERE nomination_id IS NOT NULL",
];

impl Client {
    /// Create the tables and indices. Safe to run repeatedly.
    pub async fn init_schema(&self) -> Result<(), BadgerModelError> {
        info!("Initializing database schema");
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(self.pool()).await?;
        }
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[async_trait]
impl BadgerStore for Client {
    async fn insert_user(&self, user: &User) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "INSERT INTO users (name, email, is_staff, is_superuser, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("id"))
    }

    async fn update_user(&self, user: &User) -> Result<(), BadgerModelError> {
        let done = sqlx::query(
            "UPDATE users
             SET name = $2, email = $3, is_staff = $4, is_superuser = $5, updated_at = $6
             WHERE id = $1",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .bind(user.updated_at)
        .execute(self.pool())
        .await?;
        if done.rows_affected() == 0 {
            return Err(BadgerModelError::NotFound {
                what: "user",
                id: user.id,
            });
        }
        Ok(())
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, BadgerModelError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }

    async fn insert_badge(&self, badge: &Badge) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "INSERT INTO badges (title, slug, description, creator_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(&badge.title)
        .bind(&badge.slug)
        .bind(&badge.description)
        .bind(badge.creator_id)
        .bind(badge.created_at)
        .bind(badge.updated_at)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BadgerModelError::DuplicateBadge {
                    title: badge.title.clone(),
                    slug: badge.slug.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(row.get("id"))
    }

    async fn update_badge(&self, badge: &Badge) -> Result<(), BadgerModelError> {
        let done = sqlx::query(
            "UPDATE badges
             SET title = $2, slug = $3, description = $4, updated_at = $5
             WHERE id = $1",
        )
        .bind(badge.id)
        .bind(&badge.title)
        .bind(&badge.slug)
        .bind(&badge.description)
        .bind(badge.updated_at)
        .execute(self.pool())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                BadgerModelError::DuplicateBadge {
                    title: badge.title.clone(),
                    slug: badge.slug.clone(),
                }
            } else {
                e.into()
            }
        })?;
        if done.rows_affected() == 0 {
            return Err(BadgerModelError::NotFound {
                what: "badge",
                id: badge.id,
            });
        }
        Ok(())
    }

    async fn badge_by_id(&self, id: i64) -> Result<Option<Badge>, BadgerModelError> {
        let badge = sqlx::query_as::<_, Badge>("SELECT * FROM badges WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(badge)
    }

    async fn badge_by_slug(&self, slug: &str) -> Result<Option<Badge>, BadgerModelError> {
        let badge = sqlx::query_as::<_, Badge>("SELECT * FROM badges WHERE slug = $1")
            .bind(slug)
            .fetch_optional(self.pool())
            .await?;
        Ok(badge)
    }

    async fn all_badges(&self, offset: i64, limit: i64) -> Result<Vec<Badge>, BadgerModelError> {
        let badges = sqlx::query_as::<_, Badge>(
            "SELECT * FROM badges ORDER BY title, id OFFSET $1 LIMIT $2",
        )
        .bind(offset)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(badges)
    }

    async fn insert_nomination(&self, nomination: &Nomination) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "INSERT INTO nominations
             (badge_id, nominee_id, accepted, creator_id, approver_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id",
        )
        .bind(nomination.badge_id)
        .bind(nomination.nominee_id)
        .bind(nomination.accepted)
        .bind(nomination.creator_id)
        .bind(nomination.approver_id)
        .bind(nomination.created_at)
        .bind(nomination.updated_at)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("id"))
    }

    async fn update_nomination(&self, nomination: &Nomination) -> Result<(), BadgerModelError> {
        let done = sqlx::query(
            "UPDATE nominations
             SET accepted = $2, approver_id = $3, updated_at = $4
             WHERE id = $1",
        )
        .bind(nomination.id)
        .bind(nomination.accepted)
        .bind(nomination.approver_id)
        .bind(nomination.updated_at)
        .execute(self.pool())
        .await?;
        if done.rows_affected() == 0 {
            return Err(BadgerModelError::NotFound {
                what: "nomination",
                id: nomination.id,
            });
        }
        Ok(())
    }

    async fn nomination_by_id(&self, id: i64) -> Result<Option<Nomination>, BadgerModelError> {
        let nomination =
            sqlx::query_as::<_, Nomination>("SELECT * FROM nominations WHERE id = $1")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(nomination)
    }

    async fn pending_nominations(
        &self,
        badge_id: i64,
    ) -> Result<Vec<Nomination>, BadgerModelError> {
        let nominations = sqlx::query_as::<_, Nomination>(
            "SELECT * FROM nominations
             WHERE badge_id = $1 AND approver_id IS NULL
             ORDER BY created_at, id",
        )
        .bind(badge_id)
        .fetch_all(self.pool())
        .await?;
        Ok(nominations)
    }

    async fn count_nominations(
        &self,
        badge_id: i64,
        nominee_id: i64,
    ) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM nominations WHERE badge_id = $1 AND nominee_id = $2",
        )
        .bind(badge_id)
        .bind(nominee_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("count"))
    }

    async fn insert_award(&self, award: &Award) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "INSERT INTO awards
             (badge_id, user_id, nomination_id, creator_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(award.badge_id)
        .bind(award.user_id)
        .bind(award.nomination_id)
        .bind(award.creator_id)
        .bind(award.created_at)
        .bind(award.updated_at)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match (is_unique_violation(&e), award.nomination_id) {
            (true, Some(nomination_id)) => BadgerModelError::AlreadyAwarded { nomination_id },
            _ => e.into(),
        })?;
        Ok(row.get("id"))
    }

    async fn count_awards(&self, badge_id: i64, user_id: i64) -> Result<i64, BadgerModelError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM awards WHERE badge_id = $1 AND user_id = $2",
        )
        .bind(badge_id)
        .bind(user_id)
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("count"))
    }

    async fn awards_for_user(&self, user_id: i64) -> Result<Vec<Award>, BadgerModelError> {
        let awards = sqlx::query_as::<_, Award>(
            "SELECT * FROM awards WHERE user_id = $1 ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(awards)
    }

    async fn badges_for_user(&self, user_id: i64) -> Result<Vec<Badge>, BadgerModelError> {
        let badges = sqlx::query_as::<_, Badge>(
            "SELECT * FROM badges b
             WHERE EXISTS (SELECT 1 FROM awards a WHERE a.badge_id = b.id AND a.user_id = $1)
             ORDER BY b.title, b.id",
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(badges)
    }
}

/// Database-free store backend. Tables live in process behind a single lock,
/// which also serializes each transition-plus-completion-check sequence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    last_id: i64,
    users: BTreeMap<i64, User>,
    badges: BTreeMap<i64, Badge>,
    nominations: BTreeMap<i64, Nomination>,
    awards: BTreeMap<i64, Award>,
}

impl MemoryInner {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BadgerStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<i64, BadgerModelError> {
        let mut inner = self.write();
        let id = inner.next_id();
        let mut user = user.clone();
        user.id = id;
        inner.users.insert(id, user);
        Ok(id)
    }

    async fn update_user(&self, user: &User) -> Result<(), BadgerModelError> {
        let mut inner = self.write();
        if !inner.users.contains_key(&user.id) {
            return Err(BadgerModelError::NotFound {
                what: "user",
                id: user.id,
            });
        }
        inner.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, BadgerModelError> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn insert_badge(&self, badge: &Badge) -> Result<i64, BadgerModelError> {
        let mut inner = self.write();
        if inner
            .badges
            .values()
            .any(|b| b.title == badge.title || b.slug == badge.slug)
        {
            return Err(BadgerModelError::DuplicateBadge {
                title: badge.title.clone(),
                slug: badge.slug.clone(),
            });
        }
        let id = inner.next_id();
        let mut badge = badge.clone();
        badge.id = id;
        inner.badges.insert(id, badge);
        Ok(id)
    }

    async fn update_badge(&self, badge: &Badge) -> Result<(), BadgerModelError> {
        let mut inner = self.write();
        if !inner.badges.contains_key(&badge.id) {
            return Err(BadgerModelError::NotFound {
                what: "badge",
                id: badge.id,
            });
        }
        if inner
            .badges
            .values()
            .any(|b| b.id != badge.id && (b.title == badge.title || b.slug == badge.slug))
        {
            return Err(BadgerModelError::DuplicateBadge {
                title: badge.title.clone(),
                slug: badge.slug.clone(),
            });
        }
        inner.badges.insert(badge.id, badge.clone());
        Ok(())
    }

    async fn badge_by_id(&self, id: i64) -> Result<Option<Badge>, BadgerModelError> {
        Ok(self.read().badges.get(&id).cloned())
    }

    async fn badge_by_slug(&self, slug: &str) -> Result<Option<Badge>, BadgerModelError> {
        Ok(self
            .read()
            .badges
            .values()
            .find(|b| b.slug == slug)
            .cloned())
    }

    async fn all_badges(&self, offset: i64, limit: i64) -> Result<Vec<Badge>, BadgerModelError> {
        let mut badges: Vec<Badge> = self.read().badges.values().cloned().collect();
        badges.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(badges
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn insert_nomination(&self, nomination: &Nomination) -> Result<i64, BadgerModelError> {
        let mut inner = self.write();
        let id = inner.next_id();
        let mut nomination = nomination.clone();
        nomination.id = id;
        inner.nominations.insert(id, nomination);
        Ok(id)
    }

    async fn update_nomination(&self, nomination: &Nomination) -> Result<(), BadgerModelError> {
        let mut inner = self.write();
        if !inner.nominations.contains_key(&nomination.id) {
            return Err(BadgerModelError::NotFound {
                what: "nomination",
                id: nomination.id,
            });
        }
        inner.nominations.insert(nomination.id, nomination.clone());
        Ok(())
    }

    async fn nomination_by_id(&self, id: i64) -> Result<Option<Nomination>, BadgerModelError> {
        Ok(self.read().nominations.get(&id).cloned())
    }

    async fn pending_nominations(
        &self,
        badge_id: i64,
    ) -> Result<Vec<Nomination>, BadgerModelError> {
        let mut nominations: Vec<Nomination> = self
            .read()
            .nominations
            .values()
            .filter(|n| n.badge_id == badge_id && n.approver_id.is_none())
            .cloned()
            .collect();
        nominations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(nominations)
    }

    async fn count_nominations(
        &self,
        badge_id: i64,
        nominee_id: i64,
    ) -> Result<i64, BadgerModelError> {
        Ok(self
            .read()
            .nominations
            .values()
            .filter(|n| n.badge_id == badge_id && n.nominee_id == nominee_id)
            .count() as i64)
    }

    async fn insert_award(&self, award: &Award) -> Result<i64, BadgerModelError> {
        let mut inner = self.write();
        if let Some(nomination_id) = award.nomination_id {
            if inner
                .awards
                .values()
                .any(|a| a.nomination_id == Some(nomination_id))
            {
                return Err(BadgerModelError::AlreadyAwarded { nomination_id });
            }
        }
        let id = inner.next_id();
        let mut award = award.clone();
        award.id = id;
        inner.awards.insert(id, award);
        Ok(id)
    }

    async fn count_awards(&self, badge_id: i64, user_id: i64) -> Result<i64, BadgerModelError> {
        Ok(self
            .read()
            .awards
            .values()
            .filter(|a| a.badge_id == badge_id && a.user_id == user_id)
            .count() as i64)
    }

    async fn awards_for_user(&self, user_id: i64) -> Result<Vec<Award>, BadgerModelError> {
        let mut awards: Vec<Award> = self
            .read()
            .awards
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        awards.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(awards)
    }

    async fn badges_for_user(&self, user_id: i64) -> Result<Vec<Badge>, BadgerModelError> {
        let inner = self.read();
        let mut badges: Vec<Badge> = inner
            .badges
            .values()
            .filter(|b| {
                inner
                    .awards
                    .values()
                    .any(|a| a.badge_id == b.id && a.user_id == user_id)
            })
            .cloned()
            .collect();
        badges.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        Ok(badges)
    }
}
