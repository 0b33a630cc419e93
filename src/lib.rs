#[macro_use]
extern crate tracing;

mod models;
pub mod acl;
pub mod slug;
pub mod store;

use sqlx::postgres::{PgPool, PgPoolOptions};

pub use acl::{Capability, Permissible};
pub use models::*;
pub use store::{BadgerStore, MemoryStore};

#[derive(thiserror::Error, Debug)]
pub enum BadgerModelError {
    #[error("Error in underlying datamodel: {}", .0)]
    SQLx(#[from] sqlx::Error),
    #[error("{}", .0)]
    Nomination(#[from] NominationError),
    #[error("Badge with title {:?} or slug {:?} already exists", .title, .slug)]
    DuplicateBadge { title: String, slug: String },
    #[error("Nomination {} already produced an award", .nomination_id)]
    AlreadyAwarded { nomination_id: i64 },
    #[error("No {} with id {}", .what, .id)]
    NotFound { what: &'static str, id: i64 },
}

/// Handle on the PostgreSQL backend. Implements [`BadgerStore`] for all
/// model operations; see [`store`].
#[derive(Clone)]
pub struct Client {
    db: PgPool,
}

impl Client {
    pub fn new(db: PgPool) -> Self {
        debug!("Creating new database client");
        Self { db }
    }

    pub async fn connect(dsn: &str) -> Result<Self, BadgerModelError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(dsn)
            .await?;
        info!("Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("db", &self.db).finish()
    }
}

impl From<PgPool> for Client {
    fn from(p: PgPool) -> Self {
        Client::new(p)
    }
}

impl From<&PgPool> for Client {
    fn from(p: &PgPool) -> Self {
        Client::new(p.clone())
    }
}
