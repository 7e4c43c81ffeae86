use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use cotiza_core::catalog::CatalogSnapshot;
use cotiza_core::domain::product::CatalogEntry;
use cotiza_core::domain::quote::{Quote, QuoteNumber};
use cotiza_core::domain::session::{Session, SessionId, SessionKey};

pub mod catalog;
pub mod memory;
pub mod quote;
pub mod session;

pub use catalog::SqlCatalogRepository;
pub use memory::{InMemoryCatalogRepository, InMemoryQuoteRepository, InMemorySessionRepository};
pub use quote::SqlQuoteRepository;
pub use session::SqlSessionRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("version conflict saving session {0}")]
    Conflict(String),
}

/// Session persistence with optimistic concurrency. `save` expects the
/// caller to have bumped `session.version` by one; a mismatch against the
/// stored row fails with `Conflict` and the caller reloads and retries.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError>;

    /// The single open session for a conversation key, if any.
    async fn find_open_by_key(&self, key: &SessionKey)
        -> Result<Option<Session>, RepositoryError>;

    /// The most recently active session for a key, open or closed. Replay
    /// dedup needs this: a redelivered finalize must find the completed
    /// session that already answered it.
    async fn find_latest_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError>;

    async fn save(&self, session: &Session) -> Result<(), RepositoryError>;

    /// Open sessions whose expiry deadline has passed, for the sweeper.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, RepositoryError>;
}

#[async_trait]
pub trait QuoteRepository: Send + Sync {
    /// Reserves and returns the next quote number for the year. Numbers are
    /// handed out exactly once; a crash after allocation leaves a gap.
    async fn allocate_number(&self, year: i32) -> Result<QuoteNumber, RepositoryError>;

    /// Insert only. Quotes are immutable once written.
    async fn save(&self, quote: &Quote) -> Result<(), RepositoryError>;

    async fn find_by_number(&self, number: &QuoteNumber)
        -> Result<Option<Quote>, RepositoryError>;

    async fn list_for_session(&self, session_id: &SessionId)
        -> Result<Vec<Quote>, RepositoryError>;
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), RepositoryError>;

    /// Consistent point-in-time view used for a whole conversation turn.
    async fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError>;
}
