use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use cotiza_core::catalog::CatalogSnapshot;
use cotiza_core::domain::product::CatalogEntry;
use cotiza_core::domain::quote::{Quote, QuoteNumber};
use cotiza_core::domain::session::{Session, SessionId, SessionKey};
use cotiza_core::errors::DomainError;

use super::{CatalogRepository, QuoteRepository, RepositoryError, SessionRepository};

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<String, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&id.0).cloned())
    }

    async fn find_open_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .find(|session| &session.key == key && !session.state.is_closed())
            .cloned())
    }

    async fn find_latest_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|session| &session.key == key)
            .max_by_key(|session| session.last_activity_at)
            .cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&session.id.0) {
            Some(stored) if stored.version + 1 != session.version => {
                return Err(RepositoryError::Conflict(session.id.0.clone()));
            }
            None if session.version != 1 => {
                return Err(RepositoryError::Conflict(session.id.0.clone()));
            }
            _ => {}
        }
        sessions.insert(session.id.0.clone(), session.clone());
        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().filter(|session| session.is_expired(now)).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryQuoteRepository {
    quotes: RwLock<HashMap<String, Quote>>,
    counters: RwLock<HashMap<i32, u32>>,
}

#[async_trait::async_trait]
impl QuoteRepository for InMemoryQuoteRepository {
    async fn allocate_number(&self, year: i32) -> Result<QuoteNumber, RepositoryError> {
        let mut counters = self.counters.write().await;
        let sequence = counters.entry(year).or_insert(0);
        *sequence += 1;
        QuoteNumber::new(year, *sequence)
            .map_err(|error: DomainError| RepositoryError::Decode(error.to_string()))
    }

    async fn save(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut quotes = self.quotes.write().await;
        quotes.insert(quote.number.to_string(), quote.clone());
        Ok(())
    }

    async fn find_by_number(
        &self,
        number: &QuoteNumber,
    ) -> Result<Option<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        Ok(quotes.get(&number.to_string()).cloned())
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let quotes = self.quotes.read().await;
        let mut found: Vec<Quote> =
            quotes.values().filter(|quote| &quote.session_id == session_id).cloned().collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }
}

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    products: RwLock<HashMap<String, CatalogEntry>>,
}

#[async_trait::async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn upsert(&self, entry: &CatalogEntry) -> Result<(), RepositoryError> {
        let mut products = self.products.write().await;
        products.insert(entry.id.0.clone(), entry.clone());
        Ok(())
    }

    async fn snapshot(&self) -> Result<CatalogSnapshot, RepositoryError> {
        let products = self.products.read().await;
        Ok(CatalogSnapshot::new(products.values().cloned().collect()))
    }
}
