use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use cotiza_core::domain::quote::QuoteNumber;
use cotiza_core::domain::session::{
    DraftItem, ProcessedMessage, Session, SessionId, SessionKey, SessionState,
};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id,
    user_id,
    chat_id,
    state,
    items_json,
    context_summary,
    version,
    reserved_quote_number,
    processed_json,
    created_at,
    last_activity_at,
    expires_at";

#[async_trait::async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn find_by_id(&self, id: &SessionId) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM session WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_open_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS}
             FROM session
             WHERE user_id = ? AND chat_id = ?
               AND state IN ('active_empty', 'active_with_items', 'awaiting_clarification')"
        ))
        .bind(&key.user_id)
        .bind(&key.chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn find_latest_by_key(
        &self,
        key: &SessionKey,
    ) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS}
             FROM session
             WHERE user_id = ? AND chat_id = ?
             ORDER BY last_activity_at DESC
             LIMIT 1"
        ))
        .bind(&key.user_id)
        .bind(&key.chat_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(session_from_row).transpose()
    }

    async fn save(&self, session: &Session) -> Result<(), RepositoryError> {
        let items_json = serde_json::to_string(&session.items)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let processed_json = serde_json::to_string(&session.processed)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let expected_version = session.version as i64 - 1;

        if session.version == 1 {
            // First save is an insert; a duplicate id means someone else
            // opened the session first.
            let inserted = sqlx::query(
                "INSERT OR IGNORE INTO session (
                    id, user_id, chat_id, state, items_json, context_summary,
                    version, reserved_quote_number, processed_json,
                    created_at, last_activity_at, expires_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&session.id.0)
            .bind(&session.key.user_id)
            .bind(&session.key.chat_id)
            .bind(session.state.as_str())
            .bind(&items_json)
            .bind(session.context_summary.as_deref())
            .bind(session.version as i64)
            .bind(session.reserved_quote_number.as_ref().map(|number| number.to_string()))
            .bind(&processed_json)
            .bind(session.created_at.to_rfc3339())
            .bind(session.last_activity_at.to_rfc3339())
            .bind(session.expires_at.to_rfc3339())
            .execute(&self.pool)
            .await?;

            if inserted.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(session.id.0.clone()));
            }
            return Ok(());
        }

        let updated = sqlx::query(
            "UPDATE session SET
                state = ?,
                items_json = ?,
                context_summary = ?,
                version = ?,
                reserved_quote_number = ?,
                processed_json = ?,
                last_activity_at = ?,
                expires_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(session.state.as_str())
        .bind(&items_json)
        .bind(session.context_summary.as_deref())
        .bind(session.version as i64)
        .bind(session.reserved_quote_number.as_ref().map(|number| number.to_string()))
        .bind(&processed_json)
        .bind(session.last_activity_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .bind(&session.id.0)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(session.id.0.clone()));
        }

        Ok(())
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS}
             FROM session
             WHERE expires_at <= ?
               AND state IN ('active_empty', 'active_with_items', 'awaiting_clarification')
             ORDER BY expires_at ASC"
        ))
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(session_from_row).collect()
    }
}

fn session_from_row(row: SqliteRow) -> Result<Session, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = SessionState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown session state `{state_raw}`")))?;

    let items: Vec<DraftItem> = serde_json::from_str(&row.try_get::<String, _>("items_json")?)
        .map_err(|error| RepositoryError::Decode(format!("invalid items_json: {error}")))?;
    let reserved_quote_number = row
        .try_get::<Option<String>, _>("reserved_quote_number")?
        .map(|raw| {
            raw.parse::<QuoteNumber>().map_err(|error| {
                RepositoryError::Decode(format!("invalid reserved_quote_number: {error}"))
            })
        })
        .transpose()?;
    let processed: Vec<ProcessedMessage> =
        serde_json::from_str(&row.try_get::<String, _>("processed_json")?)
            .map_err(|error| RepositoryError::Decode(format!("invalid processed_json: {error}")))?;

    Ok(Session {
        id: SessionId(row.try_get("id")?),
        key: SessionKey { user_id: row.try_get("user_id")?, chat_id: row.try_get("chat_id")? },
        state,
        items,
        context_summary: row.try_get("context_summary")?,
        version: parse_version(row.try_get("version")?)?,
        reserved_quote_number,
        processed,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        last_activity_at: parse_timestamp("last_activity_at", row.try_get("last_activity_at")?)?,
        expires_at: parse_timestamp("expires_at", row.try_get("expires_at")?)?,
    })
}

fn parse_version(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid session version (expected non-negative): {value}"))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use cotiza_core::domain::product::ProductId;
    use cotiza_core::domain::quote::QuoteNumber;
    use cotiza_core::domain::session::{
        DraftItem, Resolution, Session, SessionId, SessionKey, SessionState,
    };
    use cotiza_core::reply::ReplyPayload;

    use super::SqlSessionRepository;
    use crate::migrations;
    use crate::repositories::{RepositoryError, SessionRepository};
    use crate::{connect_with_settings, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn sample_session(id: &str) -> Session {
        let mut session = Session::open(
            SessionId(id.to_owned()),
            SessionKey { user_id: "5215551234".to_owned(), chat_id: "wa-chat-1".to_owned() },
            Utc::now(),
            Duration::hours(2),
        );
        session.version = 1;
        session
    }

    #[tokio::test]
    async fn sql_session_repo_round_trip_with_items_and_replies() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());

        let mut session = sample_session("ses-sql-1");
        session
            .upsert_item(DraftItem {
                requested_name: "papel bond carta".to_owned(),
                display_name: "Papel Bond Carta".to_owned(),
                quantity: 10,
                resolution: Resolution::Resolved {
                    product_id: ProductId("p-1".to_owned()),
                    name: "papel bond carta 500 hojas".to_owned(),
                    sku: "PAP-001".to_owned(),
                    unit_price: Decimal::new(350, 2),
                },
            })
            .expect("add item");
        session.recompute_state();
        session.record_processed("wamid-1", ReplyPayload::text("Agregado."), Utc::now());
        session.reserved_quote_number =
            Some(QuoteNumber::new(2026, 17).expect("valid quote number"));

        repo.save(&session).await.expect("save session");

        let found = repo.find_by_id(&session.id).await.expect("find");
        let found = found.expect("session should exist");
        assert_eq!(found.items, session.items);
        assert_eq!(found.state, SessionState::ActiveWithItems);
        assert!(found.find_processed("wamid-1").is_some());
        assert_eq!(found.reserved_quote_number, session.reserved_quote_number);

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_session_save_detects_stale_versions() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());

        let session = sample_session("ses-sql-2");
        repo.save(&session).await.expect("insert");

        let mut winner = session.clone();
        winner.version = 2;
        repo.save(&winner).await.expect("winner update");

        let mut loser = session.clone();
        loser.version = 2;
        assert!(matches!(
            repo.save(&loser).await,
            Err(RepositoryError::Conflict(id)) if id == session.id.0
        ));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_latest_lookup_prefers_most_recent_activity() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let now = Utc::now();

        let mut completed = sample_session("ses-sql-old");
        completed.state = SessionState::Completed;
        completed.last_activity_at = now - Duration::minutes(30);
        repo.save(&completed).await.expect("save completed");

        let mut current = sample_session("ses-sql-new");
        current.last_activity_at = now;
        repo.save(&current).await.expect("save current");

        let latest = repo.find_latest_by_key(&current.key).await.expect("lookup");
        assert_eq!(latest.map(|found| found.id), Some(current.id));

        pool.close().await;
    }

    #[tokio::test]
    async fn sql_session_expired_sweep_skips_closed_sessions() {
        let pool = setup_pool().await;
        let repo = SqlSessionRepository::new(pool.clone());
        let now = Utc::now();

        let mut stale = sample_session("ses-sql-3");
        stale.expires_at = now - Duration::minutes(10);
        repo.save(&stale).await.expect("save stale");

        let mut cancelled = sample_session("ses-sql-4");
        cancelled.key.chat_id = "wa-chat-2".to_owned();
        cancelled.state = SessionState::Cancelled;
        cancelled.expires_at = now - Duration::minutes(10);
        repo.save(&cancelled).await.expect("save cancelled");

        let expired = repo.list_expired(now).await.expect("sweep");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, stale.id);

        pool.close().await;
    }
}
