use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::product::{Candidate, ProductId};
use crate::domain::quote::QuoteNumber;
use crate::errors::DomainError;
use crate::reply::ReplyPayload;
use rust_decimal::Decimal;

/// Newest processed-message records kept per session for replay dedup.
const PROCESSED_RING_CAPACITY: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

/// Identity of a conversation as seen by the chat channel. One live session
/// exists per key at a time.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: String,
    pub chat_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    ActiveEmpty,
    ActiveWithItems,
    AwaitingClarification,
    Completed,
    Expired,
    Cancelled,
}

impl SessionState {
    /// Closed sessions accept no further mutations; the next inbound message
    /// for the same key opens a fresh session.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Expired | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActiveEmpty => "active_empty",
            Self::ActiveWithItems => "active_with_items",
            Self::AwaitingClarification => "awaiting_clarification",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active_empty" => Some(Self::ActiveEmpty),
            "active_with_items" => Some(Self::ActiveWithItems),
            "awaiting_clarification" => Some(Self::AwaitingClarification),
            "completed" => Some(Self::Completed),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How far a requested line got through catalog matching.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    Unresolved,
    Resolved {
        product_id: ProductId,
        name: String,
        sku: String,
        unit_price: Decimal,
    },
    Ambiguous {
        candidates: Vec<Candidate>,
    },
    NotFound {
        suggestions: Vec<Candidate>,
    },
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    pub fn blocks_finalization(&self) -> bool {
        !self.is_resolved()
    }
}

/// One requested line in the working cart. `requested_name` is the
/// normalized form used for dedup and matching; `display_name` keeps the
/// user's wording for replies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub requested_name: String,
    pub display_name: String,
    pub quantity: u32,
    pub resolution: Resolution,
}

/// Record of an already-handled channel message. Replays return the stored
/// reply without re-executing the mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessedMessage {
    pub channel_message_id: String,
    pub reply: ReplyPayload,
    pub processed_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub key: SessionKey,
    pub state: SessionState,
    pub items: Vec<DraftItem>,
    pub context_summary: Option<String>,
    /// Optimistic concurrency token. Stores reject saves whose version does
    /// not match the persisted row.
    pub version: u64,
    /// Quote number reserved for this session before the quote row is
    /// written. A finalize that crashed between the two writes recovers the
    /// same quote on redelivery instead of numbering a second one.
    pub reserved_quote_number: Option<QuoteNumber>,
    pub processed: Vec<ProcessedMessage>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn open(id: SessionId, key: SessionKey, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id,
            key,
            state: SessionState::ActiveEmpty,
            items: Vec::new(),
            context_summary: None,
            version: 0,
            reserved_quote_number: None,
            processed: Vec::new(),
            created_at: now,
            last_activity_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self.state, next),
            (ActiveEmpty, ActiveWithItems)
                | (ActiveEmpty, AwaitingClarification)
                | (ActiveWithItems, ActiveEmpty)
                | (ActiveWithItems, AwaitingClarification)
                | (ActiveWithItems, Completed)
                | (AwaitingClarification, ActiveEmpty)
                | (AwaitingClarification, ActiveWithItems)
                | (AwaitingClarification, Completed)
                | (ActiveEmpty, Expired)
                | (ActiveWithItems, Expired)
                | (AwaitingClarification, Expired)
                | (ActiveEmpty, Cancelled)
                | (ActiveWithItems, Cancelled)
                | (AwaitingClarification, Cancelled)
        ) || self.state == next
    }

    pub fn transition_to(&mut self, next: SessionState) -> Result<(), DomainError> {
        if self.state.is_closed() {
            return Err(DomainError::SessionClosed);
        }
        if self.can_transition_to(next) {
            self.state = next;
            return Ok(());
        }

        Err(DomainError::InvalidSessionTransition { from: self.state, to: next })
    }

    /// Closes the session after a quote was produced. The draft lines are
    /// frozen inside the quote, so the live cart empties out with the
    /// transition.
    pub fn complete(&mut self) -> Result<(), DomainError> {
        self.transition_to(SessionState::Completed)?;
        self.items.clear();
        Ok(())
    }

    /// Adds a requested line or merges into an existing one with the same
    /// normalized name. Merging bumps quantity when the prior line is usable
    /// as-is; Ambiguous and NotFound lines are replaced outright so the new
    /// request gets a fresh matching pass.
    pub fn upsert_item(&mut self, item: DraftItem) -> Result<(), DomainError> {
        if self.state.is_closed() {
            return Err(DomainError::SessionClosed);
        }
        if item.quantity == 0 {
            return Err(DomainError::InvariantViolation(
                "requested quantity must be positive".to_owned(),
            ));
        }

        match self.items.iter_mut().find(|existing| existing.requested_name == item.requested_name)
        {
            Some(existing) => match existing.resolution {
                Resolution::Resolved { .. } | Resolution::Unresolved => {
                    existing.quantity = existing.quantity.saturating_add(item.quantity);
                }
                Resolution::Ambiguous { .. } | Resolution::NotFound { .. } => {
                    *existing = item;
                }
            },
            None => self.items.push(item),
        }

        Ok(())
    }

    /// Removes the line whose normalized name matches. Returns the removed
    /// line so callers can phrase the confirmation.
    pub fn remove_item(&mut self, requested_name: &str) -> Result<Option<DraftItem>, DomainError> {
        if self.state.is_closed() {
            return Err(DomainError::SessionClosed);
        }

        let position =
            self.items.iter().position(|item| item.requested_name == requested_name);
        Ok(position.map(|index| self.items.remove(index)))
    }

    /// Recomputes the active sub-state from cart contents. Clarification
    /// needs win over everything else; closed states are never changed here.
    pub fn recompute_state(&mut self) {
        if self.state.is_closed() {
            return;
        }

        let needs_clarification = self
            .items
            .iter()
            .any(|item| matches!(item.resolution, Resolution::Ambiguous { .. } | Resolution::NotFound { .. }));

        self.state = if needs_clarification {
            SessionState::AwaitingClarification
        } else if self.items.is_empty() {
            SessionState::ActiveEmpty
        } else {
            SessionState::ActiveWithItems
        };
    }

    /// Lines that must be resolved before a quote can be produced.
    pub fn blocking_items(&self) -> Vec<&DraftItem> {
        self.items.iter().filter(|item| item.resolution.blocks_finalization()).collect()
    }

    pub fn find_processed(&self, channel_message_id: &str) -> Option<&ProcessedMessage> {
        self.processed.iter().find(|record| record.channel_message_id == channel_message_id)
    }

    pub fn record_processed(
        &mut self,
        channel_message_id: impl Into<String>,
        reply: ReplyPayload,
        now: DateTime<Utc>,
    ) {
        self.processed.push(ProcessedMessage {
            channel_message_id: channel_message_id.into(),
            reply,
            processed_at: now,
        });
        if self.processed.len() > PROCESSED_RING_CAPACITY {
            let overflow = self.processed.len() - PROCESSED_RING_CAPACITY;
            self.processed.drain(..overflow);
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_activity_at = now;
        self.expires_at = now + ttl;
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.state.is_closed() && now >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    use crate::domain::product::{Candidate, ProductId};
    use crate::errors::DomainError;
    use crate::reply::ReplyPayload;

    use super::{DraftItem, Resolution, Session, SessionId, SessionKey, SessionState};

    fn session() -> Session {
        Session::open(
            SessionId("ses-1".to_owned()),
            SessionKey { user_id: "user-7".to_owned(), chat_id: "chat-7".to_owned() },
            Utc::now(),
            Duration::hours(2),
        )
    }

    fn resolved_item(name: &str, quantity: u32) -> DraftItem {
        DraftItem {
            requested_name: name.to_owned(),
            display_name: name.to_owned(),
            quantity,
            resolution: Resolution::Resolved {
                product_id: ProductId(format!("prod-{name}")),
                name: name.to_owned(),
                sku: format!("SKU-{name}"),
                unit_price: Decimal::new(1050, 2),
            },
        }
    }

    fn ambiguous_item(name: &str) -> DraftItem {
        DraftItem {
            requested_name: name.to_owned(),
            display_name: name.to_owned(),
            quantity: 1,
            resolution: Resolution::Ambiguous {
                candidates: vec![
                    Candidate {
                        product_id: ProductId("prod-a".to_owned()),
                        name: "variant a".to_owned(),
                        sku: "SKU-A".to_owned(),
                        unit_price: Decimal::ONE,
                        score: 0.8,
                    },
                    Candidate {
                        product_id: ProductId("prod-b".to_owned()),
                        name: "variant b".to_owned(),
                        sku: "SKU-B".to_owned(),
                        unit_price: Decimal::ONE,
                        score: 0.7,
                    },
                ],
            },
        }
    }

    #[test]
    fn allows_valid_lifecycle_transition() {
        let mut session = session();
        session.transition_to(SessionState::ActiveWithItems).expect("empty -> with items");
        assert_eq!(session.state, SessionState::ActiveWithItems);
    }

    #[test]
    fn completion_empties_the_live_cart() {
        let mut session = session();
        session.upsert_item(resolved_item("papel bond", 5)).expect("add");
        session.recompute_state();

        session.complete().expect("complete");

        assert_eq!(session.state, SessionState::Completed);
        assert!(session.items.is_empty());
    }

    #[test]
    fn blocks_completion_from_empty_cart() {
        let mut session = session();
        let error = session
            .transition_to(SessionState::Completed)
            .expect_err("empty -> completed should fail");
        assert!(matches!(error, DomainError::InvalidSessionTransition { .. }));
    }

    #[test]
    fn closed_sessions_reject_mutations() {
        let mut session = session();
        session.transition_to(SessionState::Cancelled).expect("cancel");

        assert!(matches!(
            session.upsert_item(resolved_item("papel bond", 1)),
            Err(DomainError::SessionClosed)
        ));
        assert!(matches!(
            session.transition_to(SessionState::ActiveWithItems),
            Err(DomainError::SessionClosed)
        ));
    }

    #[test]
    fn upsert_merges_quantities_for_same_normalized_name() {
        let mut session = session();
        session.upsert_item(resolved_item("papel bond", 5)).expect("first add");
        session.upsert_item(resolved_item("papel bond", 3)).expect("second add");

        assert_eq!(session.items.len(), 1);
        assert_eq!(session.items[0].quantity, 8);
    }

    #[test]
    fn upsert_replaces_ambiguous_lines_instead_of_merging() {
        let mut session = session();
        session.upsert_item(ambiguous_item("hojas")).expect("ambiguous add");
        session.upsert_item(resolved_item("hojas", 2)).expect("clarifying add");

        assert_eq!(session.items.len(), 1);
        assert_eq!(session.items[0].quantity, 2);
        assert!(session.items[0].resolution.is_resolved());
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut session = session();
        let error = session
            .upsert_item(resolved_item("papel bond", 0))
            .expect_err("zero quantity should fail");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn recompute_prefers_clarification_over_active() {
        let mut session = session();
        session.upsert_item(resolved_item("papel bond", 5)).expect("add");
        session.upsert_item(ambiguous_item("hojas")).expect("add ambiguous");
        session.recompute_state();

        assert_eq!(session.state, SessionState::AwaitingClarification);

        session.remove_item("hojas").expect("remove ambiguous");
        session.recompute_state();
        assert_eq!(session.state, SessionState::ActiveWithItems);

        session.remove_item("papel bond").expect("remove last");
        session.recompute_state();
        assert_eq!(session.state, SessionState::ActiveEmpty);
    }

    #[test]
    fn remove_returns_none_for_unknown_line() {
        let mut session = session();
        session.upsert_item(resolved_item("papel bond", 5)).expect("add");

        let removed = session.remove_item("grapas").expect("remove call");
        assert!(removed.is_none());
        assert_eq!(session.items.len(), 1);
    }

    #[test]
    fn processed_ring_drops_oldest_records() {
        let mut session = session();
        let now = Utc::now();
        for index in 0..40 {
            session.record_processed(
                format!("msg-{index}"),
                ReplyPayload::text(format!("reply {index}")),
                now,
            );
        }

        assert_eq!(session.processed.len(), 32);
        assert!(session.find_processed("msg-7").is_none());
        assert!(session.find_processed("msg-39").is_some());
    }

    #[test]
    fn expiry_is_based_on_deadline_and_open_state() {
        let mut session = session();
        let later = session.expires_at + Duration::minutes(1);
        assert!(session.is_expired(later));

        session.transition_to(SessionState::Cancelled).expect("cancel");
        assert!(!session.is_expired(later));
    }
}
