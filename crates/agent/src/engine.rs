use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cotiza_core::catalog::CatalogSnapshot;
use cotiza_core::config::QuotingConfig;
use cotiza_core::domain::quote::{Quote, QuoteId};
use cotiza_core::domain::session::{
    DraftItem, Resolution, Session, SessionId, SessionKey, SessionState,
};
use cotiza_core::errors::{ApplicationError, DomainError};
use cotiza_core::pricing::{LineAmount, QuoteCalculator};
use cotiza_core::reply::ReplyPayload;
use cotiza_core::resolver::{ProductResolver, ResolverConfig};
use cotiza_db::repositories::{
    CatalogRepository, QuoteRepository, RepositoryError, SessionRepository,
};

use crate::dispatch::SessionLocks;
use crate::interpret::{
    Intent, InterpretationContext, ItemAction, MessageInterpretation, MessageInterpreter,
};

/// One message as delivered by the chat channel adapter.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub key: SessionKey,
    /// Channel-assigned id used for replay dedup. Redeliveries carry the
    /// same id and must not re-execute the turn.
    pub channel_message_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct TurnResult {
    pub session_id: SessionId,
    pub state: SessionState,
    pub reply: ReplyPayload,
    pub quote: Option<Quote>,
    /// True when this was a redelivery and the stored reply was replayed.
    pub deduplicated: bool,
}

/// Orchestrates one conversation turn: interpret, mutate the cart session,
/// price on finalize, persist, reply. All catalog and pricing decisions are
/// delegated to the deterministic core.
pub struct ConversationEngine {
    interpreter: Arc<dyn MessageInterpreter>,
    sessions: Arc<dyn SessionRepository>,
    quotes: Arc<dyn QuoteRepository>,
    catalog: Arc<dyn CatalogRepository>,
    resolver: ProductResolver,
    calculator: QuoteCalculator,
    quoting: QuotingConfig,
    locks: SessionLocks,
}

impl ConversationEngine {
    pub fn new(
        interpreter: Arc<dyn MessageInterpreter>,
        sessions: Arc<dyn SessionRepository>,
        quotes: Arc<dyn QuoteRepository>,
        catalog: Arc<dyn CatalogRepository>,
        quoting: QuotingConfig,
        resolver: ResolverConfig,
    ) -> Result<Self, ApplicationError> {
        let calculator = QuoteCalculator::new(quoting.tax_rate).map_err(ApplicationError::from)?;
        Ok(Self {
            interpreter,
            sessions,
            quotes,
            catalog,
            resolver: ProductResolver::new(resolver),
            calculator,
            quoting,
            locks: SessionLocks::new(),
        })
    }

    fn session_ttl(&self) -> Duration {
        Duration::minutes(self.quoting.session_ttl_minutes)
    }

    /// Processes one inbound message end to end. Turns for the same
    /// conversation are serialized; optimistic save conflicts reload and
    /// retry a bounded number of times.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<TurnResult, ApplicationError> {
        let _turn = self
            .locks
            .acquire(&message.key, StdDuration::from_millis(self.quoting.lock_wait_ms))
            .await?;

        let mut last_conflict = None;
        for attempt in 0..self.quoting.max_save_retries {
            let latest = self
                .sessions
                .find_latest_by_key(&message.key)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

            // Dedup against the latest session even when it is closed. A
            // redelivered finalize must replay the stored confirmation, not
            // open a new cart.
            if let Some(previous) = &latest {
                if let Some(record) = previous.find_processed(&message.channel_message_id) {
                    debug!(
                        session_id = %previous.id.0,
                        channel_message_id = %message.channel_message_id,
                        "replayed message, returning stored reply"
                    );
                    // When the stored reply delivered a quote, the replay
                    // hands back that same quote.
                    let quote = match &record.reply.quote_number {
                        Some(number) => {
                            let number = number
                                .parse()
                                .map_err(|error: DomainError| ApplicationError::from(error))?;
                            self.quotes.find_by_number(&number).await.map_err(|error| {
                                ApplicationError::Persistence(error.to_string())
                            })?
                        }
                        None => None,
                    };
                    return Ok(TurnResult {
                        session_id: previous.id.clone(),
                        state: previous.state,
                        reply: record.reply.clone(),
                        quote,
                        deduplicated: true,
                    });
                }
            }

            let mut session = self.working_session(latest, &message.key, message.received_at).await?;

            let context = InterpretationContext {
                state: Some(session.state),
                cart_items: session.items.iter().map(|item| item.display_name.clone()).collect(),
                context_summary: session.context_summary.clone(),
            };
            let interpretation = self.interpreter.interpret(&message.text, &context).await?;

            // Only turns that match or price against the catalog need the
            // snapshot. A failed query degrades the turn instead of erroring
            // it: requested items resolve as not found and the session stays
            // intact.
            let needs_catalog = matches!(interpretation.intent, Intent::Finalize)
                || interpretation.items.iter().any(|item| item.action == ItemAction::Add);
            let snapshot = if needs_catalog {
                match self.catalog.snapshot().await {
                    Ok(snapshot) => Some(snapshot),
                    Err(error) => {
                        warn!(%error, "catalog query failed, degrading this turn");
                        None
                    }
                }
            } else {
                None
            };

            let (reply, quote) = self
                .apply_intent(&mut session, &interpretation, snapshot.as_ref(), message.received_at)
                .await?;

            if !session.state.is_closed() {
                session.touch(message.received_at, self.session_ttl());
            }
            session.record_processed(&message.channel_message_id, reply.clone(), message.received_at);
            session.context_summary = Some(summarize(&session));
            session.version += 1;

            match self.sessions.save(&session).await {
                Ok(()) => {
                    info!(
                        session_id = %session.id.0,
                        state = session.state.as_str(),
                        intent = ?interpretation.intent,
                        quoted = quote.is_some(),
                        "turn committed"
                    );
                    return Ok(TurnResult {
                        session_id: session.id.clone(),
                        state: session.state,
                        reply,
                        quote,
                        deduplicated: false,
                    });
                }
                Err(RepositoryError::Conflict(id)) => {
                    warn!(session_id = %id, attempt, "optimistic save conflict, retrying turn");
                    if quote.is_some() {
                        // The quote row is already committed; retrying here
                        // would price the cart a second time. The stored
                        // session carries the reserved number, so a later
                        // delivery recovers this same quote.
                        return Err(ApplicationError::Conflict(id));
                    }
                    last_conflict = Some(id);
                }
                Err(other) => return Err(ApplicationError::Persistence(other.to_string())),
            }
        }

        Err(ApplicationError::Conflict(last_conflict.unwrap_or_default()))
    }

    /// Closes open sessions whose inactivity deadline passed. Returns how
    /// many were expired; conflicts mean another worker got there first and
    /// are skipped.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ApplicationError> {
        let stale = self
            .sessions
            .list_expired(now)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let mut swept = 0;
        for mut session in stale {
            session.transition_to(SessionState::Expired)?;
            session.version += 1;
            match self.sessions.save(&session).await {
                Ok(()) => {
                    info!(session_id = %session.id.0, "session expired");
                    swept += 1;
                }
                Err(RepositoryError::Conflict(_)) => continue,
                Err(other) => return Err(ApplicationError::Persistence(other.to_string())),
            }
        }
        Ok(swept)
    }

    async fn working_session(
        &self,
        latest: Option<Session>,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Session, ApplicationError> {
        if let Some(mut session) = latest {
            if !session.state.is_closed() {
                if !session.is_expired(now) {
                    return Ok(session);
                }
                session.transition_to(SessionState::Expired)?;
                session.version += 1;
                match self.sessions.save(&session).await {
                    Ok(()) | Err(RepositoryError::Conflict(_)) => {}
                    Err(other) => return Err(ApplicationError::Persistence(other.to_string())),
                }
            }
        }

        Ok(Session::open(
            SessionId(Uuid::new_v4().to_string()),
            key.clone(),
            now,
            self.session_ttl(),
        ))
    }

    async fn apply_intent(
        &self,
        session: &mut Session,
        interpretation: &MessageInterpretation,
        snapshot: Option<&CatalogSnapshot>,
        now: DateTime<Utc>,
    ) -> Result<(ReplyPayload, Option<Quote>), ApplicationError> {
        let reply = match interpretation.intent {
            Intent::Add | Intent::Remove => {
                let mut added = Vec::new();
                let mut removed = Vec::new();
                let mut missing = Vec::new();
                for requested in &interpretation.items {
                    match requested.action {
                        ItemAction::Add => {
                            let resolution = match snapshot {
                                Some(snapshot) => self
                                    .resolver
                                    .resolve(&requested.name, snapshot)
                                    .into_resolution(),
                                None => Resolution::NotFound { suggestions: Vec::new() },
                            };
                            session.upsert_item(DraftItem {
                                requested_name: requested.name.clone(),
                                display_name: requested.name.clone(),
                                quantity: requested.quantity,
                                resolution,
                            })?;
                            added.push(requested.name.clone());
                        }
                        ItemAction::Remove => match session.remove_item(&requested.name)? {
                            Some(item) => removed.push(item.display_name),
                            None => missing.push(requested.name.clone()),
                        },
                    }
                }
                session.recompute_state();
                if interpretation.needs_clarification {
                    session.transition_to(SessionState::AwaitingClarification)?;
                }
                compose_cart_reply(
                    session,
                    &added,
                    &removed,
                    &missing,
                    interpretation.needs_clarification,
                )
            }
            Intent::QueryStatus => compose_status_reply(session),
            Intent::Finalize => {
                let Some(snapshot) = snapshot else {
                    return Ok((
                        ReplyPayload::text(
                            "No puedo consultar el catálogo en este momento. Pide tu \
                             cotización de nuevo en unos minutos, por favor.",
                        ),
                        None,
                    ));
                };
                return self.finalize(session, snapshot, now).await;
            }
            Intent::Cancel => {
                session.transition_to(SessionState::Cancelled)?;
                ReplyPayload::text("He cancelado tu pedido. Cuando gustes empezamos uno nuevo.")
            }
            Intent::Chitchat => ReplyPayload::text(
                "¡Hola! Soy el asistente de cotizaciones. Dime qué productos necesitas \
                 y te preparo una cotización.",
            ),
            Intent::Unknown => ReplyPayload::text(
                "No entendí tu mensaje. Puedes pedirme productos (\"quiero 10 plumas\"), \
                 revisar tu pedido o pedir tu cotización.",
            ),
        };

        Ok((reply, None))
    }

    async fn finalize(
        &self,
        session: &mut Session,
        snapshot: &CatalogSnapshot,
        now: DateTime<Utc>,
    ) -> Result<(ReplyPayload, Option<Quote>), ApplicationError> {
        // A reserved number whose quote row exists means a prior finalize
        // crashed after writing the quote. Hand that quote back instead of
        // numbering a second one.
        if let Some(reserved) = session.reserved_quote_number.clone() {
            let existing = self
                .quotes
                .find_by_number(&reserved)
                .await
                .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
            if let Some(quote) = existing {
                info!(session_id = %session.id.0, number = %quote.number, "recovered quote");
                session.complete()?;
                return Ok((compose_quote_reply(&quote, &[]), Some(quote)));
            }
        }

        let blocking: Vec<String> =
            session.blocking_items().iter().map(|item| describe_blocker(item)).collect();
        if session.items.is_empty() || !blocking.is_empty() {
            return Ok((compose_finalize_refusal(session, &blocking), None));
        }

        let (lines, stock_notes) = priced_lines(session, snapshot);
        if lines.is_empty() {
            return Ok((
                ReplyPayload::text(
                    "Ninguno de los productos de tu pedido tiene existencias en este momento, \
                     así que no puedo cotizarlo todavía.",
                ),
                None,
            ));
        }

        let totals = self.calculator.compute(&lines, self.quoting.shipping_cost)?;

        // Reserve the number on the session before the quote row is written,
        // so a crash between the two writes leaves a recoverable pointer
        // instead of an orphaned quote a redelivery would duplicate.
        let number = match session.reserved_quote_number.clone() {
            Some(reserved) => reserved,
            None => {
                let number = self
                    .quotes
                    .allocate_number(now.year())
                    .await
                    .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
                session.reserved_quote_number = Some(number.clone());
                session.version += 1;
                self.sessions.save(session).await.map_err(|error| match error {
                    RepositoryError::Conflict(id) => ApplicationError::Conflict(id),
                    other => ApplicationError::Persistence(other.to_string()),
                })?;
                number
            }
        };

        let quote = Quote {
            id: QuoteId(Uuid::new_v4().to_string()),
            number,
            session_id: session.id.clone(),
            lines: totals.lines,
            subtotal: totals.subtotal,
            tax_rate: totals.tax_rate,
            tax_amount: totals.tax_amount,
            shipping_cost: totals.shipping_cost,
            total: totals.total,
            created_at: now,
            valid_until: now + Duration::days(self.quoting.validity_days),
        };

        // The quote row commits before the session closes. The reverse order
        // would lose a quote the customer was promised; this order is covered
        // by the reservation above.
        self.quotes
            .save(&quote)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        session.complete()?;

        Ok((compose_quote_reply(&quote, &stock_notes), Some(quote)))
    }
}

/// Reprices resolved cart lines against the current snapshot and clamps
/// quantities to available stock. Out-of-stock lines are dropped with a note.
fn priced_lines(session: &Session, snapshot: &CatalogSnapshot) -> (Vec<LineAmount>, Vec<String>) {
    let mut lines = Vec::new();
    let mut notes = Vec::new();

    for item in &session.items {
        let Resolution::Resolved { product_id, name, sku, unit_price } = &item.resolution else {
            continue;
        };

        match snapshot.by_id(product_id) {
            Some(entry) => {
                if entry.stock_quantity == 0 {
                    notes.push(format!("{}: sin existencias, se excluyó", entry.name));
                    continue;
                }
                let quantity = item.quantity.min(entry.stock_quantity);
                if quantity < item.quantity {
                    notes.push(format!(
                        "{}: cantidad ajustada a {} por existencias",
                        entry.name, quantity
                    ));
                }
                lines.push(LineAmount {
                    product_name: entry.name.clone(),
                    product_sku: entry.sku.clone(),
                    quantity,
                    unit_price: entry.unit_price,
                });
            }
            // The product left the catalog after it was resolved; honor the
            // frozen data from resolution time.
            None => lines.push(LineAmount {
                product_name: name.clone(),
                product_sku: sku.clone(),
                quantity: item.quantity,
                unit_price: *unit_price,
            }),
        }
    }

    (lines, notes)
}

fn summarize(session: &Session) -> String {
    let resolved = session.items.iter().filter(|item| item.resolution.is_resolved()).count();
    let pending = session.items.len() - resolved;
    format!("{} productos confirmados, {} por aclarar", resolved, pending)
}

fn describe_blocker(item: &DraftItem) -> String {
    match &item.resolution {
        Resolution::Ambiguous { .. } => {
            format!("\"{}\" tiene varias opciones, falta que elijas una", item.display_name)
        }
        Resolution::NotFound { .. } => {
            format!("\"{}\" no está en el catálogo", item.display_name)
        }
        Resolution::Unresolved => format!("\"{}\" sigue sin confirmarse", item.display_name),
        Resolution::Resolved { .. } => String::new(),
    }
}

fn compose_cart_reply(
    session: &Session,
    added: &[String],
    removed: &[String],
    missing: &[String],
    needs_clarification: bool,
) -> ReplyPayload {
    let mut text = String::new();
    let mut options = Vec::new();

    if !removed.is_empty() {
        text.push_str(&format!("Quité de tu pedido: {}.\n", removed.join(", ")));
    }
    for name in missing {
        text.push_str(&format!("No tienes \"{name}\" en tu pedido.\n"));
    }

    for name in added {
        let Some(item) = session.items.iter().find(|item| &item.requested_name == name) else {
            continue;
        };
        match &item.resolution {
            Resolution::Resolved { name, unit_price, .. } => {
                text.push_str(&format!(
                    "Agregué {} x {} (${} c/u).\n",
                    item.quantity, name, unit_price
                ));
            }
            Resolution::Ambiguous { candidates } => {
                text.push_str(&format!(
                    "Para \"{}\" encontré varias opciones, ¿cuál prefieres?\n",
                    item.display_name
                ));
                for (index, candidate) in candidates.iter().enumerate() {
                    let line = format!("{}) {} - ${}", index + 1, candidate.name, candidate.unit_price);
                    text.push_str(&format!("  {line}\n"));
                    options.push(line);
                }
            }
            Resolution::NotFound { suggestions } => {
                text.push_str(&format!("No encontré \"{}\" en el catálogo.", item.display_name));
                if suggestions.is_empty() {
                    text.push('\n');
                } else {
                    let names: Vec<&str> =
                        suggestions.iter().map(|candidate| candidate.name.as_str()).collect();
                    text.push_str(&format!(" ¿Quizá quisiste decir: {}?\n", names.join(", ")));
                }
            }
            Resolution::Unresolved => {
                text.push_str(&format!("Anoté \"{}\" para confirmar después.\n", item.display_name));
            }
        }
    }

    if needs_clarification {
        text.push_str(
            "No me quedó claro qué productos o cantidades necesitas, ¿me lo repites con más \
             detalle?",
        );
    } else if text.is_empty() {
        text.push_str("Dime qué producto quieres quitar de tu pedido.");
    } else if session.state == SessionState::ActiveWithItems {
        text.push_str("¿Agrego algo más o genero tu cotización?");
    }

    ReplyPayload::with_options(text.trim_end().to_owned(), options)
}

fn compose_status_reply(session: &Session) -> ReplyPayload {
    if session.items.is_empty() {
        return ReplyPayload::text(
            "Tu pedido está vacío: 0 productos, subtotal $0.00. Dime qué productos necesitas \
             para empezar.",
        );
    }

    let noun = if session.items.len() == 1 { "producto" } else { "productos" };
    let mut text = format!("Tu pedido actual ({} {noun}):\n", session.items.len());
    let mut subtotal = Decimal::ZERO;
    for (index, item) in session.items.iter().enumerate() {
        let status = match &item.resolution {
            Resolution::Resolved { name, unit_price, .. } => {
                subtotal += *unit_price * Decimal::from(item.quantity);
                format!("{} x {}", item.quantity, name)
            }
            Resolution::Ambiguous { .. } => {
                format!("{} (pendiente de elegir opción)", item.display_name)
            }
            Resolution::NotFound { .. } => {
                format!("{} (no encontrado en catálogo)", item.display_name)
            }
            Resolution::Unresolved => format!("{} (por confirmar)", item.display_name),
        };
        text.push_str(&format!("{}. {}\n", index + 1, status));
    }
    subtotal.rescale(2);
    text.push_str(&format!("Subtotal de lo confirmado: ${subtotal}"));
    ReplyPayload::text(text)
}

fn compose_finalize_refusal(session: &Session, blocking: &[String]) -> ReplyPayload {
    if session.items.is_empty() {
        return ReplyPayload::text(
            "Tu pedido está vacío, no hay nada que cotizar todavía. Dime qué necesitas.",
        );
    }

    let mut text = String::from("Aún no puedo generar la cotización:\n");
    for reason in blocking {
        text.push_str(&format!("- {reason}\n"));
    }
    text.push_str("Resuélvelo y con gusto la genero.");
    ReplyPayload::text(text)
}

fn compose_quote_reply(quote: &Quote, stock_notes: &[String]) -> ReplyPayload {
    let mut text = format!("Cotización {}\n", quote.number);
    for (index, line) in quote.lines.iter().enumerate() {
        text.push_str(&format!(
            "{}. {} - {} x ${} = ${}\n",
            index + 1,
            line.product_name,
            line.quantity,
            line.unit_price,
            line.line_total
        ));
    }
    text.push_str(&format!("Subtotal: ${}\n", quote.subtotal));
    text.push_str(&format!(
        "IVA ({}%): ${}\n",
        quote.tax_rate * Decimal::from(100),
        quote.tax_amount
    ));
    if quote.shipping_cost > Decimal::ZERO {
        text.push_str(&format!("Envío: ${}\n", quote.shipping_cost));
    }
    text.push_str(&format!("Total: ${}\n", quote.total));
    for note in stock_notes {
        text.push_str(&format!("Nota: {note}\n"));
    }
    text.push_str(&format!("Válida hasta el {}.", quote.valid_until.format("%d/%m/%Y")));

    ReplyPayload::quote(text, quote.number.to_string())
}
