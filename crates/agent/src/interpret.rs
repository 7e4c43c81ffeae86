use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use cotiza_core::catalog::normalize_text;
use cotiza_core::config::LlmConfig;
use cotiza_core::domain::session::SessionState;
use cotiza_core::errors::ApplicationError;

use crate::llm::{LlmClient, LlmRequest};

/// Hard caps applied to anything the interpreter produces, regardless of
/// what the model claims.
const MAX_ITEMS_PER_MESSAGE: usize = 20;
const MAX_QUANTITY: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    Add,
    Remove,
    QueryStatus,
    Finalize,
    Cancel,
    Chitchat,
    Unknown,
}

impl Intent {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            "query_status" => Some(Self::QueryStatus),
            "finalize" => Some(Self::Finalize),
            "cancel" => Some(Self::Cancel),
            "chitchat" => Some(Self::Chitchat),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// What the user wants done with one mentioned product. A single message may
/// mix both ("quita las plumas y agrega 5 folders").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemAction {
    Add,
    Remove,
}

impl ItemAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "add" => Some(Self::Add),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }
}

/// One product mention as the user phrased it, with the requested quantity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestedItem {
    pub name: String,
    pub quantity: u32,
    pub action: ItemAction,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageInterpretation {
    pub intent: Intent,
    pub items: Vec<RequestedItem>,
    /// Set when the message itself was too vague to act on, independent of
    /// how catalog matching goes.
    pub needs_clarification: bool,
}

impl MessageInterpretation {
    pub fn of(intent: Intent) -> Self {
        Self { intent, items: Vec::new(), needs_clarification: false }
    }
}

/// Conversation facts handed to the interpreter so follow-up messages
/// ("quita las plumas") can be read against the cart.
#[derive(Clone, Debug, Default)]
pub struct InterpretationContext {
    pub state: Option<SessionState>,
    pub cart_items: Vec<String>,
    pub context_summary: Option<String>,
}

#[async_trait]
pub trait MessageInterpreter: Send + Sync {
    async fn interpret(
        &self,
        text: &str,
        context: &InterpretationContext,
    ) -> Result<MessageInterpretation, ApplicationError>;
}

/// Wire shape the model is asked to emit. Everything is validated before it
/// reaches the engine.
#[derive(Debug, Deserialize)]
struct RawInterpretation {
    intent: String,
    #[serde(default)]
    items: Vec<RawItem>,
    #[serde(default)]
    needs_clarification: bool,
}

#[derive(Debug, Deserialize)]
struct RawItem {
    name: String,
    #[serde(default = "default_quantity")]
    quantity: u32,
    #[serde(default)]
    action: Option<String>,
}

fn default_quantity() -> u32 {
    1
}

impl RawInterpretation {
    fn validate(self) -> Result<MessageInterpretation, String> {
        let intent = Intent::parse(self.intent.trim())
            .ok_or_else(|| format!("unknown intent `{}`", self.intent))?;

        // An item without its own action tag follows the message intent.
        let default_action =
            if matches!(intent, Intent::Remove) { ItemAction::Remove } else { ItemAction::Add };

        let mut items = Vec::new();
        for raw in self.items.into_iter().take(MAX_ITEMS_PER_MESSAGE) {
            let name = normalize_text(&raw.name);
            if name.is_empty() {
                return Err("item with empty name".to_owned());
            }
            if raw.quantity == 0 || raw.quantity > MAX_QUANTITY {
                return Err(format!("item `{name}` has quantity {} out of range", raw.quantity));
            }
            let action = match &raw.action {
                Some(tag) => ItemAction::parse(tag.trim())
                    .ok_or_else(|| format!("unknown item action `{tag}`"))?,
                None => default_action,
            };
            items.push(RequestedItem { name, quantity: raw.quantity, action });
        }

        if matches!(intent, Intent::Add) && items.is_empty() && !self.needs_clarification {
            return Err("add intent without items".to_owned());
        }

        Ok(MessageInterpretation {
            intent,
            items,
            needs_clarification: self.needs_clarification,
        })
    }
}

const SYSTEM_PROMPT: &str = "\
Eres el interprete de un asistente de cotizaciones de papelería por chat. \
Lee el mensaje del cliente y responde UNICAMENTE con un objeto JSON, sin \
texto adicional, con esta forma exacta:
{\"intent\": \"add|remove|query_status|finalize|cancel|chitchat|unknown\", \
\"items\": [{\"name\": \"<producto>\", \"quantity\": <entero positivo>, \
\"action\": \"add|remove\"}], \"needs_clarification\": <true|false>}
Reglas:
- \"add\" cuando pide productos; incluye cada producto con su cantidad.
- \"remove\" cuando pide quitar algo del pedido.
- Si el mensaje mezcla agregar y quitar, marca cada producto con su \
\"action\" y usa el intent de la acción principal.
- \"query_status\" cuando pregunta qué lleva su pedido.
- \"finalize\" cuando pide la cotización o dice que es todo.
- \"cancel\" cuando quiere cancelar todo el pedido.
- \"chitchat\" para saludos o cortesía sin pedido.
- \"unknown\" si no puedes clasificarlo.
- \"needs_clarification\": true solo si el mensaje es tan ambiguo que no \
sabes qué producto o cantidad quiso decir; en ese caso puedes dejar \
\"items\" vacío.
- Nunca inventes productos ni cantidades que el cliente no mencionó.";

const STRICT_RETRY_SUFFIX: &str = "\
\n\nTu respuesta anterior no fue JSON válido. Responde solo el objeto JSON.";

/// Interpreter backed by a completion API. One stricter zero-temperature
/// retry on invalid output, then a hard fallback to `Unknown` so a
/// misbehaving model degrades to a clarification reply instead of an error.
pub struct LlmInterpreter<C> {
    client: C,
    timeout: Duration,
    max_retries: u32,
}

impl<C: LlmClient> LlmInterpreter<C> {
    pub fn new(client: C, config: &LlmConfig) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        }
    }

    fn user_prompt(text: &str, context: &InterpretationContext) -> String {
        let mut prompt = String::new();
        if let Some(state) = context.state {
            prompt.push_str(&format!("Estado de la conversación: {}\n", state.as_str()));
        }
        if !context.cart_items.is_empty() {
            prompt.push_str(&format!("Pedido actual: {}\n", context.cart_items.join(", ")));
        }
        if let Some(summary) = &context.context_summary {
            prompt.push_str(&format!("Resumen previo: {summary}\n"));
        }
        prompt.push_str(&format!("Mensaje del cliente: {text}"));
        prompt
    }

    async fn attempt(
        &self,
        request: &LlmRequest,
    ) -> Result<MessageInterpretation, ApplicationError> {
        let raw = tokio::time::timeout(self.timeout, self.client.complete(request))
            .await
            .map_err(|_| ApplicationError::Interpretation("completion timed out".to_owned()))?
            .map_err(|error| ApplicationError::Interpretation(error.to_string()))?;

        let stripped = strip_code_fences(&raw);
        let parsed: RawInterpretation = serde_json::from_str(stripped)
            .map_err(|error| ApplicationError::Interpretation(format!("invalid JSON: {error}")))?;
        parsed.validate().map_err(ApplicationError::Interpretation)
    }
}

#[async_trait]
impl<C: LlmClient> MessageInterpreter for LlmInterpreter<C> {
    async fn interpret(
        &self,
        text: &str,
        context: &InterpretationContext,
    ) -> Result<MessageInterpretation, ApplicationError> {
        let user = Self::user_prompt(text, context);

        let mut request =
            LlmRequest { system: SYSTEM_PROMPT.to_owned(), user: user.clone(), temperature: 0.3 };

        for attempt in 0..=self.max_retries {
            match self.attempt(&request).await {
                Ok(interpretation) => {
                    debug!(?interpretation.intent, attempt, "message interpreted");
                    return Ok(interpretation);
                }
                Err(error) => {
                    warn!(%error, attempt, "interpretation attempt failed");
                    // Retry colder and with the format reminder appended.
                    request = LlmRequest {
                        system: format!("{SYSTEM_PROMPT}{STRICT_RETRY_SUFFIX}"),
                        user: user.clone(),
                        temperature: 0.0,
                    };
                }
            }
        }

        Ok(MessageInterpretation::of(Intent::Unknown))
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Deterministic Spanish keyword interpreter. No network, no model; used by
/// the CLI simulator and anywhere reproducibility matters more than recall.
#[derive(Clone, Debug, Default)]
pub struct RuleBasedInterpreter;

impl RuleBasedInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn classify(normalized: &str) -> Intent {
        const CANCEL: &[&str] = &["cancela", "cancelar", "olvidalo", "ya no quiero nada"];
        const FINALIZE: &[&str] = &[
            "cotiza",
            "cotizacion",
            "cotizame",
            "finaliza",
            "eso es todo",
            "es todo",
            "seria todo",
            "nada mas",
        ];
        const REMOVE: &[&str] = &["quita", "quitame", "elimina", "borra", "remueve", "sin "];
        const STATUS: &[&str] =
            &["que llevo", "mi pedido", "resumen", "carrito", "que tengo", "estado"];
        const ADD: &[&str] = &[
            "agrega",
            "agregame",
            "anade",
            "quiero",
            "necesito",
            "ocupo",
            "ponme",
            "me das",
            "me pones",
            "vendeme",
            "tambien",
        ];
        const CHITCHAT: &[&str] =
            &["hola", "buenos dias", "buenas tardes", "buenas noches", "gracias", "adios"];

        let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| normalized.contains(kw));

        // Order matters: "ya no quiero nada" must not read as an add.
        if contains_any(CANCEL) {
            Intent::Cancel
        } else if contains_any(FINALIZE) {
            Intent::Finalize
        } else if contains_any(REMOVE) {
            Intent::Remove
        } else if contains_any(STATUS) {
            Intent::QueryStatus
        } else if contains_any(ADD) || starts_with_quantity(normalized) {
            Intent::Add
        } else if contains_any(CHITCHAT) {
            Intent::Chitchat
        } else {
            Intent::Unknown
        }
    }
}

#[async_trait]
impl MessageInterpreter for RuleBasedInterpreter {
    async fn interpret(
        &self,
        text: &str,
        _context: &InterpretationContext,
    ) -> Result<MessageInterpretation, ApplicationError> {
        let normalized = normalize_text(text);
        let intent = Self::classify(&normalized);

        let items = match intent {
            Intent::Add => extract_items(&normalized, ItemAction::Add),
            Intent::Remove => extract_items(&normalized, ItemAction::Remove),
            _ => Vec::new(),
        };

        if matches!(intent, Intent::Add) && items.is_empty() {
            return Ok(MessageInterpretation::of(Intent::Unknown));
        }

        Ok(MessageInterpretation { intent, items, needs_clarification: false })
    }
}

const FILLER_WORDS: &[&str] = &[
    "agrega", "agregame", "anade", "quiero", "necesito", "ocupo", "ponme", "me", "das", "pones",
    "vendeme", "quita", "quitame", "elimina", "borra", "remueve", "tambien", "por", "favor", "de",
    "del", "la", "el", "los", "las", "un", "una", "unos", "unas", "al", "a", "y", "mi", "pedido",
    "paquete", "paquetes", "pieza", "piezas", "caja", "cajas",
];

fn spanish_quantity(token: &str) -> Option<u32> {
    if let Ok(value) = token.parse::<u32>() {
        return Some(value);
    }
    match token {
        "un" | "una" | "uno" => Some(1),
        "dos" => Some(2),
        "tres" => Some(3),
        "cuatro" => Some(4),
        "cinco" => Some(5),
        "seis" => Some(6),
        "siete" => Some(7),
        "ocho" => Some(8),
        "nueve" => Some(9),
        "diez" => Some(10),
        "docena" => Some(12),
        "quince" => Some(15),
        "veinte" => Some(20),
        "cincuenta" => Some(50),
        "cien" => Some(100),
        _ => None,
    }
}

fn starts_with_quantity(normalized: &str) -> bool {
    normalized.split(' ').next().and_then(spanish_quantity).is_some()
}

/// Splits a message into product mentions. Segments are separated by commas
/// or " y "; each segment may start with a quantity ("20 calculadoras"),
/// defaulting to 1.
fn extract_items(normalized: &str, action: ItemAction) -> Vec<RequestedItem> {
    let mut items = Vec::new();

    for segment in normalized.split(',').flat_map(|part| part.split(" y ")) {
        let mut quantity = 1u32;
        let mut name_tokens: Vec<&str> = Vec::new();

        for token in segment.split(' ').filter(|t| !t.is_empty()) {
            if name_tokens.is_empty() {
                if let Some(value) = spanish_quantity(token) {
                    quantity = value.clamp(1, MAX_QUANTITY);
                    continue;
                }
                if FILLER_WORDS.contains(&token) {
                    continue;
                }
            }
            name_tokens.push(token);
        }

        // Trailing fillers ("...por favor") are noise, not product words.
        while let Some(last) = name_tokens.last() {
            if FILLER_WORDS.contains(last) {
                name_tokens.pop();
            } else {
                break;
            }
        }

        if !name_tokens.is_empty() {
            items.push(RequestedItem { name: name_tokens.join(" "), quantity, action });
        }
        if items.len() == MAX_ITEMS_PER_MESSAGE {
            break;
        }
    }

    items
}
