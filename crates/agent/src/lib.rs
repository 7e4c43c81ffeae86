//! Conversation engine - natural-language quoting over a chat channel
//!
//! This crate is the orchestration layer between the chat transport and the
//! deterministic core:
//! - Interprets inbound text into a structured intent (`interpret`)
//! - Applies the intent to the working cart session (`engine`)
//! - Serializes concurrent turns per conversation (`dispatch`)
//! - Talks to the completion API when an LLM interpreter is configured (`llm`)
//!
//! # Safety Principle
//!
//! The LLM is strictly a translator. It never decides prices, catalog
//! matches, or totals. Those are deterministic decisions made by the core
//! resolver and calculator, so a replayed conversation always produces the
//! same quote.

pub mod dispatch;
pub mod engine;
pub mod interpret;
pub mod llm;

pub use dispatch::SessionLocks;
pub use engine::{ConversationEngine, InboundMessage, TurnResult};
pub use interpret::{
    Intent, InterpretationContext, ItemAction, LlmInterpreter, MessageInterpretation,
    MessageInterpreter, RequestedItem, RuleBasedInterpreter,
};
pub use llm::{LlmClient, LlmRequest, OpenAiClient};
