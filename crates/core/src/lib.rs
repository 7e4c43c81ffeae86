pub mod catalog;
pub mod config;
pub mod domain;
pub mod errors;
pub mod pricing;
pub mod reply;
pub mod resolver;

pub use catalog::{normalize_text, CatalogSnapshot};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions};
pub use domain::product::{Candidate, CatalogEntry, ProductId};
pub use domain::quote::{Quote, QuoteId, QuoteLine, QuoteNumber};
pub use domain::session::{
    DraftItem, ProcessedMessage, Resolution, Session, SessionId, SessionKey, SessionState,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use pricing::{LineAmount, QuoteCalculator, QuoteTotals};
pub use reply::ReplyPayload;
pub use resolver::{ProductResolver, ResolutionOutcome, ResolverConfig};
