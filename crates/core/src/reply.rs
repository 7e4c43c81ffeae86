use serde::{Deserialize, Serialize};

/// Outbound message for the chat channel. Kept small and serializable so a
/// processed-message record can replay it verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
    /// Numbered options the user can answer by index, used for
    /// disambiguation prompts.
    pub options: Vec<String>,
    /// Quote number when this reply delivered a finalized quote.
    pub quote_number: Option<String>,
}

impl ReplyPayload {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), options: Vec::new(), quote_number: None }
    }

    pub fn with_options(text: impl Into<String>, options: Vec<String>) -> Self {
        Self { text: text.into(), options, quote_number: None }
    }

    pub fn quote(text: impl Into<String>, quote_number: impl Into<String>) -> Self {
        Self { text: text.into(), options: Vec::new(), quote_number: Some(quote_number.into()) }
    }
}
