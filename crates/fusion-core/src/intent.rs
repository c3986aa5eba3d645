//! Routing a chat message to the document-QA or order/general responder.
//!
//! The classifier is one completion call with a fixed instruction asking for
//! exactly one of two labels. Anything other than a clean label resolves to
//! [`Intent::OrderGeneral`].

use anyhow::Result;

use crate::completion::{CompletionProvider, PromptMessage};

pub const DOCUMENT_LABEL: &str = "DOCUMENT_QUESTION";
pub const ORDER_LABEL: &str = "ORDER_GENERAL";

const CLASSIFIER_INSTRUCTION: &str = "You route messages for the customer assistant of an online store.
Decide whether the customer's message is a question that should be answered from the store's \
uploaded documents (policies, manuals, FAQs, shipping and return terms), or whether it is about \
their own orders, purchases, account, or general conversation.

Reply with exactly one label and nothing else:
DOCUMENT_QUESTION
ORDER_GENERAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    DocumentQuestion,
    OrderGeneral,
}

impl Intent {
    /// Map a raw classifier reply to an intent, defaulting to order/general.
    pub fn from_label(raw: &str) -> Self {
        parse_label(raw).unwrap_or(Intent::OrderGeneral)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::DocumentQuestion => DOCUMENT_LABEL,
            Intent::OrderGeneral => ORDER_LABEL,
        }
    }
}

/// Strict parse of a classifier reply.
///
/// Surrounding whitespace, quotes, backticks and a trailing period are
/// tolerated, as is letter case. Any other text, including a reply that
/// mentions both labels, is `None`.
pub fn parse_label(raw: &str) -> Option<Intent> {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.')
        .trim()
        .to_ascii_uppercase();
    match cleaned.as_str() {
        DOCUMENT_LABEL => Some(Intent::DocumentQuestion),
        ORDER_LABEL => Some(Intent::OrderGeneral),
        _ => None,
    }
}

/// The message list sent to the classifier.
pub fn classification_messages(message: &str) -> Vec<PromptMessage> {
    vec![
        PromptMessage::system(CLASSIFIER_INSTRUCTION),
        PromptMessage::user(message),
    ]
}

/// One classification call.
///
/// A reply that is not a clean label yields `Ok(Intent::OrderGeneral)`;
/// only a provider failure is an error, and callers treat that as
/// order/general too.
pub async fn classify(completer: &dyn CompletionProvider, message: &str) -> Result<Intent> {
    let reply = completer.complete(&classification_messages(message)).await?;
    Ok(Intent::from_label(&reply))
}
