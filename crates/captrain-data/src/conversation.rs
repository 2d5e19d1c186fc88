//! Plain-format conversation handling.
//!
//! Caption records carry a two-turn conversation: an instruction turn that
//! may contain an image placeholder, and a response turn with the caption
//! text. The plain format renders them without role prefixes, as raw text
//! followed by a separator, and decides which prefix of the sequence is
//! excluded from the loss.

use captrain_core::{CaptrainError, Result};
use serde::Deserialize;

/// Placeholder marking the image position inside a turn's text.
pub const IMAGE_TOKEN: &str = "<image>";

/// Label value excluded from loss computation.
pub const IGNORE_INDEX: i64 = -100;

/// A single turn in a conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationTurn {
    /// Speaker tag ("human", "gpt", ...). Ignored by the plain format.
    #[serde(default)]
    pub from: Option<String>,
    /// Turn text, possibly containing the image placeholder.
    pub value: String,
}

impl ConversationTurn {
    /// Create a turn without a speaker tag.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            from: None,
            value: value.into(),
        }
    }
}

/// Remove the image placeholder from a turn's text.
///
/// Text without the placeholder is returned unchanged; text containing it
/// has every occurrence deleted and surrounding whitespace trimmed.
pub fn strip_image_token(text: &str) -> String {
    if text.contains(IMAGE_TOKEN) {
        text.replace(IMAGE_TOKEN, "").trim().to_string()
    } else {
        text.to_string()
    }
}

/// How the instruction turn contributes to the loss mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptMasking {
    /// Blank the instruction text before concatenation. The masked prefix
    /// is empty, so the entire response trains.
    #[default]
    BlankPrompt,
    /// Keep the instruction text and mask its tokenized length in the
    /// labels.
    MaskPrompt,
}

/// Result of rendering a conversation with a template.
#[derive(Debug, Clone)]
pub struct FormattedConversation {
    /// The full text to tokenize.
    pub text: String,
    /// The prompt portion. Its tokenized length is the number of leading
    /// labels replaced with [`IGNORE_INDEX`].
    pub prompt: String,
}

/// Conversation template with no role prefixes, only raw text plus a
/// separator.
#[derive(Debug, Clone)]
pub struct PlainTemplate {
    /// Separator appended after the response.
    pub separator: String,
}

impl Default for PlainTemplate {
    fn default() -> Self {
        Self {
            separator: "\n".to_string(),
        }
    }
}

impl PlainTemplate {
    /// Create a template with the given separator.
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }

    /// Render a two-turn conversation into text plus a prompt split.
    ///
    /// The image placeholder is stripped from both turns. The rendered
    /// text is `prompt + response + separator`. Under
    /// [`PromptMasking::BlankPrompt`] the prompt is empty; under
    /// [`PromptMasking::MaskPrompt`] it is the instruction text followed
    /// by the separator, so the two turns stay delimited.
    pub fn apply(
        &self,
        turns: &[ConversationTurn],
        masking: PromptMasking,
    ) -> Result<FormattedConversation> {
        if turns.len() != 2 {
            return Err(CaptrainError::InvalidArgument(format!(
                "plain format expects exactly 2 conversation turns, got {}",
                turns.len()
            )));
        }

        let prompt = match masking {
            PromptMasking::BlankPrompt => String::new(),
            PromptMasking::MaskPrompt => {
                format!("{}{}", strip_image_token(&turns[0].value), self.separator)
            }
        };
        let response = strip_image_token(&turns[1].value);

        let text = format!("{}{}{}", prompt, response, self.separator);
        Ok(FormattedConversation { text, prompt })
    }
}
