//! Tokenizer integration.

use captrain_core::{CaptrainError, Result};
use std::path::Path;

/// Default maximum sequence length assumed when the caller does not
/// provide one.
pub const DEFAULT_MODEL_MAX_LENGTH: usize = 2048;

/// Wrapper around the tokenizers library.
pub struct Tokenizer {
    inner: tokenizers::Tokenizer,
    model_max_length: usize,
    pad_token_id: Option<u32>,
}

impl Tokenizer {
    /// Load a tokenizer from a local file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| CaptrainError::Tokenizer(e.to_string()))?;
        Ok(Self::wrap(inner))
    }

    /// Load a tokenizer from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(bytes)
            .map_err(|e| CaptrainError::Tokenizer(e.to_string()))?;
        Ok(Self::wrap(inner))
    }

    fn wrap(inner: tokenizers::Tokenizer) -> Self {
        Self {
            inner,
            model_max_length: DEFAULT_MODEL_MAX_LENGTH,
            pad_token_id: None,
        }
    }

    /// Set the maximum sequence length the downstream model supports.
    pub fn with_model_max_length(mut self, model_max_length: usize) -> Self {
        self.model_max_length = model_max_length;
        self
    }

    /// Override the padding token id.
    ///
    /// Useful for tokenizers whose pad token was added after the fact
    /// under a name the lookup chain does not cover.
    pub fn with_pad_token_id(mut self, pad_token_id: u32) -> Self {
        self.pad_token_id = Some(pad_token_id);
        self
    }

    /// Maximum sequence length the downstream model supports.
    pub fn model_max_length(&self) -> usize {
        self.model_max_length
    }

    /// Encode text to token IDs.
    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| CaptrainError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Encode text with special tokens.
    pub fn encode_with_special_tokens(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| CaptrainError::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Decode token IDs to text.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        self.inner
            .decode(ids, true)
            .map_err(|e| CaptrainError::Tokenizer(e.to_string()))
    }

    /// Get vocabulary size.
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }

    /// Get pad token ID if available.
    ///
    /// Tries the explicit override first, then common pad token names,
    /// then falls back to the EOS token.
    pub fn pad_token_id(&self) -> Option<u32> {
        self.pad_token_id
            .or_else(|| self.inner.token_to_id("<pad>"))
            .or_else(|| self.inner.token_to_id("[PAD]"))
            .or_else(|| self.inner.token_to_id("<|pad|>"))
            .or_else(|| self.inner.token_to_id("<|finetune_right_pad_id|>"))
            .or_else(|| self.eos_token_id())
    }

    /// Get EOS token ID if available.
    pub fn eos_token_id(&self) -> Option<u32> {
        self.inner
            .token_to_id("</s>")
            .or_else(|| self.inner.token_to_id("<|endoftext|>"))
            .or_else(|| self.inner.token_to_id("<|end_of_text|>"))
            .or_else(|| self.inner.token_to_id("<eos>"))
    }

    /// Get BOS token ID if available.
    pub fn bos_token_id(&self) -> Option<u32> {
        self.inner
            .token_to_id("<s>")
            .or_else(|| self.inner.token_to_id("<|begin_of_text|>"))
            .or_else(|| self.inner.token_to_id("<bos>"))
    }
}
