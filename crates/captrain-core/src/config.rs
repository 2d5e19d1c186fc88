//! Configuration types for captrain.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Captioning dataset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Path to the dataset file (JSON array or JSONL).
    pub data_file: PathBuf,

    /// Directory that record image paths are resolved against.
    pub image_root: PathBuf,

    /// Pad images to a square canvas before resizing instead of
    /// stretching them.
    #[serde(default)]
    pub pad_to_square: bool,
}

impl DatasetConfig {
    /// Create a config for the given dataset file and image root.
    pub fn new(data_file: impl Into<PathBuf>, image_root: impl Into<PathBuf>) -> Self {
        Self {
            data_file: data_file.into(),
            image_root: image_root.into(),
            pad_to_square: false,
        }
    }

    /// Enable or disable square padding.
    pub fn with_pad_to_square(mut self, pad_to_square: bool) -> Self {
        self.pad_to_square = pad_to_square;
        self
    }
}

/// Sequence formatting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Target batch sequence length. Batches shorter than this are padded
    /// up to it; longer batches are truncated down to it.
    #[serde(default = "default_target_length")]
    pub target_length: usize,

    /// Separator appended after the response text.
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            target_length: default_target_length(),
            separator: default_separator(),
        }
    }
}

fn default_target_length() -> usize {
    77
}

fn default_separator() -> String {
    "\n".to_string()
}
