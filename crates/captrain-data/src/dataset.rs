//! Caption dataset loading and per-record tokenization.

use crate::conversation::{ConversationTurn, PlainTemplate, PromptMasking, IGNORE_INDEX};
use crate::image_processing::ClipImageProcessor;
use crate::tokenizer::Tokenizer;
use candle_core::Tensor;
use captrain_core::{CaptrainError, DatasetConfig, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One record of a captioning dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionRecord {
    /// Optional record identifier.
    #[serde(default)]
    pub id: Option<String>,
    /// Conversation turns (instruction, response).
    pub conversations: Vec<ConversationTurn>,
    /// Image path relative to the image root.
    #[serde(default)]
    pub image: Option<String>,
}

/// A tokenized example ready for collation.
///
/// `input_ids` and `labels` have equal length and are not padded; length
/// reconciliation happens at collation.
#[derive(Debug, Clone)]
pub struct TokenizedExample {
    /// Input token IDs, ending with the EOS id.
    pub input_ids: Vec<u32>,
    /// Labels, with the prompt prefix replaced by [`IGNORE_INDEX`].
    pub labels: Vec<i64>,
    /// Pixel tensor of shape `[3, H, W]`.
    pub image: Tensor,
}

/// Image-caption dataset for multimodal pretraining.
///
/// Records are parsed once at construction and only those carrying an
/// image path are retained. Tokenization and image preprocessing happen
/// lazily, per index.
pub struct CaptionDataset {
    records: Vec<CaptionRecord>,
    image_root: PathBuf,
    tokenizer: Arc<Tokenizer>,
    image_processor: Arc<ClipImageProcessor>,
    template: PlainTemplate,
    masking: PromptMasking,
}

impl CaptionDataset {
    /// Load a dataset from the configured data file.
    ///
    /// The file is a JSON array of records, or JSONL when the file
    /// extension is `jsonl`.
    pub fn load(
        config: &DatasetConfig,
        tokenizer: Arc<Tokenizer>,
        image_processor: Arc<ClipImageProcessor>,
        template: PlainTemplate,
        masking: PromptMasking,
    ) -> Result<Self> {
        let records = Self::read_records(&config.data_file)?;
        Ok(Self::from_records(
            records,
            config.image_root.clone(),
            tokenizer,
            image_processor,
            template,
            masking,
        ))
    }

    /// Build a dataset from in-memory records.
    ///
    /// Applies the same image-presence filter as [`CaptionDataset::load`].
    pub fn from_records(
        records: Vec<CaptionRecord>,
        image_root: PathBuf,
        tokenizer: Arc<Tokenizer>,
        image_processor: Arc<ClipImageProcessor>,
        template: PlainTemplate,
        masking: PromptMasking,
    ) -> Self {
        let total = records.len();
        let records: Vec<CaptionRecord> =
            records.into_iter().filter(|r| r.image.is_some()).collect();
        tracing::info!(
            total,
            kept = records.len(),
            dropped = total - records.len(),
            "loaded caption records"
        );

        Self {
            records,
            image_root,
            tokenizer,
            image_processor,
            template,
            masking,
        }
    }

    fn read_records(path: &Path) -> Result<Vec<CaptionRecord>> {
        let is_jsonl = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

        let file = File::open(path).map_err(|e| {
            CaptrainError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open dataset file {}: {}", path.display(), e),
            ))
        })?;

        if is_jsonl {
            let reader = BufReader::new(file);
            let mut records = Vec::new();
            for (line_num, line_result) in reader.lines().enumerate() {
                let line = line_result?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: CaptionRecord = serde_json::from_str(&line).map_err(|e| {
                    CaptrainError::Serialization(format!("line {}: {}", line_num + 1, e))
                })?;
                records.push(record);
            }
            Ok(records)
        } else {
            serde_json::from_reader(BufReader::new(file))
                .map_err(|e| CaptrainError::Serialization(e.to_string()))
        }
    }

    /// Get the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Tokenize and preprocess a single record.
    ///
    /// Renders the conversation with the template, tokenizes it, appends
    /// the EOS id, masks the prompt prefix in the labels, and loads the
    /// record's image. Records without an image get a zero-filled pixel
    /// tensor, though the load-time filter makes that arm unreachable in
    /// practice.
    pub fn get(&self, index: usize) -> Result<TokenizedExample> {
        let record = self.records.get(index).ok_or_else(|| {
            CaptrainError::InvalidArgument(format!(
                "index {} out of range for dataset of {} records",
                index,
                self.records.len()
            ))
        })?;

        let formatted = self.template.apply(&record.conversations, self.masking)?;

        let mut input_ids = self.tokenizer.encode_with_special_tokens(&formatted.text)?;
        let eos = self.tokenizer.eos_token_id().ok_or_else(|| {
            CaptrainError::Tokenizer("tokenizer defines no end-of-sequence token".to_string())
        })?;
        input_ids.push(eos);

        let mut labels: Vec<i64> = input_ids.iter().map(|&id| id as i64).collect();
        let prompt_len = self
            .tokenizer
            .encode_with_special_tokens(&formatted.prompt)?
            .len();
        for label in labels.iter_mut().take(prompt_len) {
            *label = IGNORE_INDEX;
        }

        let image = match &record.image {
            Some(relative) => {
                let path = self.image_root.join(relative);
                self.image_processor.preprocess(&path).inspect_err(|_| {
                    tracing::error!(image = %path.display(), index, "failed to preprocess image");
                })?
            }
            None => self.image_processor.zero_image()?,
        };

        Ok(TokenizedExample {
            input_ids,
            labels,
            image,
        })
    }

    /// Tokenize and preprocess a batch of records by index.
    pub fn get_batch(&self, indices: &[usize]) -> Result<Vec<TokenizedExample>> {
        indices.iter().map(|&i| self.get(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_records_without_image_are_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 3, true);

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        assert_eq!(dataset.len(), 3);
        assert!(!dataset.is_empty());
    }

    #[test]
    fn test_get_blank_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 2, false);

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        let example = dataset.get(0).unwrap();

        // Caption token plus appended EOS.
        assert_eq!(example.input_ids.len(), 2);
        assert_eq!(example.labels.len(), example.input_ids.len());
        assert_eq!(*example.input_ids.last().unwrap(), fixtures::EOS_ID);

        // Blanked prompt means nothing is masked.
        assert!(example.labels.iter().all(|&l| l != IGNORE_INDEX));
        assert_eq!(example.image.dims(), &[3, 8, 8]);
    }

    #[test]
    fn test_get_mask_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 2, false);

        let dataset = fixtures::dataset(&config, PromptMasking::MaskPrompt);
        let example = dataset.get(0).unwrap();

        // The instruction is a single token; exactly that prefix is masked.
        assert_eq!(example.labels[0], IGNORE_INDEX);
        assert!(example.labels[1..].iter().all(|&l| l != IGNORE_INDEX));
        assert_eq!(example.labels.len(), example.input_ids.len());
    }

    #[test]
    fn test_get_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 4, false);

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        let examples = dataset.get_batch(&[0, 2, 3]).unwrap();

        assert_eq!(examples.len(), 3);
        for example in &examples {
            assert_eq!(example.labels.len(), example.input_ids.len());
        }
    }

    #[test]
    fn test_get_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 2, false);

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        assert!(dataset.get(2).is_err());
    }

    #[test]
    fn test_missing_image_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset(dir.path(), 2, false);
        std::fs::remove_file(dir.path().join("img0.png")).unwrap();

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        assert!(dataset.get(0).is_err());
        assert!(dataset.get(1).is_ok());
    }

    #[test]
    fn test_jsonl_loading() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::write_caption_dataset_jsonl(dir.path(), 3);

        let dataset = fixtures::dataset(&config, PromptMasking::BlankPrompt);
        assert_eq!(dataset.len(), 3);
        assert!(dataset.get(2).is_ok());
    }

    #[test]
    fn test_malformed_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data_file = dir.path().join("data.json");
        std::fs::write(&data_file, "{not json").unwrap();

        let config = captrain_core::DatasetConfig::new(&data_file, dir.path());
        let result = CaptionDataset::load(
            &config,
            Arc::new(fixtures::tokenizer()),
            Arc::new(fixtures::image_processor(8)),
            PlainTemplate::default(),
            PromptMasking::BlankPrompt,
        );
        assert!(result.is_err());
    }
}
