//! DataLoader for iterating training batches.

use crate::collator::{Batch, Collator};
use crate::conversation::{PlainTemplate, PromptMasking};
use crate::dataset::CaptionDataset;
use crate::image_processing::{ClipImageProcessor, ClipImageProcessorConfig};
use crate::tokenizer::Tokenizer;
use captrain_core::{CaptrainError, DatasetConfig, Result, SequenceConfig};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

/// Configuration for the DataLoader.
#[derive(Debug, Clone)]
pub struct DataLoaderConfig {
    /// Batch size.
    pub batch_size: usize,
    /// Whether to shuffle the data.
    pub shuffle: bool,
    /// Random seed for shuffling.
    pub seed: u64,
    /// Whether to drop the last incomplete batch.
    pub drop_last: bool,
    /// Number of data-parallel replicas.
    pub world_size: usize,
    /// Rank of this replica.
    pub rank: usize,
}

impl Default for DataLoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            shuffle: true,
            seed: 42,
            drop_last: false,
            world_size: 1,
            rank: 0,
        }
    }
}

/// DataLoader that yields collated batches from a caption dataset.
///
/// Holds an index permutation over the dataset. With `world_size > 1` the
/// permutation is wrap-padded to a multiple of the world size and
/// rank-strided, so every replica sees the same number of equally sized,
/// covering shards.
pub struct DataLoader {
    dataset: CaptionDataset,
    collator: Collator,
    config: DataLoaderConfig,
    indices: Vec<usize>,
    position: usize,
}

impl DataLoader {
    /// Create a new DataLoader.
    pub fn new(
        dataset: CaptionDataset,
        collator: Collator,
        config: DataLoaderConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(CaptrainError::InvalidArgument(
                "batch size must be positive".to_string(),
            ));
        }
        if config.world_size == 0 {
            return Err(CaptrainError::InvalidArgument(
                "world size must be positive".to_string(),
            ));
        }
        if config.rank >= config.world_size {
            return Err(CaptrainError::InvalidArgument(format!(
                "rank {} out of range for world size {}",
                config.rank, config.world_size
            )));
        }

        let indices = Self::build_indices(dataset.len(), &config, config.seed);
        Ok(Self {
            dataset,
            collator,
            config,
            indices,
            position: 0,
        })
    }

    fn build_indices(n: usize, config: &DataLoaderConfig, seed: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..n).collect();

        if config.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            indices.shuffle(&mut rng);
        }

        if config.world_size > 1 && n > 0 {
            // Wrap-pad so every rank gets a shard of the same size.
            let total = n.div_ceil(config.world_size) * config.world_size;
            let wrapped: Vec<usize> = indices.iter().copied().take(total - n).collect();
            indices.extend(wrapped);
            indices = indices
                .into_iter()
                .skip(config.rank)
                .step_by(config.world_size)
                .collect();
        }

        indices
    }

    /// Reset the loader for a new epoch, optionally re-seeding the
    /// shuffle.
    pub fn reset(&mut self, new_seed: Option<u64>) {
        self.position = 0;
        let seed = new_seed.unwrap_or(self.config.seed);
        self.indices = Self::build_indices(self.dataset.len(), &self.config, seed);
    }

    /// Get the number of batches this rank will see.
    pub fn num_batches(&self) -> usize {
        let n = self.indices.len();
        if self.config.drop_last {
            n / self.config.batch_size
        } else {
            n.div_ceil(self.config.batch_size)
        }
    }

    /// Get the number of samples in this rank's shard.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the loader is empty.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Get the next batch.
    ///
    /// Returns `None` at the end of the epoch. Tokenization, image
    /// preprocessing, and collation failures surface as errors and abort
    /// the batch.
    pub fn next_batch(&mut self) -> Option<Result<Batch>> {
        if self.position >= self.indices.len() {
            return None;
        }

        let batch_end = (self.position + self.config.batch_size).min(self.indices.len());
        let batch_indices = &self.indices[self.position..batch_end];

        if self.config.drop_last && batch_indices.len() < self.config.batch_size {
            return None;
        }

        let examples = match self.dataset.get_batch(batch_indices) {
            Ok(examples) => examples,
            Err(e) => return Some(Err(e)),
        };
        self.position = batch_end;

        Some(self.collator.collate(&examples))
    }
}

impl Iterator for DataLoader {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_batch()
    }
}

/// Build a ready-to-iterate loader over a captioning dataset.
///
/// Wires the CLIP image processor, the plain conversation template, the
/// collator, and the loader together from configuration. The collator pads
/// with the tokenizer's pad token and truncates to its maximum length.
pub fn build_caption_loader(
    dataset_config: &DatasetConfig,
    sequence_config: &SequenceConfig,
    loader_config: DataLoaderConfig,
    tokenizer: Arc<Tokenizer>,
    masking: PromptMasking,
) -> Result<DataLoader> {
    let image_config = ClipImageProcessorConfig {
        pad_to_square: dataset_config.pad_to_square,
        ..Default::default()
    };
    let image_processor = Arc::new(ClipImageProcessor::new(image_config)?);

    let template = PlainTemplate::new(&sequence_config.separator);
    let dataset = CaptionDataset::load(
        dataset_config,
        Arc::clone(&tokenizer),
        image_processor,
        template,
        masking,
    )?;

    let pad_token_id = tokenizer.pad_token_id().ok_or_else(|| {
        CaptrainError::Tokenizer("tokenizer defines no padding token".to_string())
    })?;
    let collator = Collator::new(
        pad_token_id,
        sequence_config.target_length,
        tokenizer.model_max_length(),
    )?;

    DataLoader::new(dataset, collator, loader_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn loader_with(n: usize, config: DataLoaderConfig) -> (tempfile::TempDir, DataLoader) {
        let dir = tempfile::tempdir().unwrap();
        let dataset_config = fixtures::write_caption_dataset(dir.path(), n, false);
        let dataset = fixtures::dataset(&dataset_config, PromptMasking::BlankPrompt);
        let collator = Collator::new(fixtures::PAD_ID, 8, 2048).unwrap();
        let loader = DataLoader::new(dataset, collator, config).unwrap();
        (dir, loader)
    }

    #[test]
    fn test_batch_counts() {
        let (_dir, loader) = loader_with(
            10,
            DataLoaderConfig {
                batch_size: 3,
                shuffle: false,
                ..Default::default()
            },
        );
        assert_eq!(loader.len(), 10);
        assert_eq!(loader.num_batches(), 4);
    }

    #[test]
    fn test_drop_last() {
        let (_dir, mut loader) = loader_with(
            10,
            DataLoaderConfig {
                batch_size: 3,
                shuffle: false,
                drop_last: true,
                ..Default::default()
            },
        );
        assert_eq!(loader.num_batches(), 3);

        let mut seen = 0;
        while let Some(batch) = loader.next_batch() {
            let batch = batch.unwrap();
            assert_eq!(batch.batch_size, 3);
            seen += 1;
        }
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_batches_have_expected_shapes() {
        let (_dir, mut loader) = loader_with(
            5,
            DataLoaderConfig {
                batch_size: 2,
                shuffle: false,
                ..Default::default()
            },
        );

        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.input_ids.dims(), &[2, 8]);
        assert_eq!(batch.labels.dims(), &[2, 8]);
        assert_eq!(batch.attention_mask.dims(), &[2, 8]);
        assert!(batch.images.stacked().is_some());

        // Last batch is the leftover single example.
        let batches: Vec<_> = loader.collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1].as_ref().unwrap().batch_size, 1);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let config = DataLoaderConfig {
            batch_size: 10,
            shuffle: true,
            seed: 7,
            ..Default::default()
        };
        let (_dir_a, mut a) = loader_with(10, config.clone());
        let (_dir_b, mut b) = loader_with(10, config);

        let ids_a = a
            .next_batch()
            .unwrap()
            .unwrap()
            .input_ids
            .to_vec2::<u32>()
            .unwrap();
        let ids_b = b
            .next_batch()
            .unwrap()
            .unwrap()
            .input_ids
            .to_vec2::<u32>()
            .unwrap();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_reset_reshuffles() {
        let (_dir, mut loader) = loader_with(
            10,
            DataLoaderConfig {
                batch_size: 10,
                shuffle: true,
                seed: 7,
                ..Default::default()
            },
        );

        let first = loader
            .next_batch()
            .unwrap()
            .unwrap()
            .input_ids
            .to_vec2::<u32>()
            .unwrap();

        loader.reset(Some(8));
        let second = loader
            .next_batch()
            .unwrap()
            .unwrap()
            .input_ids
            .to_vec2::<u32>()
            .unwrap();
        assert_ne!(first, second);

        loader.reset(Some(7));
        let third = loader
            .next_batch()
            .unwrap()
            .unwrap()
            .input_ids
            .to_vec2::<u32>()
            .unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_distributed_shards_cover_dataset() {
        let world_size = 4;
        let mut caption_ids = Vec::new();

        for rank in 0..world_size {
            let (_dir, mut loader) = loader_with(
                10,
                DataLoaderConfig {
                    batch_size: 3,
                    shuffle: false,
                    world_size,
                    rank,
                    ..Default::default()
                },
            );
            // 10 samples wrap-padded to 12, so each rank holds 3.
            assert_eq!(loader.len(), 3);

            while let Some(batch) = loader.next_batch() {
                let ids = batch.unwrap().input_ids.to_vec2::<u32>().unwrap();
                caption_ids.extend(ids.into_iter().map(|row| row[0]));
            }
        }

        // The union of all shards covers every caption token, with two
        // wrapped duplicates.
        assert_eq!(caption_ids.len(), 12);
        let unique: std::collections::BTreeSet<u32> = caption_ids.iter().copied().collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_invalid_rank_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_config = fixtures::write_caption_dataset(dir.path(), 2, false);
        let dataset = fixtures::dataset(&dataset_config, PromptMasking::BlankPrompt);
        let collator = Collator::new(fixtures::PAD_ID, 8, 2048).unwrap();

        let result = DataLoader::new(
            dataset,
            collator,
            DataLoaderConfig {
                world_size: 2,
                rank: 2,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_build_caption_loader() {
        let dir = tempfile::tempdir().unwrap();
        let dataset_config = fixtures::write_caption_dataset(dir.path(), 4, true);
        let tokenizer = Arc::new(fixtures::tokenizer().with_model_max_length(77));

        let mut loader = build_caption_loader(
            &dataset_config,
            &SequenceConfig {
                target_length: 16,
                ..Default::default()
            },
            DataLoaderConfig {
                batch_size: 2,
                shuffle: false,
                ..Default::default()
            },
            tokenizer,
            PromptMasking::BlankPrompt,
        )
        .unwrap();

        // The imageless record is filtered at load.
        assert_eq!(loader.len(), 4);
        let batch = loader.next_batch().unwrap().unwrap();
        assert_eq!(batch.input_ids.dims(), &[2, 16]);
        assert_eq!(batch.images.stacked().unwrap().dims(), &[2, 3, 336, 336]);
    }
}
