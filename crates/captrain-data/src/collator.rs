//! Batch collation.
//!
//! Reconciles variable-length tokenized examples with a fixed batch tensor
//! shape: right-pad to the batch maximum, pad on up to the target length,
//! truncate to the model's maximum, and derive the attention mask from the
//! final token grid.

use crate::conversation::IGNORE_INDEX;
use crate::dataset::TokenizedExample;
use candle_core::{Device, Tensor};
use captrain_core::{CaptrainError, Result};

/// Pixel tensors of a collated batch.
#[derive(Debug, Clone)]
pub enum ImageBatch {
    /// All examples shared one image shape; stacked to `[N, 3, H, W]`.
    Stacked(Tensor),
    /// Image shapes differed across the batch; left unstacked for the
    /// caller to reconcile.
    List(Vec<Tensor>),
}

impl ImageBatch {
    /// The stacked tensor, if shapes allowed stacking.
    pub fn stacked(&self) -> Option<&Tensor> {
        match self {
            Self::Stacked(tensor) => Some(tensor),
            Self::List(_) => None,
        }
    }
}

/// A collated batch ready for the model.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Input token IDs `[batch_size, seq_len]`.
    pub input_ids: Tensor,
    /// Labels for loss computation `[batch_size, seq_len]`.
    pub labels: Tensor,
    /// Attention mask `[batch_size, seq_len]`, 1 where not padding.
    pub attention_mask: Tensor,
    /// Pixel tensors.
    pub images: ImageBatch,
    /// Number of examples in this batch.
    pub batch_size: usize,
    /// Final sequence length.
    pub seq_len: usize,
}

/// Collator for assembling batches from tokenized examples.
#[derive(Debug, Clone)]
pub struct Collator {
    /// Padding token ID.
    pub pad_token_id: u32,
    /// Target batch sequence length.
    pub target_length: usize,
    /// Maximum sequence length the model supports.
    pub model_max_length: usize,
    device: Device,
}

impl Collator {
    /// Create a new collator.
    pub fn new(pad_token_id: u32, target_length: usize, model_max_length: usize) -> Result<Self> {
        if target_length == 0 {
            return Err(CaptrainError::InvalidArgument(
                "target length must be positive".to_string(),
            ));
        }
        Ok(Self {
            pad_token_id,
            target_length,
            model_max_length,
            device: Device::Cpu,
        })
    }

    /// Place batch tensors on the given device.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Collate examples into a batch.
    ///
    /// Sequences are right-padded to the batch maximum (pad id for input
    /// ids, [`IGNORE_INDEX`] for labels), padded further to the target
    /// length when shorter, then truncated to
    /// `min(target_length, model_max_length)`. The attention mask marks
    /// positions whose final token id differs from the pad id.
    pub fn collate(&self, examples: &[TokenizedExample]) -> Result<Batch> {
        if examples.is_empty() {
            return Err(CaptrainError::InvalidArgument(
                "cannot collate an empty batch".to_string(),
            ));
        }
        for example in examples {
            if example.labels.len() != example.input_ids.len() {
                return Err(CaptrainError::ShapeMismatch {
                    expected: vec![example.input_ids.len()],
                    actual: vec![example.labels.len()],
                });
            }
        }

        let batch_size = examples.len();
        let batch_max = examples
            .iter()
            .map(|e| e.input_ids.len())
            .max()
            .unwrap_or(0);
        let padded_len = batch_max.max(self.target_length);
        let seq_len = padded_len.min(self.target_length.min(self.model_max_length));

        let mut ids_flat = Vec::with_capacity(batch_size * seq_len);
        let mut labels_flat = Vec::with_capacity(batch_size * seq_len);
        for example in examples {
            let len = example.input_ids.len().min(seq_len);
            ids_flat.extend(example.input_ids[..len].iter().copied());
            ids_flat.extend(std::iter::repeat(self.pad_token_id).take(seq_len - len));

            labels_flat.extend(example.labels[..len].iter().copied());
            labels_flat.extend(std::iter::repeat(IGNORE_INDEX).take(seq_len - len));
        }

        let input_ids = Tensor::from_vec(ids_flat, (batch_size, seq_len), &self.device)
            .map_err(|e| CaptrainError::Tensor(e.to_string()))?;
        let labels = Tensor::from_vec(labels_flat, (batch_size, seq_len), &self.device)
            .map_err(|e| CaptrainError::Tensor(e.to_string()))?;
        let attention_mask = input_ids
            .ne(self.pad_token_id)
            .map_err(|e| CaptrainError::Tensor(e.to_string()))?;

        let images: Vec<Tensor> = examples.iter().map(|e| e.image.clone()).collect();
        let uniform_shape = images.windows(2).all(|pair| pair[0].dims() == pair[1].dims());
        let images = if uniform_shape {
            ImageBatch::Stacked(
                Tensor::stack(&images, 0).map_err(|e| CaptrainError::Tensor(e.to_string()))?,
            )
        } else {
            tracing::warn!(
                batch_size,
                "image shapes differ across batch, returning unstacked list"
            );
            ImageBatch::List(images)
        };

        Ok(Batch {
            input_ids,
            labels,
            attention_mask,
            images,
            batch_size,
            seq_len,
        })
    }
}
