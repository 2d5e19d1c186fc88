//! Shared test fixtures: a tiny word-level tokenizer and on-disk caption
//! datasets with synthetic images.

use crate::conversation::{PlainTemplate, PromptMasking};
use crate::dataset::CaptionDataset;
use crate::image_processing::{ClipImageProcessor, ClipImageProcessorConfig};
use crate::tokenizer::Tokenizer;
use captrain_core::DatasetConfig;
use image::{Rgb, RgbImage};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// Pad token id in the fixture vocabulary.
pub(crate) const PAD_ID: u32 = 1;
/// EOS token id in the fixture vocabulary.
pub(crate) const EOS_ID: u32 = 2;

/// Word-level tokenizer over a tiny vocabulary. Whitespace splitting, no
/// added special tokens, so encoding the empty string yields no ids.
pub(crate) const TOKENIZER_JSON: &str = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {
      "<unk>": 0,
      "<pad>": 1,
      "</s>": 2,
      "a": 3,
      "cat": 4,
      "dog": 5,
      "describe": 6,
      "photo": 7,
      "w0": 8,
      "w1": 9,
      "w2": 10,
      "w3": 11,
      "w4": 12,
      "w5": 13,
      "w6": 14,
      "w7": 15,
      "w8": 16,
      "w9": 17
    },
    "unk_token": "<unk>"
  }
}"#;

pub(crate) fn tokenizer() -> Tokenizer {
    Tokenizer::from_bytes(TOKENIZER_JSON.as_bytes()).unwrap()
}

pub(crate) fn image_processor(size: u32) -> ClipImageProcessor {
    ClipImageProcessor::new(ClipImageProcessorConfig {
        size: (size, size),
        ..Default::default()
    })
    .unwrap()
}

fn record(index: usize) -> serde_json::Value {
    json!({
        "id": format!("rec{index}"),
        "conversations": [
            { "from": "human", "value": "<image>\ndescribe" },
            { "from": "gpt", "value": format!("w{index}") }
        ],
        "image": format!("img{index}.png")
    })
}

fn write_images(dir: &Path, count: usize) {
    for i in 0..count {
        let img = RgbImage::from_pixel(6, 4, Rgb([(10 + i * 20) as u8, 50, 25]));
        img.save(dir.join(format!("img{i}.png"))).unwrap();
    }
}

/// Write `count` image-bearing records (captions `w0`, `w1`, ...) as a JSON
/// array, plus an imageless record when requested. Returns a dataset config
/// rooted at `dir`.
pub(crate) fn write_caption_dataset(
    dir: &Path,
    count: usize,
    include_imageless: bool,
) -> DatasetConfig {
    assert!(count <= 10, "fixture vocabulary covers 10 captions");
    write_images(dir, count);

    let mut records: Vec<serde_json::Value> = (0..count).map(record).collect();
    if include_imageless {
        records.push(json!({
            "id": "no-image",
            "conversations": [
                { "from": "human", "value": "describe" },
                { "from": "gpt", "value": "a dog" }
            ]
        }));
    }

    let data_file = dir.join("data.json");
    std::fs::write(&data_file, serde_json::to_string(&records).unwrap()).unwrap();
    DatasetConfig::new(data_file, dir)
}

/// JSONL variant of [`write_caption_dataset`].
pub(crate) fn write_caption_dataset_jsonl(dir: &Path, count: usize) -> DatasetConfig {
    assert!(count <= 10, "fixture vocabulary covers 10 captions");
    write_images(dir, count);

    let lines: Vec<String> = (0..count).map(|i| record(i).to_string()).collect();
    let data_file = dir.join("data.jsonl");
    std::fs::write(&data_file, lines.join("\n")).unwrap();
    DatasetConfig::new(data_file, dir)
}

/// Load a dataset over the fixture tokenizer and an 8x8 image processor.
pub(crate) fn dataset(config: &DatasetConfig, masking: PromptMasking) -> CaptionDataset {
    CaptionDataset::load(
        config,
        Arc::new(tokenizer()),
        Arc::new(image_processor(8)),
        PlainTemplate::default(),
        masking,
    )
    .unwrap()
}
