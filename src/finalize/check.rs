use std::path::Path;

use crate::common::{Result, VaultError};
use crate::container::{DatasetFile, IMAGE_OUTPUT_COLUMN};
use crate::control::ResultStore;

/// Percentage of predictions that hit a positive output slot.
///
/// `result_json` is an array of predicted class indices, one per image row
/// starting at the first. An empty array scores 0.
pub fn correctness(container: &DatasetFile, result_json: &[u8]) -> Result<f32> {
    let image = container
        .header()
        .as_image()
        .ok_or_else(|| VaultError::parse("correctness check needs an image container"))?;
    let predictions: Vec<u64> = serde_json::from_slice(result_json)?;
    if predictions.is_empty() {
        return Ok(0.0);
    }
    if predictions.len() as u64 > image.image_count {
        return Err(VaultError::OutOfBounds {
            offset: 0,
            len: predictions.len() as u64,
            limit: image.image_count,
        });
    }

    let outputs = container.column(IMAGE_OUTPUT_COLUMN)?;
    let width = image.output_count;
    let mut correct = 0u64;
    for (row, &class) in predictions.iter().enumerate() {
        if class >= width {
            return Err(VaultError::OutOfBounds {
                offset: class,
                len: 1,
                limit: width,
            });
        }
        if outputs[(row as u64 * width + class) as usize] > 0.0 {
            correct += 1;
        }
    }

    Ok(100.0 / predictions.len() as f32 * correct as f32)
}

/// Scores the stored result `result_id` against the container at `location`.
pub fn check_result(results: &ResultStore, result_id: &str, location: impl AsRef<Path>) -> Result<f32> {
    let result = results.read(result_id)?;
    let container = DatasetFile::open(location)?;
    correctness(&container, &result)
}
