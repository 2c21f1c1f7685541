//! IDX (MNIST) image + label files to an image container.

use std::path::Path;

use tracing::debug;

use crate::common::{ByteCursor, Result, VaultError};
use crate::container::{ContainerHeader, DatasetFile, ImageHeader};

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;
/// One output slot per digit class.
pub const OUTPUT_COUNT: u64 = 10;
/// Images buffered per `add_block` call.
pub const SEGMENT_IMAGES: usize = 10_000;

struct IdxImages<'a> {
    count: u64,
    rows: u64,
    cols: u64,
    pixels: &'a [u8],
}

fn read_images(data: &[u8]) -> Result<IdxImages<'_>> {
    let mut cursor = ByteCursor::new(data);
    let magic = cursor.read_u32_be()?;
    if magic != IMAGE_MAGIC {
        return Err(VaultError::parse(format!("idx image magic {} != {}", magic, IMAGE_MAGIC)));
    }
    let count = cursor.read_u32_be()? as u64;
    let rows = cursor.read_u32_be()? as u64;
    let cols = cursor.read_u32_be()? as u64;
    if rows == 0 || cols == 0 {
        return Err(VaultError::parse("idx images have no pixels"));
    }

    let len = count
        .checked_mul(rows * cols)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| VaultError::parse("idx image count overflows"))?;
    let pixels = cursor.read_slice(len)?;
    Ok(IdxImages {
        count,
        rows,
        cols,
        pixels,
    })
}

fn read_labels(data: &[u8], expected: u64) -> Result<&[u8]> {
    let mut cursor = ByteCursor::new(data);
    let magic = cursor.read_u32_be()?;
    if magic != LABEL_MAGIC {
        return Err(VaultError::parse(format!("idx label magic {} != {}", magic, LABEL_MAGIC)));
    }
    let count = cursor.read_u32_be()? as u64;
    if count != expected {
        return Err(VaultError::parse(format!(
            "{} labels for {} images",
            count, expected
        )));
    }

    let labels = cursor.read_slice(count as usize)?;
    if let Some(bad) = labels.iter().find(|&&l| l as u64 >= OUTPUT_COUNT) {
        return Err(VaultError::parse(format!("label {} is not a digit class", bad)));
    }
    Ok(labels)
}

/// Writes an image container at `target`: pixels scaled to `[0, 1]`, followed
/// by a one-hot label row of `OUTPUT_COUNT` values.
pub fn convert(
    target: impl AsRef<Path>,
    name: &str,
    image_data: &[u8],
    label_data: &[u8],
) -> Result<DatasetFile> {
    let images = read_images(image_data)?;
    let labels = read_labels(label_data, images.count)?;

    let header = ImageHeader::new(images.cols, images.rows, OUTPUT_COUNT, images.count);
    let file = DatasetFile::create_with(target, name, ContainerHeader::Image(header), |file| {
        let picture_size = (images.rows * images.cols) as usize;
        let row_width = picture_size + OUTPUT_COUNT as usize;
        let mut segment: Vec<f32> = Vec::with_capacity(row_width * SEGMENT_IMAGES);
        let mut pos = 0u64;
        let mut sum = 0f64;
        let mut max = 0f32;

        for (pictures, segment_labels) in images
            .pixels
            .chunks(picture_size * SEGMENT_IMAGES)
            .zip(labels.chunks(SEGMENT_IMAGES))
        {
            segment.clear();
            for (picture, &label) in pictures.chunks_exact(picture_size).zip(segment_labels) {
                for &pixel in picture {
                    let value = pixel as f32 / 255.0;
                    sum += value as f64;
                    max = max.max(value);
                    segment.push(value);
                }
                let mut one_hot = [0f32; OUTPUT_COUNT as usize];
                one_hot[label as usize] = 1.0;
                segment.extend_from_slice(&one_hot);
            }
            file.add_block(pos, &segment)?;
            pos += segment.len() as u64;
        }

        let value_count = images.count * picture_size as u64;
        if let ContainerHeader::Image(image) = file.header_mut() {
            image.max_value = max;
            image.avg_value = if value_count == 0 {
                0.0
            } else {
                (sum / value_count as f64) as f32
            };
        }
        file.update_header()
    })?;

    debug!(images = images.count, rows = images.rows, cols = images.cols, "mnist converted");
    Ok(file)
}
