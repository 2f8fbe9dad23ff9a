//! Sample dataset generator for local testing.

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{info, warn};

use crate::engine::VisionEngine;
use crate::error::ServiceError;

const SAMPLE_SIZE: u32 = 224;
const SQUARE_START: u32 = 50;
const SQUARE_END: u32 = 150;
/// Offset applied to the square of the second variant in each category.
const VARIANT_SHIFT: u32 = 24;
const VARIANTS: u32 = 2;
const JPEG_QUALITY: u8 = 90;

/// Sample categories and their fill colours.
pub const CATEGORIES: [(&str, [u8; 3]); 5] = [
    ("nature", [76, 175, 80]),
    ("buildings", [33, 150, 243]),
    ("animals", [255, 152, 0]),
    ("objects", [156, 39, 176]),
    ("people", [255, 87, 34]),
];

/// Render one sample: a flat colour field with a white square.
pub fn sample_image(color: [u8; 3], variant: u32) -> RgbImage {
    let offset = variant * VARIANT_SHIFT;
    let (start, end) = (SQUARE_START + offset, SQUARE_END + offset);

    RgbImage::from_fn(SAMPLE_SIZE, SAMPLE_SIZE, |x, y| {
        if (start..end).contains(&x) && (start..end).contains(&y) {
            Rgb([255, 255, 255])
        } else {
            Rgb(color)
        }
    })
}

fn encode_jpeg(image: RgbImage) -> Result<Vec<u8>, ServiceError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    DynamicImage::ImageRgb8(image)
        .write_with_encoder(encoder)
        .map_err(|e| ServiceError::Internal(format!("JPEG encoding failed: {}", e)))?;
    Ok(buf)
}

/// Generate and index every sample image. Returns how many were indexed.
///
/// A sample that fails to index is logged and skipped.
pub async fn generate_samples(engine: &VisionEngine) -> Result<usize, ServiceError> {
    let mut indexed = 0;

    for (category, color) in CATEGORIES {
        for variant in 0..VARIANTS {
            let name = format!("{}_{}.jpg", category, variant);
            let bytes = encode_jpeg(sample_image(color, variant))?;

            match engine.index_named(&name, bytes).await {
                Ok(_) => indexed += 1,
                Err(e) => warn!(error = %e, name = %name, "Failed to index sample"),
            }
        }
    }

    info!(indexed, "Sample dataset indexed");
    Ok(indexed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{ColorHistogramEmbedder, Embedder};
    use crate::index::MemoryIndex;
    use crate::storage::ImageStore;
    use std::sync::Arc;

    #[test]
    fn test_sample_square_position() {
        let base = sample_image([76, 175, 80], 0);
        assert_eq!(base.dimensions(), (224, 224));
        assert_eq!(base.get_pixel(49, 49), &Rgb([76, 175, 80]));
        assert_eq!(base.get_pixel(50, 50), &Rgb([255, 255, 255]));
        assert_eq!(base.get_pixel(149, 149), &Rgb([255, 255, 255]));
        assert_eq!(base.get_pixel(150, 150), &Rgb([76, 175, 80]));

        let shifted = sample_image([76, 175, 80], 1);
        assert_eq!(shifted.get_pixel(50, 50), &Rgb([76, 175, 80]));
        assert_eq!(shifted.get_pixel(173, 173), &Rgb([255, 255, 255]));
        assert_eq!(shifted.get_pixel(174, 174), &Rgb([76, 175, 80]));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg() {
        let bytes = encode_jpeg(sample_image([33, 150, 243], 0)).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(
            image::guess_format(&bytes).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[tokio::test]
    async fn test_generate_samples_indexes_all() {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(ColorHistogramEmbedder::new());
        let index = Arc::new(MemoryIndex::new(embedder.name(), embedder.dimension()));
        let engine =
            VisionEngine::new(embedder, index, ImageStore::new(dir.path().join("images")), 5, 50)
                .unwrap();

        let count = generate_samples(&engine).await.unwrap();
        assert_eq!(count, 10);

        let names: Vec<String> = engine.list().await.into_iter().map(|s| s.filename).collect();
        assert!(names.contains(&"nature_0.jpg".to_string()));
        assert!(names.contains(&"people_1.jpg".to_string()));

        // Re-seeding replaces rather than duplicates
        generate_samples(&engine).await.unwrap();
        assert_eq!(engine.status().await.total_images, 10);

        let outcome = engine
            .search(encode_jpeg(sample_image([255, 152, 0], 0)).unwrap(), Some(2))
            .await
            .unwrap();
        assert!(outcome.hits[0].filename.starts_with("animals_"));
    }
}
