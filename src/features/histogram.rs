//! Joint RGB color histogram embedder.

use image::DynamicImage;

use super::embedder::{preprocess, Embedder, Embedding};
use crate::error::ServiceError;

const BINS_PER_CHANNEL: usize = 8;
const DIMENSION: usize = BINS_PER_CHANNEL * BINS_PER_CHANNEL * BINS_PER_CHANNEL;

/// Quantises every pixel into an 8x8x8 RGB cube and counts occupancy.
#[derive(Debug, Default, Clone, Copy)]
pub struct ColorHistogramEmbedder;

impl ColorHistogramEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn bin(value: u8) -> usize {
        value as usize * BINS_PER_CHANNEL / 256
    }
}

impl Embedder for ColorHistogramEmbedder {
    fn name(&self) -> &'static str {
        "color-histogram"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed(&self, image: &DynamicImage) -> Result<Embedding, ServiceError> {
        let rgb = preprocess(image);
        let mut counts = vec![0f32; DIMENSION];

        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            let idx = (Self::bin(r) * BINS_PER_CHANNEL + Self::bin(g)) * BINS_PER_CHANNEL
                + Self::bin(b);
            counts[idx] += 1.0;
        }

        Ok(Embedding::normalized(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn solid(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb(color)))
    }

    #[test]
    fn test_bin_edges() {
        assert_eq!(ColorHistogramEmbedder::bin(0), 0);
        assert_eq!(ColorHistogramEmbedder::bin(31), 0);
        assert_eq!(ColorHistogramEmbedder::bin(32), 1);
        assert_eq!(ColorHistogramEmbedder::bin(255), 7);
    }

    #[test]
    fn test_identical_images_score_one() {
        let embedder = ColorHistogramEmbedder::new();
        let a = embedder.embed(&solid([76, 175, 80])).unwrap();
        let b = embedder.embed(&solid([76, 175, 80])).unwrap();
        assert_eq!(a.dimension(), 512);
        assert!((a.dot(&b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_disjoint_colors_score_zero() {
        let embedder = ColorHistogramEmbedder::new();
        let green = embedder.embed(&solid([0, 255, 0])).unwrap();
        let red = embedder.embed(&solid([255, 0, 0])).unwrap();
        assert!(green.dot(&red).abs() < 1e-6);
    }

    #[test]
    fn test_partial_overlap_is_between_bounds() {
        let embedder = ColorHistogramEmbedder::new();
        let mut mixed = RgbImage::from_pixel(64, 64, Rgb([0, 0, 255]));
        for y in 0..32 {
            for x in 0..64 {
                mixed.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let mixed = embedder.embed(&DynamicImage::ImageRgb8(mixed)).unwrap();
        let blue = embedder.embed(&solid([0, 0, 255])).unwrap();

        let sim = mixed.dot(&blue);
        assert!(sim > 0.1 && sim < 0.95, "similarity was {}", sim);
    }
}
