//! Spatial color layout embedder.
//!
//! Concatenates per-cell color statistics over a 4x4 grid with a 16x16
//! grayscale thumbnail, so images with the same palette but a different
//! arrangement are told apart.

use image::imageops::{self, FilterType};
use image::DynamicImage;

use super::embedder::{preprocess, Embedder, Embedding, INPUT_SIZE};
use crate::error::ServiceError;

const GRID: u32 = 4;
const THUMB: u32 = 16;
const CELL_FEATURES: usize = 4;
const DIMENSION: usize = (GRID * GRID) as usize * CELL_FEATURES + (THUMB * THUMB) as usize;

#[derive(Debug, Default, Clone, Copy)]
pub struct SpatialColorEmbedder;

impl SpatialColorEmbedder {
    pub fn new() -> Self {
        Self
    }
}

fn luma(rgb: [u8; 3]) -> f32 {
    (0.299 * rgb[0] as f32 + 0.587 * rgb[1] as f32 + 0.114 * rgb[2] as f32) / 255.0
}

impl Embedder for SpatialColorEmbedder {
    fn name(&self) -> &'static str {
        "spatial-color"
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed(&self, image: &DynamicImage) -> Result<Embedding, ServiceError> {
        let rgb = preprocess(image);
        let cell = INPUT_SIZE / GRID;
        let mut features = Vec::with_capacity(DIMENSION);

        for gy in 0..GRID {
            for gx in 0..GRID {
                let mut sum = [0f32; 3];
                let mut lumas = Vec::with_capacity((cell * cell) as usize);

                for y in gy * cell..(gy + 1) * cell {
                    for x in gx * cell..(gx + 1) * cell {
                        let p = rgb.get_pixel(x, y).0;
                        for c in 0..3 {
                            sum[c] += p[c] as f32 / 255.0;
                        }
                        lumas.push(luma(p));
                    }
                }

                let n = lumas.len() as f32;
                let mean_luma = lumas.iter().sum::<f32>() / n;
                let variance = lumas.iter().map(|l| (l - mean_luma).powi(2)).sum::<f32>() / n;

                features.extend(sum.iter().map(|s| s / n));
                features.push(variance.sqrt());
            }
        }

        let gray = imageops::grayscale(&rgb);
        let thumb = imageops::resize(&gray, THUMB, THUMB, FilterType::Triangle);
        features.extend(thumb.pixels().map(|p| p.0[0] as f32 / 255.0));

        debug_assert_eq!(features.len(), DIMENSION);
        Ok(Embedding::normalized(features))
    }
}
