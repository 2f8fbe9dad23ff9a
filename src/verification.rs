//! Image authenticity fingerprints.
//!
//! Provides pixel-level verification alongside embedding similarity: a
//! content digest, a DCT perceptual hash compared by Hamming distance, and an
//! error level analysis score.

use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ServiceError;

const HASH_SIZE: usize = 8;
const DCT_SIZE: usize = HASH_SIZE * 4;
const ELA_QUALITY: u8 = 90;

/// Hex-encoded SHA-256 of the raw file bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 64-bit DCT perceptual hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits.
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        hamming(self.0, other.0)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u64::from_str_radix(s, 16).map(PerceptualHash)
    }
}

impl Serialize for PerceptualHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PerceptualHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// 1-D DCT-II (unnormalised), matching the convention used for pHash.
fn dct_1d(input: &[f32], output: &mut [f32]) {
    let n = input.len();
    for (k, out) in output.iter_mut().enumerate() {
        *out = input
            .iter()
            .enumerate()
            .map(|(i, x)| x * (PI * (2 * i + 1) as f32 * k as f32 / (2 * n) as f32).cos())
            .sum::<f32>()
            * 2.0;
    }
}

/// Compute the perceptual hash of an image.
pub fn perceptual_hash(image: &DynamicImage) -> PerceptualHash {
    let gray = imageops::grayscale(image);
    let small = imageops::resize(&gray, DCT_SIZE as u32, DCT_SIZE as u32, FilterType::Lanczos3);

    let pixels: Vec<f32> = small.pixels().map(|p| p.0[0] as f32).collect();

    // Columns first, then rows.
    let mut cols = vec![0f32; DCT_SIZE * DCT_SIZE];
    let mut column = vec![0f32; DCT_SIZE];
    let mut transformed = vec![0f32; DCT_SIZE];
    for x in 0..DCT_SIZE {
        for y in 0..DCT_SIZE {
            column[y] = pixels[y * DCT_SIZE + x];
        }
        dct_1d(&column, &mut transformed);
        for y in 0..DCT_SIZE {
            cols[y * DCT_SIZE + x] = transformed[y];
        }
    }

    let mut low = Vec::with_capacity(HASH_SIZE * HASH_SIZE);
    for y in 0..HASH_SIZE {
        let row = &cols[y * DCT_SIZE..(y + 1) * DCT_SIZE];
        dct_1d(row, &mut transformed);
        low.extend_from_slice(&transformed[..HASH_SIZE]);
    }

    let median = median(&low);
    let bits = low
        .iter()
        .fold(0u64, |acc, v| (acc << 1) | u64::from(*v > median));
    PerceptualHash(bits)
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Error level analysis: mean absolute per-channel difference (0-255)
/// between the image and a JPEG re-compression of it.
pub fn error_level_score(image: &DynamicImage) -> Result<f32, ServiceError> {
    let original = image.to_rgb8();

    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, ELA_QUALITY);
    DynamicImage::ImageRgb8(original.clone())
        .write_with_encoder(encoder)
        .map_err(|e| ServiceError::Internal(format!("ELA encode failed: {}", e)))?;

    let recompressed = image::load_from_memory_with_format(&buf, ImageFormat::Jpeg)
        .map_err(|e| ServiceError::Internal(format!("ELA decode failed: {}", e)))?
        .to_rgb8();

    let total: u64 = original
        .as_raw()
        .iter()
        .zip(recompressed.as_raw().iter())
        .map(|(a, b)| u64::from(a.abs_diff(*b)))
        .sum();

    let samples = original.as_raw().len().max(1);
    Ok(total as f32 / samples as f32)
}

/// Outcome of comparing two perceptual hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Identical,
    HighSimilarity,
    PotentialManipulation,
    Different,
}

impl Verdict {
    pub fn from_distance(distance: u32) -> Self {
        match distance {
            0 => Verdict::Identical,
            1..=8 => Verdict::HighSimilarity,
            9..=20 => Verdict::PotentialManipulation,
            _ => Verdict::Different,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Identical => "Authentic",
            Verdict::HighSimilarity => "High Similarity",
            Verdict::PotentialManipulation => "Potential Manipulation",
            Verdict::Different => "Different Image",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Verdict::Identical => "green",
            Verdict::HighSimilarity => "orange",
            Verdict::PotentialManipulation => "red",
            Verdict::Different => "gray",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Verdict::Identical => "Perfect match (identical file or exact copy).",
            Verdict::HighSimilarity => "High similarity (re-used, resized, or re-compressed).",
            Verdict::PotentialManipulation => {
                "Potential manipulation (cropping, filtering, or minor edit detected)."
            }
            Verdict::Different => {
                "Visual difference is high (likely a different image or major edit)."
            }
        }
    }
}

/// Fingerprint stored with every indexed image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub sha256: String,
    pub phash: PerceptualHash,
    pub manipulation_score: f32,
    pub width: u32,
    pub height: u32,
    /// Detected container format (e.g. "png", "jpeg"), if recognised.
    pub format: Option<String>,
}

/// Compute the full fingerprint of an uploaded image.
pub fn fingerprint(bytes: &[u8], image: &DynamicImage) -> Result<Fingerprint, ServiceError> {
    let format = image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().map(|ext| ext.to_string()));

    Ok(Fingerprint {
        sha256: sha256_hex(bytes),
        phash: perceptual_hash(image),
        manipulation_score: error_level_score(image)?,
        width: image.width(),
        height: image.height(),
        format,
    })
}
