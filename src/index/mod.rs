//! Image index holding embeddings and fingerprints of stored images.
//!
//! This module provides an `ImageIndex` trait and implementations:
//! - `MemoryIndex` - Keeps records in memory only (ephemeral mode and tests)
//! - `PersistentIndex` - Memory index backed by an on-disk JSON snapshot

mod catalog;
mod memory;
mod persistent;

pub use catalog::{ImageIndex, ImageRecord, ImageSummary, SearchHit};
pub use memory::MemoryIndex;
pub use persistent::{IndexSnapshot, PersistentIndex};
