//! VisionCOP image indexing and similarity search service library.
//!
//! This library exposes the core modules for integration testing while
//! keeping the actual binary entry point in main.rs.

pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod http;
pub mod index;
pub mod metrics;
pub mod seed;
pub mod storage;
pub mod verification;
