//! Core of the LingoFlow bilingual reader.
//!
//! A document is ingested into aligned sentence pairs, then narrated one pair
//! at a time: source-language audio first, target-language audio second. The
//! [`engine`] module owns that playback cycle; everything else here feeds it.

pub mod audio;
pub mod cache;
pub mod cancellation;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod gateway;
pub mod ingest;
pub mod keymap;
pub mod library;
pub mod lookup;
pub mod model;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{ReaderError, ReaderResult};
