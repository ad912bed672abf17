//! Core machinery for incremental font transfer.
//!
//! An incremental font ships with a compact set of glyphs plus a patch map
//! table that tells the client which binary patch to fetch for the codepoints
//! and layout features it encounters. This crate provides:
//! - the sparse bit set codec used to store codepoint and glyph id sets,
//! - the in memory patch map model and its format 2 wire codec,
//! - embedding and extracting patch maps from font binaries,
//! - application of glyph keyed patches, splicing new glyph data into the
//!   font and consuming the matching patch map entries.
//!
//! Built on top of the read-fonts crate. The segmentation planner that
//! decides how to split a font into patches lives in the companion
//! `ift-encoder` crate.

#![forbid(unsafe_code)]

pub mod error;
pub mod font_container;
pub mod format2;
pub mod glyph_keyed;
pub mod ift_table;
pub mod patchmap;
pub mod sparse_bit_set;

mod input_bit_stream;
mod output_bit_stream;
mod reader;

pub use error::IftError;
