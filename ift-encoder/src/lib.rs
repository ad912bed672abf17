//! Encoder side planning for incremental font transfer.
//!
//! The central question when encoding an incremental font is how to split
//! the glyphs into patches so that any codepoint subset a client requests can
//! be satisfied. This crate answers it: given a face and a proposed
//! segmentation of codepoints, [`glyph_segmentation::GlyphSegmentation`]
//! derives disjoint glyph patches together with the activation conditions
//! that preserve the glyph closure requirement, and lowers them into the
//! patch map structures of the `ift-core` crate.
//!
//! The shaping closure itself is an external collaborator, consumed through
//! the [`closure::GlyphClosure`] trait.

#![forbid(unsafe_code)]

pub mod closure;
pub mod condition;
pub mod glyph_segmentation;
