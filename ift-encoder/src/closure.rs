//! The shaping closure boundary between the planner and the subsetter.
//!
//! Computing a glyph closure requires a full layout aware subsetter, which is
//! deliberately outside of this crate. The planner consumes closures through
//! the [`GlyphClosure`] trait and memoizes calls; implementations must be
//! deterministic and pure. [`CmapClosure`] is a minimal built in
//! implementation covering fonts without layout rules.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use read_fonts::collections::IntSet;
use read_fonts::FontRef;
use skrifa::charmap::Charmap;
use skrifa::GlyphId;

use ift_core::IftError;

/// An error reported by the shaping closure collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosureError(pub String);

impl fmt::Display for ClosureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Glyph closure computation failed: {}", self.0)
    }
}

impl Error for ClosureError {}

/// An error raised while planning a glyph segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentationError {
    /// The closure collaborator returned an error.
    ClosureFailed(String),
    /// More glyphs than the caller's threshold could not be placed into
    /// patches.
    Unmappable(usize),
    /// A condition referenced a segment index with no backing segment.
    UnknownSegment(u32),
    /// Lowering the plan to patch map entries failed.
    Encoding(IftError),
}

impl fmt::Display for SegmentationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentationError::ClosureFailed(message) => {
                write!(f, "Glyph closure computation failed: {message}")
            }
            SegmentationError::Unmappable(count) => write!(
                f,
                "{count} glyphs could not be mapped to patches within the analysis bound."
            ),
            SegmentationError::UnknownSegment(index) => {
                write!(f, "Condition references unknown segment {index}.")
            }
            SegmentationError::Encoding(error) => error.fmt(f),
        }
    }
}

impl Error for SegmentationError {}

impl From<ClosureError> for SegmentationError {
    fn from(value: ClosureError) -> Self {
        SegmentationError::ClosureFailed(value.0)
    }
}

impl From<IftError> for SegmentationError {
    fn from(value: IftError) -> Self {
        SegmentationError::Encoding(value)
    }
}

/// Computes the glyph closure of a codepoint set on some font face.
///
/// The closure of a codepoint set is the smallest glyph id set sufficient to
/// render those codepoints under the font's layout rules. Implementations
/// must be deterministic: the planner memoizes results and never serializes
/// closure state.
pub trait GlyphClosure {
    fn glyph_closure(&self, codepoints: &IntSet<u32>) -> Result<IntSet<GlyphId>, ClosureError>;
}

/// Memoizes closure calls for the planner, which queries overlapping unions
/// of the same segments repeatedly.
pub(crate) struct ClosureCache<'a, T: GlyphClosure> {
    inner: &'a T,
    cache: HashMap<Vec<u32>, IntSet<GlyphId>>,
}

impl<'a, T: GlyphClosure> ClosureCache<'a, T> {
    pub fn new(inner: &'a T) -> Self {
        ClosureCache {
            inner,
            cache: Default::default(),
        }
    }

    pub fn closure(&mut self, codepoints: &IntSet<u32>) -> Result<IntSet<GlyphId>, ClosureError> {
        let key: Vec<u32> = codepoints.iter().collect();
        if let Some(result) = self.cache.get(&key) {
            return Ok(result.clone());
        }

        let result = self.inner.glyph_closure(codepoints)?;
        Ok(self.cache.entry(key).or_insert(result).clone())
    }
}

/// Closure over the character map only.
///
/// Suitable for faces without layout rules; anything with substitutions needs
/// a real subsetter behind the [`GlyphClosure`] trait.
pub struct CmapClosure<'a> {
    charmap: Charmap<'a>,
}

impl<'a> CmapClosure<'a> {
    pub fn new(font: &FontRef<'a>) -> Self {
        CmapClosure {
            charmap: Charmap::new(font),
        }
    }
}

impl GlyphClosure for CmapClosure<'_> {
    fn glyph_closure(&self, codepoints: &IntSet<u32>) -> Result<IntSet<GlyphId>, ClosureError> {
        let mut gids = IntSet::<GlyphId>::empty();
        // The notdef glyph is always required.
        gids.insert(GlyphId::new(0));
        for cp in codepoints.iter() {
            if let Some(gid) = self.charmap.map(cp) {
                gids.insert(gid);
            }
        }
        Ok(gids)
    }
}
