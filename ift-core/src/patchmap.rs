//! In memory model of the incremental font transfer patch map.
//!
//! A patch map is an ordered list of entries, each pairing an activation
//! coverage with the index of the patch to fetch and the binary encoding that
//! patch uses. The map is created by the encoder, carried inside the font,
//! and shrunk by the patch applier as patches are consumed.

use std::collections::BTreeSet;

use font_types::Tag;
use read_fonts::collections::IntSet;

use crate::error::IftError;

/// The binary encoding of a patch.
///
/// The numeric values are part of the wire format and form a closed set; the
/// table header carries the default, entries only record deviations from it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PatchEncoding {
    /// Glyph keyed ("binned") patch compressed with brotli.
    GlyphKeyedBrotli,
    /// Whole table diffs compressed with shared brotli.
    TableKeyedSharedBrotli,
    /// Per table shared brotli diffs.
    PerTableSharedBrotli,
}

impl PatchEncoding {
    pub(crate) fn to_wire(self) -> u8 {
        match self {
            PatchEncoding::GlyphKeyedBrotli => 0,
            PatchEncoding::TableKeyedSharedBrotli => 1,
            PatchEncoding::PerTableSharedBrotli => 2,
        }
    }

    pub(crate) fn from_wire(value: u8) -> Result<Self, IftError> {
        match value {
            0 => Ok(PatchEncoding::GlyphKeyedBrotli),
            1 => Ok(PatchEncoding::TableKeyedSharedBrotli),
            2 => Ok(PatchEncoding::PerTableSharedBrotli),
            other => Err(IftError::UnknownEncoding(other)),
        }
    }
}

/// A client's current rendering need: the codepoints it has encountered and
/// the layout features it wants activated.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SubsetDefinition {
    pub codepoints: IntSet<u32>,
    pub features: BTreeSet<Tag>,
}

impl SubsetDefinition {
    pub fn new(codepoints: IntSet<u32>, features: BTreeSet<Tag>) -> Self {
        SubsetDefinition {
            codepoints,
            features,
        }
    }

    pub fn codepoints(codepoints: IntSet<u32>) -> Self {
        SubsetDefinition {
            codepoints,
            features: Default::default(),
        }
    }
}

/// The predicate under which a patch map entry matches a subset definition.
///
/// Coverage data is owned by its entry; duplicated coverages across entries
/// are a serialization concern, not a model one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Coverage {
    pub codepoints: IntSet<u32>,
    pub features: BTreeSet<Tag>,
    // A design space region is reserved by the wire format but never
    // populated; the decoder skips it.
}

impl Coverage {
    pub fn from_codepoints(codepoints: IntSet<u32>) -> Self {
        Coverage {
            codepoints,
            features: Default::default(),
        }
    }

    /// An empty codepoint set matches any definition, and an empty feature
    /// set likewise; otherwise codepoints must intersect and features must be
    /// a subset of what the client asked for.
    pub fn matches(&self, subset_definition: &SubsetDefinition) -> bool {
        let codepoints_match = self.codepoints.is_empty()
            || self
                .codepoints
                .intersects_set(&subset_definition.codepoints);

        codepoints_match
            && (self.features.is_empty() || self.features.is_subset(&subset_definition.features))
    }
}

/// One patch map entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub coverage: Coverage,
    /// Unique across the non ignored entries of an encoded map.
    pub patch_index: u32,
    pub encoding: PatchEncoding,
    /// Extension entries serialize into the extension table ("IFTX") rather
    /// than the main one.
    pub is_extension: bool,
}

/// An ordered patch map plus the URI template and identifier shared by all of
/// its entries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PatchMap {
    id: [u32; 4],
    uri_template: String,
    entries: Vec<Entry>,
}

impl PatchMap {
    pub fn new(id: [u32; 4], uri_template: impl Into<String>) -> Self {
        PatchMap {
            id,
            uri_template: uri_template.into(),
            entries: vec![],
        }
    }

    pub fn id(&self) -> [u32; 4] {
        self.id
    }

    pub fn uri_template(&self) -> &str {
        &self.uri_template
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn add_entry(
        &mut self,
        coverage: Coverage,
        patch_index: u32,
        encoding: PatchEncoding,
    ) -> &mut Self {
        self.entries.push(Entry {
            coverage,
            patch_index,
            encoding,
            is_extension: false,
        });
        self
    }

    pub fn add_extension_entry(
        &mut self,
        coverage: Coverage,
        patch_index: u32,
        encoding: PatchEncoding,
    ) -> &mut Self {
        self.entries.push(Entry {
            coverage,
            patch_index,
            encoding,
            is_extension: true,
        });
        self
    }

    pub(crate) fn push(&mut self, entry: Entry) {
        self.entries.push(entry);
    }

    /// The entries whose coverage matches the subset definition, in map
    /// order.
    pub fn intersecting(&self, subset_definition: &SubsetDefinition) -> Vec<&Entry> {
        self.entries
            .iter()
            .filter(|e| e.coverage.matches(subset_definition))
            .collect()
    }

    /// Returns a copy of this map without the entries for the given patch
    /// indices.
    ///
    /// Entry order is otherwise preserved; the filtered list is rebuilt
    /// rather than mutated in place.
    pub fn remove_patches(&self, patch_indices: &IntSet<u32>) -> PatchMap {
        PatchMap {
            id: self.id,
            uri_template: self.uri_template.clone(),
            entries: self
                .entries
                .iter()
                .filter(|e| !patch_indices.contains(e.patch_index))
                .cloned()
                .collect(),
        }
    }
}
