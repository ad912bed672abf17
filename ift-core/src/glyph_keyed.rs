//! Glyph keyed patch parsing and application.
//!
//! A glyph keyed patch is a binary blob carrying replacement data for a set
//! of glyph ids. Applying one splices the carried glyph data into the font's
//! outline tables, regenerates `loca`, and removes the consumed entries from
//! the font's patch map. The glyph id set lives in the uncompressed patch
//! header so it can be inspected without touching the brotli payload.

use font_types::{Scalar, Tag};
use read_fonts::collections::IntSet;
use read_fonts::tables::loca::Loca;
use read_fonts::{FontRef, TableProvider};
use shared_brotli_patch_decoder::{BuiltInBrotliDecoder, SharedBrotliDecoder};
use skrifa::GlyphId;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::IftError;
use crate::font_container::rebuild_font;
use crate::format2;
use crate::ift_table::{patch_maps_from_font, IFTX_TAG, IFT_TAG};
use crate::reader::Reader;
use crate::sparse_bit_set::decode_sparse_bit_set;

/// Magic bytes at the start of a glyph keyed patch.
pub const PATCH_MAGIC: [u8; 4] = *b"iftb";

const GLYF_TAG: Tag = Tag::new(b"glyf");
const LOCA_TAG: Tag = Tag::new(b"loca");

/// A parsed glyph keyed patch.
///
/// Only the header is interpreted on construction; the compressed payload is
/// held as raw bytes until application.
#[derive(Debug, Clone, PartialEq)]
pub struct GlyphKeyedPatch<'a> {
    id: [u32; 4],
    chunk_index: u32,
    gids: IntSet<GlyphId>,
    tables: Vec<Tag>,
    max_uncompressed_length: u32,
    brotli_stream: &'a [u8],
}

impl<'a> GlyphKeyedPatch<'a> {
    pub fn read(data: &'a [u8]) -> Result<Self, IftError> {
        let mut reader = Reader::new(data, "glyph keyed patch header");

        if reader.read_array::<4>()? != PATCH_MAGIC {
            return Err(IftError::InvalidFormat("glyph keyed patch magic"));
        }

        let id = [
            reader.read_u32()?,
            reader.read_u32()?,
            reader.read_u32()?,
            reader.read_u32()?,
        ];
        let chunk_index = reader.read_u32()?;

        let (gids, consumed) = decode_sparse_bit_set(reader.remaining())?;
        reader.read_bytes(consumed)?;
        if gids.is_empty() {
            return Err(IftError::InvalidFormat(
                "glyph keyed patch contains no glyph ids",
            ));
        }

        let table_count = reader.read_u8()?;
        let mut tables = Vec::with_capacity(table_count as usize);
        let mut prev_tag: Option<Tag> = None;
        for _ in 0..table_count {
            let tag = Tag::from_be_bytes(reader.read_array::<4>()?);
            if prev_tag.is_some_and(|prev| tag <= prev) {
                return Err(IftError::InvalidFormat(
                    "patch table tags are unsorted or contain duplicates",
                ));
            }
            prev_tag = Some(tag);
            tables.push(tag);
        }

        let max_uncompressed_length = reader.read_u32()?;

        Ok(GlyphKeyedPatch {
            id,
            chunk_index,
            gids: gids.iter().map(GlyphId::new).collect(),
            tables,
            max_uncompressed_length,
            brotli_stream: reader.remaining(),
        })
    }

    /// The 16 byte identifier tying this patch to a font.
    pub fn id(&self) -> [u32; 4] {
        self.id
    }

    /// The patch map index this patch was published under.
    pub fn chunk_index(&self) -> u32 {
        self.chunk_index
    }

    /// The glyph ids this patch installs, recovered from the header alone.
    pub fn gids(&self) -> &IntSet<GlyphId> {
        &self.gids
    }

    pub fn tables(&self) -> &[Tag] {
        &self.tables
    }

    fn decompress(&self) -> Result<Vec<u8>, IftError> {
        BuiltInBrotliDecoder
            .decode(
                self.brotli_stream,
                None,
                self.max_uncompressed_length as usize,
            )
            .map_err(IftError::from)
    }
}

/// Applies a batch of glyph keyed patches, producing a new font binary.
///
/// Sequential application produces the same bytes as the batched form, and
/// re-applying an already consumed patch is a byte identical no-op.
pub fn apply_glyph_keyed_patches(
    patches: &[GlyphKeyedPatch<'_>],
    font: &FontRef<'_>,
) -> Result<Vec<u8>, IftError> {
    let (main_map, ext_map) = patch_maps_from_font(font)?;

    let font_id = main_map.id();
    for patch in patches {
        if patch.id() != font_id {
            return Err(IftError::IdMismatch {
                font_id,
                patch_id: patch.id(),
            });
        }
    }

    let mut claimed = IntSet::<GlyphId>::empty();
    for patch in patches {
        for gid in patch.gids().iter() {
            if !claimed.insert(gid) {
                return Err(IftError::OverlappingPatches(gid.to_u32()));
            }
        }
    }

    let mut decompression_buffer: Vec<Vec<u8>> = Vec::with_capacity(patches.len());
    for patch in patches {
        decompression_buffer.push(patch.decompress()?);
    }

    let num_glyphs = font
        .maxp()
        .map_err(|_| IftError::NotFound("'maxp' table"))?
        .num_glyphs();
    let max_glyph_id = GlyphId::new(
        u32::from(num_glyphs)
            .checked_sub(1)
            .ok_or(IftError::InvalidFormat("font has no glyphs"))?,
    );

    let mut replacements: BTreeMap<Tag, Vec<u8>> = BTreeMap::new();

    for table_tag in table_tag_list(patches) {
        if table_tag == GLYF_TAG {
            let (Some(glyf), Ok(loca)) = (font.table_data(GLYF_TAG), font.loca(None)) else {
                return Err(IftError::NotFound(
                    "'glyf'/'loca' tables required by the patch",
                ));
            };
            let (new_glyf, new_loca) = patch_glyf_and_loca(
                patches,
                &decompression_buffer,
                glyf.as_bytes(),
                loca,
                max_glyph_id,
            )?;
            replacements.insert(GLYF_TAG, new_glyf);
            replacements.insert(LOCA_TAG, new_loca);
        } else if table_tag == Tag::new(b"CFF ")
            || table_tag == Tag::new(b"CFF2")
            || table_tag == Tag::new(b"gvar")
        {
            return Err(IftError::InvalidFormat(
                "CFF, CFF2, and gvar patches are not supported",
            ));
        } else {
            // All other table tags are ignored.
            continue;
        }
    }

    // Consume the applied entries from the patch maps.
    let consumed: IntSet<u32> = patches.iter().map(|p| p.chunk_index()).collect();
    replacements.insert(IFT_TAG, format2::serialize(&main_map.remove_patches(&consumed), false)?);
    if let Some(ext_map) = ext_map {
        replacements.insert(
            IFTX_TAG,
            format2::serialize(&ext_map.remove_patches(&consumed), true)?,
        );
    }

    rebuild_font(font, replacements, &[])
}

fn table_tag_list(patches: &[GlyphKeyedPatch<'_>]) -> BTreeSet<Tag> {
    patches
        .iter()
        .flat_map(|patch| patch.tables().iter().copied())
        .collect()
}

/// Collects per gid replacement data for `table_tag` across the batch,
/// dropping gids the (possibly subsetted) font does not contain.
fn replacement_data_for_table<'a>(
    patches: &[GlyphKeyedPatch<'_>],
    payloads: &'a [Vec<u8>],
    table_tag: Tag,
    max_glyph_id: GlyphId,
) -> Result<BTreeMap<GlyphId, &'a [u8]>, IftError> {
    let mut data_for_gid: BTreeMap<GlyphId, &'a [u8]> = BTreeMap::new();
    for (patch, payload) in patches.iter().zip(payloads) {
        let Some(table_index) = patch.tables().iter().position(|tag| *tag == table_tag) else {
            continue;
        };

        let glyph_count = patch.gids().len() as usize;
        let table_count = patch.tables().len();
        let offsets_len = (glyph_count + 1)
            .checked_mul(4)
            .and_then(|per_table| per_table.checked_mul(table_count))
            .ok_or(IftError::InvalidFormat("patch offset array overflows"))?;
        if payload.len() < offsets_len {
            return Err(IftError::NotEnoughInput("glyph keyed patch offsets"));
        }

        let offset_at = |index: usize| -> Result<usize, IftError> {
            let base = (table_index * (glyph_count + 1) + index) * 4;
            let bytes: [u8; 4] = payload[base..base + 4].try_into().unwrap();
            let offset = u32::from_be_bytes(bytes) as usize;
            if offset < offsets_len || offset > payload.len() {
                return Err(IftError::InvalidFormat("patch data offset out of bounds"));
            }
            Ok(offset)
        };

        for (i, gid) in patch.gids().iter().enumerate() {
            let start = offset_at(i)?;
            let end = offset_at(i + 1)?;
            if end < start {
                return Err(IftError::InvalidFormat(
                    "patch data offsets are not ascending",
                ));
            }
            if gid > max_glyph_id {
                // The font was subsetted to exclude this glyph; drop the
                // data silently.
                continue;
            }
            data_for_gid.insert(gid, &payload[start..end]);
        }
    }

    Ok(data_for_gid)
}

trait LocaOffset: Scalar {
    const SIZE: usize;

    fn from_byte_offset(offset: usize) -> Result<Self, IftError>;

    fn push_to(self, out: &mut Vec<u8>);
}

impl LocaOffset for u32 {
    const SIZE: usize = 4;

    fn from_byte_offset(offset: usize) -> Result<Self, IftError> {
        offset
            .try_into()
            .map_err(|_| IftError::InvalidFormat("glyf table overflows long loca"))
    }

    fn push_to(self, out: &mut Vec<u8>) {
        let raw: [u8; 4] = self.to_raw();
        out.extend_from_slice(&raw);
    }
}

impl LocaOffset for u16 {
    const SIZE: usize = 2;

    fn from_byte_offset(offset: usize) -> Result<Self, IftError> {
        // Short loca stores half offsets; offsets are kept even by padding.
        (offset / 2)
            .try_into()
            .map_err(|_| IftError::InvalidFormat("glyf table overflows short loca"))
    }

    fn push_to(self, out: &mut Vec<u8>) {
        let raw: [u8; 2] = self.to_raw();
        out.extend_from_slice(&raw);
    }
}

/// Walks every glyph slot of the font once, emitting either its replacement
/// data or the bytes the current loca points at, and records the loca entry
/// for each slot along the way.
fn splice_glyf_and_loca<OffsetType: LocaOffset>(
    replacements: &BTreeMap<GlyphId, &[u8]>,
    glyf: &[u8],
    loca: &Loca<'_>,
    max_glyph_id: GlyphId,
) -> Result<(Vec<u8>, Vec<u8>), IftError> {
    let glyph_count = max_glyph_id.to_u32() as usize + 1;
    let pad_to_even = matches!(loca, Loca::Short(_));

    let mut new_glyf: Vec<u8> = Vec::with_capacity(glyf.len());
    let mut new_loca: Vec<u8> = Vec::with_capacity((glyph_count + 1) * OffsetType::SIZE);

    for gid in 0..glyph_count {
        OffsetType::from_byte_offset(new_glyf.len())?.push_to(&mut new_loca);

        match replacements.get(&GlyphId::new(gid as u32)) {
            Some(data) => {
                new_glyf.extend_from_slice(data);
                if pad_to_even && data.len() % 2 != 0 {
                    new_glyf.push(0);
                }
            }
            None => {
                let start = loca
                    .get_raw(gid)
                    .ok_or(IftError::NotFound("loca entry for retained glyph"))?
                    as usize;
                let end = loca
                    .get_raw(gid + 1)
                    .ok_or(IftError::NotFound("loca entry for retained glyph"))?
                    as usize;
                let data = glyf.get(start..end).ok_or(IftError::InvalidFormat(
                    "loca entries are not ascending or point outside glyf",
                ))?;
                new_glyf.extend_from_slice(data);
            }
        }
    }

    OffsetType::from_byte_offset(new_glyf.len())?.push_to(&mut new_loca);

    Ok((new_glyf, new_loca))
}

fn patch_glyf_and_loca(
    patches: &[GlyphKeyedPatch<'_>],
    payloads: &[Vec<u8>],
    glyf: &[u8],
    loca: Loca<'_>,
    max_glyph_id: GlyphId,
) -> Result<(Vec<u8>, Vec<u8>), IftError> {
    // Merge the individual patches into replacement data per gid, then
    // rewrite glyf and loca in a single pass over the glyph ids.
    let replacements = replacement_data_for_table(patches, payloads, GLYF_TAG, max_glyph_id)?;

    match loca {
        Loca::Short(_) => splice_glyf_and_loca::<u16>(&replacements, glyf, &loca, max_glyph_id),
        Loca::Long(_) => splice_glyf_and_loca::<u32>(&replacements, glyf, &loca, max_glyph_id),
    }
}
