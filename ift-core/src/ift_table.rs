//! Placing patch maps into fonts and reading them back out.
//!
//! A font carries its patch map in the `IFT ` table; entries flagged as
//! extension entries live in a second, independently serialized `IFTX` table
//! that shares the same id and URI template.

use std::collections::BTreeMap;

use font_types::Tag;
use read_fonts::FontRef;

use crate::error::IftError;
use crate::font_container::rebuild_font;
use crate::format2;
use crate::patchmap::PatchMap;

pub const IFT_TAG: Tag = Tag::new(b"IFT ");
pub const IFTX_TAG: Tag = Tag::new(b"IFTX");

/// Reads the main patch map and, when present, the extension patch map from
/// the font.
pub fn patch_maps_from_font(font: &FontRef<'_>) -> Result<(PatchMap, Option<PatchMap>), IftError> {
    let main = font
        .table_data(IFT_TAG)
        .ok_or(IftError::NotFound("'IFT ' table"))?;
    let main = format2::deserialize(main.as_bytes(), false)?;

    let extension = font
        .table_data(IFTX_TAG)
        .map(|data| format2::deserialize(data.as_bytes(), true))
        .transpose()?;

    Ok((main, extension))
}

/// Serializes the patch map into the font, producing a new font binary.
///
/// Non extension entries go to `IFT `, extension entries to `IFTX` (which is
/// dropped if the map has none). Existing tables keep their physical order,
/// with the outline tables moved to the placement patching requires.
pub fn add_to_font(font: &FontRef<'_>, map: &PatchMap) -> Result<Vec<u8>, IftError> {
    let mut replacements = BTreeMap::new();
    replacements.insert(IFT_TAG, format2::serialize(map, false)?);

    let has_extension_entries = map.entries().iter().any(|e| e.is_extension);
    let mut remove: Vec<Tag> = vec![];
    if has_extension_entries {
        replacements.insert(IFTX_TAG, format2::serialize(map, true)?);
    } else {
        remove.push(IFTX_TAG);
    }

    rebuild_font(font, replacements, &remove)
}
