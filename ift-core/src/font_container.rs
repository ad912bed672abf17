//! Reading and rebuilding the top level font container.
//!
//! An incremental font is an ordinary SFNT container, but patch application
//! cares about the physical placement of table data: `loca` must stay at the
//! end of the outline tables so that repeated glyph splicing keeps producing
//! byte identical fonts. The standard font builder lays table data out in tag
//! order, so this module provides an ordered variant: the table directory is
//! tag sorted as the format requires while the data blocks follow a caller
//! chosen physical order.

use std::borrow::Cow;

use font_types::Tag;
use read_fonts::FontRef;

use crate::error::IftError;

const TABLE_RECORD_LEN: usize = 16;
const SFNT_VERSION: u32 = 0x00010000;

/// Returns the font's tables as `(tag, data)` pairs in physical order.
///
/// The table directory is sorted by tag, so physical order is recovered by
/// sorting the records by their data offset.
pub fn table_list<'a>(font: &FontRef<'a>) -> Vec<(Tag, &'a [u8])> {
    let mut records: Vec<_> = font
        .table_directory
        .table_records()
        .iter()
        .map(|r| (r.offset(), r.tag()))
        .collect();
    records.sort();

    records
        .into_iter()
        .filter_map(|(_, tag)| Some((tag, font.table_data(tag)?.as_bytes())))
        .collect()
}

/// Moves the outline tables into the physical order patching requires:
/// `gvar` before `glyf`, `glyf` before `loca`, `loca` last among the
/// TrueType outline tables, and `CFF `/`CFF2` at the very end.
pub fn apply_outline_order(tags: &mut Vec<Tag>) {
    for tag in [
        Tag::new(b"gvar"),
        Tag::new(b"glyf"),
        Tag::new(b"loca"),
        Tag::new(b"CFF "),
        Tag::new(b"CFF2"),
    ] {
        move_tag_to_back(tags, tag);
    }
}

fn move_tag_to_back(tags: &mut Vec<Tag>, tag: Tag) {
    if let Some(position) = tags.iter().position(|t| *t == tag) {
        tags.remove(position);
        tags.push(tag);
    }
}

/// Rebuilds the font with some tables replaced, added, or dropped.
///
/// Existing tables keep their physical position; tables that only exist in
/// `replacements` are appended. The outline ordering rules are applied to the
/// final order, so repeated rebuilds of the same font are byte stable.
pub(crate) fn rebuild_font(
    font: &FontRef<'_>,
    mut replacements: std::collections::BTreeMap<Tag, Vec<u8>>,
    remove: &[Tag],
) -> Result<Vec<u8>, IftError> {
    let existing = table_list(font);

    let mut tags: Vec<Tag> = existing
        .iter()
        .map(|(tag, _)| *tag)
        .filter(|tag| !remove.contains(tag))
        .collect();
    for tag in replacements.keys() {
        if !tags.contains(tag) {
            tags.push(*tag);
        }
    }
    apply_outline_order(&mut tags);

    let mut builder = OrderedFontBuilder::new();
    for tag in tags {
        if let Some(data) = replacements.remove(&tag) {
            builder.add_raw(tag, data);
        } else {
            let data = existing
                .iter()
                .find(|(t, _)| *t == tag)
                .map(|(_, data)| *data)
                .ok_or(IftError::NotFound("table data for directory entry"))?;
            builder.add_raw(tag, data);
        }
    }

    builder.build()
}

/// Assembles an SFNT from tables laid out in insertion order.
#[derive(Debug, Clone, Default)]
pub struct OrderedFontBuilder<'a> {
    tables: Vec<(Tag, Cow<'a, [u8]>)>,
}

impl<'a> OrderedFontBuilder<'a> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Adds a table; its data will be placed after all previously added
    /// tables. Re-adding a tag replaces the data but keeps the position.
    pub fn add_raw(&mut self, tag: Tag, data: impl Into<Cow<'a, [u8]>>) -> &mut Self {
        let data = data.into();
        if let Some(entry) = self.tables.iter_mut().find(|(t, _)| *t == tag) {
            entry.1 = data;
        } else {
            self.tables.push((tag, data));
        }
        self
    }

    /// Returns `true` if the builder contains a table with this tag.
    pub fn contains(&self, tag: Tag) -> bool {
        self.tables.iter().any(|(t, _)| *t == tag)
    }

    pub fn build(&mut self) -> Result<Vec<u8>, IftError> {
        if self.tables.len() > u16::MAX as usize {
            return Err(IftError::LimitExceeded(
                "number of font tables exceeds 0xFFFF",
            ));
        }

        let header_len = std::mem::size_of::<u32>() // sfnt version
            + std::mem::size_of::<u16>() * 4 // num_tables to range_shift
            + self.tables.len() * TABLE_RECORD_LEN;

        // Records are computed in physical order then sorted by tag for the
        // directory, as the container format requires.
        let mut position = header_len as u32;
        let mut records: Vec<(Tag, u32, u32, u32)> = self
            .tables
            .iter()
            .map(|(tag, data)| {
                let offset = position;
                let length = data.len() as u32;
                let (checksum, padding) = checksum_and_padding(data);
                position += length + padding;
                (*tag, checksum, offset, length)
            })
            .collect();
        records.sort_by_key(|(tag, ..)| *tag);

        let num_tables = self.tables.len() as u16;
        let entry_selector = (num_tables as f64).log2().floor() as u16;
        let search_range = (2.0_f64.powi(entry_selector as i32) * 16.0) as u16;
        let range_shift = (num_tables as usize * 16).saturating_sub(search_range as usize) as u16;

        let mut data = Vec::with_capacity(position as usize);
        data.extend_from_slice(&SFNT_VERSION.to_be_bytes());
        data.extend_from_slice(&num_tables.to_be_bytes());
        data.extend_from_slice(&search_range.to_be_bytes());
        data.extend_from_slice(&entry_selector.to_be_bytes());
        data.extend_from_slice(&range_shift.to_be_bytes());
        for (tag, checksum, offset, length) in records {
            data.extend_from_slice(&tag.to_be_bytes());
            data.extend_from_slice(&checksum.to_be_bytes());
            data.extend_from_slice(&offset.to_be_bytes());
            data.extend_from_slice(&length.to_be_bytes());
        }

        for (_, table) in self.tables.iter() {
            data.extend_from_slice(table);
            let rem = (4 - table.len() % 4) % 4;
            let padding = [0u8; 4];
            data.extend_from_slice(&padding[..rem]);
        }

        Ok(data)
    }
}

fn checksum_and_padding(table: &[u8]) -> (u32, u32) {
    let padding = (4 - table.len() % 4) % 4;
    let mut sum = 0u32;
    let mut iter = table.chunks_exact(4);
    for quad in &mut iter {
        let array: [u8; 4] = quad.try_into().unwrap_or_default();
        sum = sum.wrapping_add(u32::from_be_bytes(array));
    }

    let rem = match *iter.remainder() {
        [a] => u32::from_be_bytes([a, 0, 0, 0]),
        [a, b] => u32::from_be_bytes([a, b, 0, 0]),
        [a, b, c] => u32::from_be_bytes([a, b, c, 0]),
        _ => 0,
    };

    (sum.wrapping_add(rem), padding as u32)
}
