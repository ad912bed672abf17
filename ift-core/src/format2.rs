//! Serialization of patch maps to and from the format 2 table layout.
//!
//! The table is big endian: a fixed header (format byte, reserved word, four
//! word id, default encoding, entry count, entries offset, reserved id
//! strings offset, template length) followed by the URI template inline and
//! a packed entry stream at the entries offset. Each entry starts with a
//! format bitfield byte that announces which optional fields follow it.

use read_fonts::collections::IntSet;

use crate::error::IftError;
use crate::patchmap::{Coverage, Entry, PatchEncoding, PatchMap};
use crate::reader::Reader;
use crate::sparse_bit_set::{decode_sparse_bit_set, encode_sparse_bit_set};

const FEATURES_BIT_MASK: u8 = 1;
const DESIGN_SPACE_BIT_MASK: u8 = 1 << 1;
const COPY_MAPPINGS_BIT_MASK: u8 = 1 << 2;
const INDEX_DELTA_BIT_MASK: u8 = 1 << 3;
const ENCODING_BIT_MASK: u8 = 1 << 4;
const CODEPOINT_BIT_MASK: u8 = 1 << 5;
const IGNORE_BIT_MASK: u8 = 1 << 6;

/// Length of the fixed header fields before the inline URI template.
const HEADER_MIN_LENGTH: usize = 34;

const MAX_BIAS: u32 = 0xFFFFFF;

/// Serializes one pass of the patch map: entries whose extension flag equals
/// `is_ext`. The two passes produce two independent tables.
pub fn serialize(map: &PatchMap, is_ext: bool) -> Result<Vec<u8>, IftError> {
    let entries: Vec<&Entry> = map
        .entries()
        .iter()
        .filter(|e| e.is_extension == is_ext)
        .collect();

    if entries.len() > 0xFFFF {
        return Err(IftError::LimitExceeded(
            "exceeded maximum number of entries (0xFFFF)",
        ));
    }

    let uri_template = map.uri_template().as_bytes();
    if uri_template.len() > 0xFFFF {
        return Err(IftError::LimitExceeded(
            "exceeded maximum uri template size (0xFFFF)",
        ));
    }

    let default_encoding = pick_default_encoding(&entries);

    let mut out: Vec<u8> = Vec::new();
    out.push(2u8); // format
    out.extend_from_slice(&0u32.to_be_bytes()); // reserved
    for word in map.id() {
        out.extend_from_slice(&word.to_be_bytes());
    }
    out.push(default_encoding.to_wire());
    out.extend_from_slice(&(entries.len() as u16).to_be_bytes());
    out.extend_from_slice(&((HEADER_MIN_LENGTH + uri_template.len()) as u32).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes()); // idStrings, reserved
    out.extend_from_slice(&(uri_template.len() as u16).to_be_bytes());
    out.extend_from_slice(uri_template);

    let mut last_entry_index = 0u32;
    for entry in entries {
        encode_entry(entry, last_entry_index, default_encoding, &mut out)?;
        last_entry_index = entry.patch_index;
    }

    Ok(out)
}

/// Deserializes a format 2 table. Decoded entries carry the given extension
/// flag (the wire format does not store it; it is implied by which table the
/// bytes came from).
pub fn deserialize(data: &[u8], is_ext: bool) -> Result<PatchMap, IftError> {
    let mut reader = Reader::new(data, "patch map header");

    let format = reader.read_u8()?;
    if format != 2 {
        return Err(IftError::InvalidFormat("patch map format number is not 2"));
    }
    reader.read_u32()?; // reserved

    let id = [
        reader.read_u32()?,
        reader.read_u32()?,
        reader.read_u32()?,
        reader.read_u32()?,
    ];
    let default_encoding = PatchEncoding::from_wire(reader.read_u8()?)?;
    let entry_count = reader.read_u16()?;
    let entries_offset = reader.read_u32()? as usize;
    reader.read_u32()?; // idStrings offset, reserved

    let template_length = reader.read_u16()? as usize;
    let template_bytes = reader.read_bytes(template_length)?;
    let uri_template = std::str::from_utf8(template_bytes)
        .map_err(|_| IftError::InvalidFormat("uri template is not valid utf-8"))?;

    let mut map = PatchMap::new(id, uri_template);

    let mut reader = Reader::at(data, entries_offset, "patch map entries")?;
    let mut entry_index = 0u32;
    for _ in 0..entry_count {
        if let Some(entry) =
            decode_entry(&mut reader, default_encoding, &mut entry_index, is_ext)?
        {
            map.push(entry);
        }
    }

    Ok(map)
}

fn pick_default_encoding(entries: &[&Entry]) -> PatchEncoding {
    let mut counts = [0u32; 3];
    for entry in entries {
        counts[entry.encoding.to_wire() as usize] += 1;
    }

    // Ties break towards the lower numeric encoding value.
    if counts[0] >= counts[1] && counts[0] >= counts[2] {
        PatchEncoding::GlyphKeyedBrotli
    } else if counts[1] >= counts[2] {
        PatchEncoding::TableKeyedSharedBrotli
    } else {
        PatchEncoding::PerTableSharedBrotli
    }
}

fn encode_entry(
    entry: &Entry,
    last_entry_index: u32,
    default_encoding: PatchEncoding,
    out: &mut Vec<u8>,
) -> Result<(), IftError> {
    let coverage = &entry.coverage;
    let has_codepoints = !coverage.codepoints.is_empty();
    let has_features = !coverage.features.is_empty();
    let delta = i64::from(entry.patch_index) - i64::from(last_entry_index);
    let has_delta = delta != 1;
    let has_patch_encoding = entry.encoding != default_encoding;

    let format = (if has_features { FEATURES_BIT_MASK } else { 0 })
        | (if has_delta { INDEX_DELTA_BIT_MASK } else { 0 })
        | (if has_patch_encoding {
            ENCODING_BIT_MASK
        } else {
            0
        })
        | (if has_codepoints {
            CODEPOINT_BIT_MASK
        } else {
            0
        });
    out.push(format);

    if has_features {
        let count: u8 = coverage
            .features
            .len()
            .try_into()
            .map_err(|_| IftError::LimitExceeded("exceeded max number of feature tags (0xFF)"))?;
        out.push(count);
        for tag in &coverage.features {
            out.extend_from_slice(&tag.to_be_bytes());
        }
    }

    if has_delta {
        let delta: i16 = delta
            .try_into()
            .map_err(|_| IftError::LimitExceeded("exceeded max entry index delta (int16)"))?;
        out.extend_from_slice(&delta.to_be_bytes());
    }

    if has_patch_encoding {
        out.push(entry.encoding.to_wire());
    }

    if has_codepoints {
        let bias = coverage.codepoints.first().unwrap();
        if bias > MAX_BIAS {
            return Err(IftError::LimitExceeded(
                "smallest codepoint exceeds the uint24 bias field",
            ));
        }

        let biased: IntSet<u32> = coverage.codepoints.iter().map(|cp| cp - bias).collect();
        out.extend_from_slice(&bias.to_be_bytes()[1..]);
        out.extend_from_slice(&encode_sparse_bit_set(&biased));
    }

    Ok(())
}

fn decode_entry(
    reader: &mut Reader<'_>,
    default_encoding: PatchEncoding,
    entry_index: &mut u32,
    is_ext: bool,
) -> Result<Option<Entry>, IftError> {
    let format = reader.read_u8()?;
    let mut coverage = Coverage::default();

    if format & FEATURES_BIT_MASK != 0 {
        let feature_count = reader.read_u8()?;
        for _ in 0..feature_count {
            coverage
                .features
                .insert(font_types::Tag::from_be_bytes(reader.read_array::<4>()?));
        }
    }

    if format & DESIGN_SPACE_BIT_MASK != 0 {
        // Reserved: the segments are skipped without interpretation.
        let segment_count = reader.read_u16()? as usize;
        reader.read_bytes(segment_count * 12)?;
    }

    if format & COPY_MAPPINGS_BIT_MASK != 0 {
        // Copy indices are not materialized by this decoder.
        let copy_count = reader.read_u16()? as usize;
        reader.read_bytes(copy_count * 2)?;
    }

    let advance = if format & INDEX_DELTA_BIT_MASK != 0 {
        i64::from(reader.read_i16()?)
    } else {
        1
    };
    let new_index = i64::from(*entry_index) + advance;
    *entry_index = u32::try_from(new_index)
        .map_err(|_| IftError::InvalidFormat("entry index delta moves the index out of range"))?;

    let encoding = if format & ENCODING_BIT_MASK != 0 {
        PatchEncoding::from_wire(reader.read_u8()?)?
    } else {
        default_encoding
    };

    if format & CODEPOINT_BIT_MASK != 0 {
        let bias = reader.read_u24()?;
        let (set, consumed) = decode_sparse_bit_set(reader.remaining())?;
        reader.read_bytes(consumed)?;

        for value in set.iter() {
            let codepoint = value
                .checked_add(bias)
                .ok_or(IftError::InvalidFormat("biased codepoint out of range"))?;
            coverage.codepoints.insert(codepoint);
        }
    }

    if format & IGNORE_BIT_MASK != 0 {
        return Ok(None);
    }

    Ok(Some(Entry {
        coverage,
        patch_index: *entry_index,
        encoding,
        is_extension: is_ext,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use font_types::Tag;

    fn cps(values: &[u32]) -> IntSet<u32> {
        values.iter().copied().collect()
    }

    fn sample_map() -> PatchMap {
        let mut map = PatchMap::new([1, 2, 3, 4], "//patches/{id}");
        map.add_entry(
            Coverage::from_codepoints(cps(&[0x41, 0x42, 0x43])),
            1,
            PatchEncoding::GlyphKeyedBrotli,
        )
        .add_entry(
            Coverage {
                codepoints: cps(&[0x410, 0x411]),
                features: [Tag::new(b"liga")].into(),
            },
            2,
            PatchEncoding::GlyphKeyedBrotli,
        )
        .add_entry(
            Coverage::from_codepoints(cps(&[0x4E00])),
            10,
            PatchEncoding::TableKeyedSharedBrotli,
        )
        .add_extension_entry(
            Coverage::from_codepoints(cps(&[0x1F600])),
            11,
            PatchEncoding::GlyphKeyedBrotli,
        );
        map
    }

    fn without_extension_entries(map: &PatchMap) -> PatchMap {
        let mut out = PatchMap::new(map.id(), map.uri_template());
        for e in map.entries().iter().filter(|e| !e.is_extension) {
            out.add_entry(e.coverage.clone(), e.patch_index, e.encoding);
        }
        out
    }

    #[test]
    fn round_trip() {
        let map = sample_map();

        let main = serialize(&map, false).unwrap();
        let decoded = deserialize(&main, false).unwrap();
        assert_eq!(decoded, without_extension_entries(&map));

        let ext = serialize(&map, true).unwrap();
        let decoded_ext = deserialize(&ext, true).unwrap();
        assert_eq!(decoded_ext.entries().len(), 1);
        assert_eq!(decoded_ext.entries()[0].patch_index, 11);
        assert!(decoded_ext.entries()[0].is_extension);
    }

    #[test]
    fn serialization_is_canonical() {
        let map = sample_map();
        let first = serialize(&map, false).unwrap();
        let reparsed = deserialize(&first, false).unwrap();
        assert_eq!(serialize(&reparsed, false).unwrap(), first);
    }

    #[test]
    fn patch_index_sequence_round_trips() {
        // Mix of implicit +1 advances, jumps, and a backwards delta.
        let mut map = PatchMap::new([0; 4], "t");
        for index in [1u32, 2, 3, 100, 101, 7, 0xFFFF] {
            map.add_entry(
                Coverage::from_codepoints(cps(&[index])),
                index,
                PatchEncoding::GlyphKeyedBrotli,
            );
        }

        let bytes = serialize(&map, false).unwrap();
        let decoded = deserialize(&bytes, false).unwrap();
        let indices: Vec<u32> = decoded.entries().iter().map(|e| e.patch_index).collect();
        assert_eq!(indices, vec![1, 2, 3, 100, 101, 7, 0xFFFF]);
    }

    #[test]
    fn default_encoding_election() {
        let mut map = PatchMap::new([0; 4], "");
        map.add_entry(
            Coverage::from_codepoints(cps(&[1])),
            1,
            PatchEncoding::TableKeyedSharedBrotli,
        )
        .add_entry(
            Coverage::from_codepoints(cps(&[2])),
            2,
            PatchEncoding::TableKeyedSharedBrotli,
        )
        .add_entry(
            Coverage::from_codepoints(cps(&[3])),
            3,
            PatchEncoding::GlyphKeyedBrotli,
        );

        let bytes = serialize(&map, false).unwrap();
        // Default encoding byte sits directly after the format, reserved and
        // id fields.
        assert_eq!(bytes[21], 1);

        // Ties prefer the lower numeric value.
        let mut tied = PatchMap::new([0; 4], "");
        tied.add_entry(
            Coverage::from_codepoints(cps(&[1])),
            1,
            PatchEncoding::PerTableSharedBrotli,
        )
        .add_entry(
            Coverage::from_codepoints(cps(&[2])),
            2,
            PatchEncoding::GlyphKeyedBrotli,
        );
        let bytes = serialize(&tied, false).unwrap();
        assert_eq!(bytes[21], 0);
    }

    #[test]
    fn decodes_skipped_and_ignored_fields() {
        // Hand assembled table exercising the fields the encoder never
        // writes: design space segments, copy indices, and an ignore entry.
        let template = b"ABC";
        let mut data: Vec<u8> = Vec::new();
        data.push(2u8);
        data.extend_from_slice(&0u32.to_be_bytes());
        for word in [1u32, 2, 3, 4] {
            data.extend_from_slice(&word.to_be_bytes());
        }
        data.push(0u8); // default encoding: glyph keyed
        data.extend_from_slice(&4u16.to_be_bytes()); // entry count
        data.extend_from_slice(&((HEADER_MIN_LENGTH + template.len()) as u32).to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&(template.len() as u16).to_be_bytes());
        data.extend_from_slice(template);

        // Entry 1: codepoints {5, 6, 7} via bias 5 + set {0, 1, 2}.
        data.push(CODEPOINT_BIT_MASK);
        data.extend_from_slice(&[0, 0, 5]);
        data.extend_from_slice(&encode_sparse_bit_set(&cps(&[0, 1, 2])));

        // Entry 2: skipped design space + copy indices, explicit delta +3,
        // encoding override.
        data.push(
            DESIGN_SPACE_BIT_MASK | COPY_MAPPINGS_BIT_MASK | INDEX_DELTA_BIT_MASK
                | ENCODING_BIT_MASK,
        );
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        data.extend_from_slice(&3i16.to_be_bytes());
        data.push(2u8);

        // Entry 3: ignored, but still advances the running index.
        data.push(IGNORE_BIT_MASK | CODEPOINT_BIT_MASK);
        data.extend_from_slice(&[0, 0, 0]);
        data.extend_from_slice(&encode_sparse_bit_set(&cps(&[0])));

        // Entry 4: feature coverage only.
        data.push(FEATURES_BIT_MASK);
        data.push(1u8);
        data.extend_from_slice(&Tag::new(b"liga").to_be_bytes());

        let map = deserialize(&data, false).unwrap();
        assert_eq!(map.id(), [1, 2, 3, 4]);
        assert_eq!(map.uri_template(), "ABC");
        assert_eq!(map.entries().len(), 3);

        let e1 = &map.entries()[0];
        assert_eq!(e1.patch_index, 1);
        assert_eq!(e1.coverage.codepoints, cps(&[5, 6, 7]));
        assert_eq!(e1.encoding, PatchEncoding::GlyphKeyedBrotli);

        let e2 = &map.entries()[1];
        assert_eq!(e2.patch_index, 4);
        assert!(e2.coverage.codepoints.is_empty());
        assert_eq!(e2.encoding, PatchEncoding::PerTableSharedBrotli);

        // The ignored entry consumed index 5.
        let e4 = &map.entries()[2];
        assert_eq!(e4.patch_index, 6);
        assert_eq!(e4.coverage.features, [Tag::new(b"liga")].into());
    }

    #[test]
    fn rejects_wrong_format() {
        let mut bytes = serialize(&sample_map(), false).unwrap();
        bytes[0] = 3;
        assert_eq!(
            deserialize(&bytes, false),
            Err(IftError::InvalidFormat("patch map format number is not 2"))
        );
    }

    #[test]
    fn rejects_unknown_encoding() {
        let mut bytes = serialize(&sample_map(), false).unwrap();
        bytes[21] = 3;
        assert_eq!(deserialize(&bytes, false), Err(IftError::UnknownEncoding(3)));
    }

    #[test]
    fn rejects_truncation() {
        let bytes = serialize(&sample_map(), false).unwrap();
        for len in [0, 10, 33, bytes.len() - 1] {
            let result = deserialize(&bytes[..len], false);
            assert!(
                matches!(result, Err(IftError::NotEnoughInput(_))),
                "length {len} produced {result:?}"
            );
        }
    }

    #[test]
    fn rejects_oversized_template() {
        let map = PatchMap::new([0; 4], "x".repeat(0x10000));
        assert_eq!(
            serialize(&map, false),
            Err(IftError::LimitExceeded(
                "exceeded maximum uri template size (0xFFFF)"
            ))
        );
    }

    #[test]
    fn rejects_too_many_entries() {
        let mut map = PatchMap::new([0; 4], "");
        for i in 0..0x10000u32 {
            map.add_entry(
                Coverage::from_codepoints(cps(&[i])),
                i,
                PatchEncoding::GlyphKeyedBrotli,
            );
        }
        assert_eq!(
            serialize(&map, false),
            Err(IftError::LimitExceeded(
                "exceeded maximum number of entries (0xFFFF)"
            ))
        );
    }

    #[test]
    fn rejects_out_of_range_delta() {
        let mut map = PatchMap::new([0; 4], "");
        map.add_entry(
            Coverage::from_codepoints(cps(&[1])),
            0x40000,
            PatchEncoding::GlyphKeyedBrotli,
        );
        assert_eq!(
            serialize(&map, false),
            Err(IftError::LimitExceeded(
                "exceeded max entry index delta (int16)"
            ))
        );
    }
}
