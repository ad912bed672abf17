//! Error type shared by the patch map codecs and the patch applier.

use std::error::Error;
use std::fmt;

/// An error raised while decoding, encoding, or applying incremental font
/// transfer data.
///
/// Every variant carries enough context to identify the failing input. No
/// operation in this crate returns partial results: on error all outputs are
/// discarded by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IftError {
    /// A required table or glyph was absent from the font.
    NotFound(&'static str),
    /// Input bytes ended before the structure being decoded was complete.
    NotEnoughInput(&'static str),
    /// A format number or field ordering constraint was violated.
    InvalidFormat(&'static str),
    /// A patch encoding byte outside of the closed set {0, 1, 2}.
    UnknownEncoding(u8),
    /// An encoder-side limit (entry count, template length, ...) was exceeded.
    LimitExceeded(&'static str),
    /// A patch carried an id that does not match the font's patch map id.
    IdMismatch {
        font_id: [u32; 4],
        patch_id: [u32; 4],
    },
    /// Two patches in one application batch claim the same glyph id.
    OverlappingPatches(u32),
}

impl fmt::Display for IftError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IftError::NotFound(what) => write!(f, "Not found: {what}."),
            IftError::NotEnoughInput(what) => {
                write!(f, "Not enough input data while reading {what}.")
            }
            IftError::InvalidFormat(what) => write!(f, "Invalid format: {what}."),
            IftError::UnknownEncoding(value) => {
                write!(f, "Unrecognized patch encoding value: {value}.")
            }
            IftError::LimitExceeded(what) => write!(f, "Limit exceeded: {what}."),
            IftError::IdMismatch { font_id, patch_id } => write!(
                f,
                "Patch id {patch_id:08x?} does not match font id {font_id:08x?}."
            ),
            IftError::OverlappingPatches(gid) => {
                write!(f, "Multiple patches in the batch claim glyph id {gid}.")
            }
        }
    }
}

impl Error for IftError {}

impl From<shared_brotli_patch_decoder::decode_error::DecodeError> for IftError {
    fn from(value: shared_brotli_patch_decoder::decode_error::DecodeError) -> Self {
        use shared_brotli_patch_decoder::decode_error::DecodeError::*;
        match value {
            InitFailure => IftError::InvalidFormat("failure to init brotli decoder"),
            InvalidStream => IftError::InvalidFormat("malformed brotli stream"),
            InvalidDictionary => IftError::InvalidFormat("malformed brotli dictionary"),
            MaxSizeExceeded => IftError::InvalidFormat("brotli stream exceeds declared size"),
            ExcessInputData => IftError::InvalidFormat("brotli stream has excess bytes"),
            IoError(_) => IftError::InvalidFormat("io error while decoding brotli stream"),
        }
    }
}
