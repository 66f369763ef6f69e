//! Image payload inspection helpers
//!
//! Placement decisions need the encoded size before encoding anything, and
//! content types are sniffed from magic bytes rather than trusted from the
//! source's metadata.

/// Image container format recognized from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PNG (`\x89PNG\r\n\x1a\n`)
    Png,
    /// JPEG (`\xFF\xD8\xFF`)
    Jpeg,
    /// Anything else
    Unknown,
}

impl ImageFormat {
    /// Sniff the format from the payload's leading bytes
    #[must_use]
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Self::Png
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Self::Jpeg
        } else {
            Self::Unknown
        }
    }

    /// MIME type for the format, when recognized
    #[must_use]
    pub fn content_type(self) -> Option<&'static str> {
        match self {
            Self::Png => Some("image/png"),
            Self::Jpeg => Some("image/jpeg"),
            Self::Unknown => None,
        }
    }
}

/// Exact base64 length of `raw_len` input bytes (standard padding)
///
/// Lets the placement decision run off a `head` metadata read without
/// downloading or encoding the payload first.
#[must_use]
pub fn base64_encoded_len(raw_len: u64) -> u64 {
    raw_len.div_ceil(3) * 4
}
