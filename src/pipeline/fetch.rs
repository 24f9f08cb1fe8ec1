//! Resource fetching: one page image or one page's text blocks per call.
//!
//! [`PageSource`] is the seam between the scheduler and the network. The
//! HTTP implementation lives in [`crate::streamdocs::StreamDocsClient`];
//! tests substitute an in-process fake.
//!
//! ## Byte repair
//!
//! The viewer service corrupts the first byte of every rendered image as an
//! anti-scraping measure. [`repair_image_bytes`] restores the magic byte from
//! the declared content type before the payload is cached, so cached images
//! are always the repaired form.

use crate::error::StreamDocError;
use crate::model::{DocumentId, PageText};
use std::future::Future;

/// First byte of a PNG signature.
pub const PNG_MAGIC: u8 = 0x89;
/// First byte of a JPEG SOI marker.
pub const JPEG_MAGIC: u8 = 0xFF;

/// A remote source of per-page artifacts. No retry is performed here;
/// failures go straight back to the caller.
pub trait PageSource: Sync {
    /// Fetch the rendered raster of one page, already byte-repaired.
    fn fetch_image(
        &self,
        doc: &DocumentId,
        page_index: usize,
        zoom: u32,
    ) -> impl Future<Output = Result<Vec<u8>, StreamDocError>> + Send;

    /// Fetch the text blocks of one page.
    fn fetch_text(
        &self,
        doc: &DocumentId,
        page_index: usize,
    ) -> impl Future<Output = Result<PageText, StreamDocError>> + Send;
}

/// Restore the deliberately corrupted leading byte of an image payload.
///
/// `png` in the content type sets byte 0 to `0x89`; any `jp` (jpeg, jpg,
/// pjpeg) sets it to `0xFF`; anything else passes through untouched.
pub fn repair_image_bytes(mut data: Vec<u8>, content_type: &str) -> Vec<u8> {
    let ct = content_type.to_ascii_lowercase();
    let magic = if ct.contains("png") {
        Some(PNG_MAGIC)
    } else if ct.contains("jp") {
        Some(JPEG_MAGIC)
    } else {
        None
    };
    if let (Some(magic), Some(first)) = (magic, data.first_mut()) {
        *first = magic;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_sets_first_byte_only() {
        let out = repair_image_bytes(vec![0x00, b'P', b'N', b'G'], "image/png");
        assert_eq!(out, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn jpeg_variants_set_ff() {
        for ct in ["image/jpeg", "image/jpg", "IMAGE/JPEG", "image/pjpeg"] {
            let out = repair_image_bytes(vec![0x01, 0xD8, 0xFF], ct);
            assert_eq!(out, vec![0xFF, 0xD8, 0xFF], "content type {ct}");
        }
    }

    #[test]
    fn other_types_are_identity() {
        let data = vec![0x42, 0x01, 0x02];
        assert_eq!(
            repair_image_bytes(data.clone(), "application/octet-stream"),
            data
        );
        assert_eq!(repair_image_bytes(data.clone(), ""), data);
    }

    #[test]
    fn empty_payload_is_untouched() {
        assert!(repair_image_bytes(Vec::new(), "image/png").is_empty());
    }
}
