//! Best-effort image classification for reply attachments.
//!
//! The responder sends face, signature and fingerprint images with no
//! metadata telling them apart. Categories are guessed from the pixel
//! geometry, falling back to the order the images arrived in. Treat the
//! result as a hint, not a fact.

use std::path::Path;

use tracing::debug;

use crate::defaults;
use crate::models::ImageCategory;
use crate::Result;

// =============================================================================
// BRANDING FILTER
// =============================================================================

/// Discards the responder's watermark/logo image before classification.
#[derive(Debug, Clone)]
pub struct BrandingFilter {
    reference: Option<Vec<u8>>,
    prefix_len: usize,
    min_image_bytes: usize,
}

impl Default for BrandingFilter {
    fn default() -> Self {
        Self {
            reference: None,
            prefix_len: defaults::BRANDING_PREFIX_LEN,
            min_image_bytes: defaults::MIN_IMAGE_BYTES,
        }
    }
}

impl BrandingFilter {
    /// Filter with only the size threshold active.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter comparing against a known branding image.
    pub fn with_reference(mut self, reference: Vec<u8>) -> Self {
        self.reference = if reference.is_empty() {
            None
        } else {
            Some(reference)
        };
        self
    }

    pub fn with_prefix_len(mut self, prefix_len: usize) -> Self {
        self.prefix_len = prefix_len.max(1);
        self
    }

    pub fn with_min_image_bytes(mut self, min_image_bytes: usize) -> Self {
        self.min_image_bytes = min_image_bytes;
        self
    }

    /// Load the reference image from a file.
    pub fn load_reference(self, path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(self.with_reference(bytes))
    }

    /// Build from `BRANDING_IMAGE_PATH`. A missing or unreadable file leaves
    /// only the size threshold active.
    pub fn from_env() -> Self {
        let filter = Self::default();
        match std::env::var(defaults::ENV_BRANDING_IMAGE_PATH) {
            Ok(path) if !path.trim().is_empty() => match filter.clone().load_reference(&path) {
                Ok(loaded) => loaded,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path, "Failed to load branding reference image");
                    filter
                }
            },
            _ => filter,
        }
    }

    pub fn has_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// True for undersized images and for images sharing the reference's
    /// leading bytes.
    pub fn is_branding(&self, data: &[u8]) -> bool {
        if data.len() < self.min_image_bytes {
            return true;
        }
        match &self.reference {
            Some(reference) => {
                let n = self.prefix_len.min(reference.len());
                data.len() >= n && data[..n] == reference[..n]
            }
            None => false,
        }
    }
}

// =============================================================================
// CATEGORY CLASSIFICATION
// =============================================================================

/// Geometry thresholds for [`classify`].
#[derive(Debug, Clone, Copy)]
pub struct ClassifierThresholds {
    pub face_min_height: u32,
    pub face_min_square_side: u32,
    pub signature_min_aspect: f64,
    pub signature_max_width: u32,
    pub square_aspect_min: f64,
    pub square_aspect_max: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            face_min_height: defaults::FACE_MIN_HEIGHT,
            face_min_square_side: defaults::FACE_MIN_SQUARE_SIDE,
            signature_min_aspect: defaults::SIGNATURE_MIN_ASPECT,
            signature_max_width: defaults::SIGNATURE_MAX_WIDTH,
            square_aspect_min: defaults::SQUARE_ASPECT_MIN,
            square_aspect_max: defaults::SQUARE_ASPECT_MAX,
        }
    }
}

/// Classify with default thresholds.
pub fn classify(data: &[u8], artifact_count: usize) -> ImageCategory {
    classify_with(data, artifact_count, &ClassifierThresholds::default())
}

/// Guess the category of an image.
///
/// Rules, first match wins:
/// 1. portrait above the minimum height, or large near-square → face
/// 2. wide strip no wider than the maximum → signature
/// 3. small near-square → fingerprint
/// 4. ordinal fallback on `artifact_count` (also used when decoding fails)
pub fn classify_with(
    data: &[u8],
    artifact_count: usize,
    t: &ClassifierThresholds,
) -> ImageCategory {
    let Some((width, height)) = image_dimensions(data).filter(|(w, h)| *w > 0 && *h > 0) else {
        debug!(
            size_bytes = data.len(),
            artifact_count, "Undecodable image, using ordinal category"
        );
        return ImageCategory::from_ordinal(artifact_count);
    };

    let aspect = width as f64 / height as f64;
    let near_square = aspect >= t.square_aspect_min && aspect <= t.square_aspect_max;

    let category = if (height > width && height >= t.face_min_height)
        || (near_square && width.min(height) >= t.face_min_square_side)
    {
        ImageCategory::Face
    } else if aspect >= t.signature_min_aspect && width <= t.signature_max_width {
        ImageCategory::Signature
    } else if near_square {
        ImageCategory::Fingerprint
    } else {
        ImageCategory::from_ordinal(artifact_count)
    };

    debug!(width, height, aspect, ?category, "Classified image");
    category
}

/// Detect image dimensions from common image format headers.
///
/// The format is sniffed from magic bytes. Supports PNG, JPEG, GIF and WebP.
/// Returns (width, height) if successful, None otherwise.
pub fn image_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mime = infer::get(data)?.mime_type();

    match mime {
        // PNG: IHDR width at offset 16-19, height at offset 20-23
        "image/png" if data.len() >= 24 => {
            let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
            let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
            Some((width, height))
        }
        "image/jpeg" => jpeg_dimensions(data),
        // GIF: logical screen width at offset 6-7, height at offset 8-9
        "image/gif" if data.len() >= 10 => {
            let width = u16::from_le_bytes([data[6], data[7]]) as u32;
            let height = u16::from_le_bytes([data[8], data[9]]) as u32;
            Some((width, height))
        }
        "image/webp" => webp_dimensions(data),
        _ => None,
    }
}

/// Walk the marker segments to the first baseline, extended or progressive
/// start-of-frame. Segments are skipped by their length field, so an EXIF
/// thumbnail inside APP1 is never mistaken for the main frame.
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.get(0..2)? != [0xFF, 0xD8] {
        return None;
    }
    let mut i = 2;
    while i + 3 < data.len() {
        if data[i] != 0xFF {
            return None;
        }
        let marker = data[i + 1];
        match marker {
            // fill byte
            0xFF => i += 1,
            // standalone markers carry no length
            0x01 | 0xD0..=0xD7 => i += 2,
            // start of scan: no frame header before the image data
            0xD9 | 0xDA => return None,
            _ => {
                let len = u16::from_be_bytes([data[i + 2], data[i + 3]]) as usize;
                if matches!(marker, 0xC0..=0xC2) {
                    // height at offset +5, width at offset +7
                    let frame = data.get(i + 5..i + 9)?;
                    let height = u16::from_be_bytes([frame[0], frame[1]]) as u32;
                    let width = u16::from_be_bytes([frame[2], frame[3]]) as u32;
                    return Some((width, height));
                }
                if len < 2 {
                    return None;
                }
                i += 2 + len;
            }
        }
    }
    None
}

fn webp_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 30 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return None;
    }
    match &data[12..16] {
        // VP8 (lossy)
        b"VP8 " => {
            let width = u16::from_le_bytes([data[26], data[27]]) as u32 & 0x3FFF;
            let height = u16::from_le_bytes([data[28], data[29]]) as u32 & 0x3FFF;
            Some((width, height))
        }
        // VP8L (lossless)
        b"VP8L" => {
            let bits = u32::from_le_bytes([data[21], data[22], data[23], data[24]]);
            let width = (bits & 0x3FFF) + 1;
            let height = ((bits >> 14) & 0x3FFF) + 1;
            Some((width, height))
        }
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal PNG header padded to `size` bytes.
    pub(crate) fn png(width: u32, height: u32, size: usize) -> Vec<u8> {
        let mut data = vec![0u8; size.max(24)];
        data[0..8].copy_from_slice(b"\x89PNG\r\n\x1a\n");
        data[8..16].copy_from_slice(b"\x00\x00\x00\x0dIHDR");
        data[16..20].copy_from_slice(&width.to_be_bytes());
        data[20..24].copy_from_slice(&height.to_be_bytes());
        data
    }

    fn gif(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0u8; 4096];
        data[0..6].copy_from_slice(b"GIF89a");
        data[6..8].copy_from_slice(&width.to_le_bytes());
        data[8..10].copy_from_slice(&height.to_le_bytes());
        data
    }

    fn jpeg(width: u16, height: u16, sof: u8) -> Vec<u8> {
        let mut data = vec![0u8; 4096];
        // SOI, then a 16-byte APP0 segment ending at offset 20
        data[0..6].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]);
        data[20] = 0xFF;
        data[21] = sof;
        data[25..27].copy_from_slice(&height.to_be_bytes());
        data[27..29].copy_from_slice(&width.to_be_bytes());
        data
    }

    #[test]
    fn test_detect_png_dimensions() {
        assert_eq!(image_dimensions(&png(100, 200, 24)), Some((100, 200)));
    }

    #[test]
    fn test_detect_gif_dimensions() {
        assert_eq!(image_dimensions(&gif(320, 240)), Some((320, 240)));
    }

    #[test]
    fn test_detect_jpeg_dimensions_baseline_and_progressive() {
        assert_eq!(image_dimensions(&jpeg(640, 480, 0xC0)), Some((640, 480)));
        assert_eq!(image_dimensions(&jpeg(300, 400, 0xC2)), Some((300, 400)));
    }

    /// JPEG whose APP1 segment embeds a thumbnail with its own frame header.
    fn jpeg_with_thumbnail(width: u16, height: u16) -> Vec<u8> {
        let mut thumb = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08];
        thumb.extend_from_slice(&120u16.to_be_bytes());
        thumb.extend_from_slice(&160u16.to_be_bytes());
        thumb.extend_from_slice(&[0u8; 10]);

        let mut data = vec![0xFF, 0xD8, 0xFF, 0xE1];
        data.extend_from_slice(&((thumb.len() + 8) as u16).to_be_bytes());
        data.extend_from_slice(b"Exif\0\0");
        data.extend_from_slice(&thumb);
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.resize(4096, 0);
        data
    }

    #[test]
    fn test_jpeg_dimensions_skip_exif_thumbnail() {
        let photo = jpeg_with_thumbnail(300, 400);
        assert_eq!(image_dimensions(&photo), Some((300, 400)));
        assert_eq!(classify(&photo, 2), ImageCategory::Face);
    }

    #[test]
    fn test_truncated_jpeg_has_no_dimensions() {
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x00]), None);
        assert_eq!(jpeg_dimensions(&[0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 0x08]), None);
    }

    #[test]
    fn test_detect_dimensions_invalid_data() {
        assert_eq!(image_dimensions(b"not an image"), None);
        assert_eq!(image_dimensions(b""), None);
    }

    #[test]
    fn test_portrait_is_face() {
        assert_eq!(classify(&png(300, 400, 4096), 2), ImageCategory::Face);
        assert_eq!(classify(&jpeg(240, 320, 0xC0), 3), ImageCategory::Face);
    }

    #[test]
    fn test_large_square_is_face() {
        assert_eq!(classify(&png(500, 480, 4096), 1), ImageCategory::Face);
    }

    #[test]
    fn test_wide_narrow_is_signature() {
        assert_eq!(classify(&png(600, 150, 4096), 0), ImageCategory::Signature);
        assert_eq!(classify(&gif(400, 100), 3), ImageCategory::Signature);
    }

    #[test]
    fn test_small_square_is_fingerprint() {
        assert_eq!(classify(&png(200, 190, 4096), 0), ImageCategory::Fingerprint);
    }

    #[test]
    fn test_unmatched_geometry_uses_ordinal() {
        // Landscape but too wide for a signature strip, not square.
        let data = png(2000, 1000, 4096);
        assert_eq!(classify(&data, 0), ImageCategory::Face);
        assert_eq!(classify(&data, 1), ImageCategory::Signature);
        assert_eq!(classify(&data, 2), ImageCategory::Fingerprint);
    }

    #[test]
    fn test_undecodable_uses_ordinal() {
        let garbage = vec![0x42u8; 4096];
        assert_eq!(classify(&garbage, 0), ImageCategory::Face);
        assert_eq!(classify(&garbage, 1), ImageCategory::Signature);
        assert_eq!(classify(&garbage, 3), ImageCategory::Fingerprint);
    }

    #[test]
    fn test_zero_dimensions_use_ordinal() {
        assert_eq!(classify(&png(0, 0, 4096), 1), ImageCategory::Signature);
    }

    #[test]
    fn test_small_portrait_is_not_face() {
        // Below the face height: falls through to ordinal.
        assert_eq!(classify(&png(100, 150, 4096), 2), ImageCategory::Fingerprint);
    }

    #[test]
    fn test_branding_filters_undersized_images() {
        let filter = BrandingFilter::new();
        assert!(filter.is_branding(&png(300, 400, 512)));
        assert!(filter.is_branding(b""));
        assert!(!filter.is_branding(&png(300, 400, 4096)));
    }

    #[test]
    fn test_branding_filters_identical_image() {
        let logo = png(128, 128, 8192);
        let filter = BrandingFilter::new().with_reference(logo.clone());
        assert!(filter.has_reference());
        assert!(filter.is_branding(&logo));
    }

    #[test]
    fn test_branding_filters_prefix_identical_image() {
        let logo = png(128, 128, 8192);
        let mut recompressed = logo[..defaults::BRANDING_PREFIX_LEN].to_vec();
        recompressed.extend(std::iter::repeat(0xAB).take(5000));
        let filter = BrandingFilter::new().with_reference(logo);
        assert!(filter.is_branding(&recompressed));
    }

    #[test]
    fn test_branding_keeps_different_image() {
        let filter = BrandingFilter::new().with_reference(png(128, 128, 8192));
        assert!(!filter.is_branding(&png(300, 400, 8192)));
    }

    #[test]
    fn test_branding_short_reference_compares_its_whole_length() {
        let reference = png(10, 10, 64);
        let filter = BrandingFilter::new()
            .with_reference(reference.clone())
            .with_min_image_bytes(0);
        let mut longer = reference.clone();
        longer.extend([1u8; 100]);
        assert!(filter.is_branding(&longer));
    }

    #[test]
    fn test_empty_reference_is_ignored() {
        let filter = BrandingFilter::new().with_reference(Vec::new());
        assert!(!filter.has_reference());
    }

    #[test]
    fn test_load_reference_missing_file_errors() {
        let result = BrandingFilter::new().load_reference("/nonexistent/relay/logo.png");
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
