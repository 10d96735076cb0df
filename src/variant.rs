// ABOUTME: Image request parsing and variant parameter resolution
// ABOUTME: Derives the deterministic cache key for resized variants

use url::form_urlencoded;

use crate::error::ResizeError;

/// Default requested width when `w` is absent or unparseable
pub const DEFAULT_WIDTH: u32 = 250;

/// Default requested quality when `q` is absent or unparseable
pub const DEFAULT_QUALITY: i32 = 6;

/// Widths are quantized down to the nearest lower multiple of this step
const WIDTH_STEP: u32 = 250;

/// Placeholders are a single shared variant per image
const PLACEHOLDER_WIDTH: u32 = 16;
const PLACEHOLDER_QUALITY: u32 = 2;

/// Requested presentation of an image (`f` query parameter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// The untouched original, served straight from the source bucket
    Raw,
    /// Square thumbnail, cover-scaled and center-cropped
    Thumb,
    /// Tiny square stand-in rendered while the real asset loads
    Placeholder,
    /// Aspect-preserving resize to a target width
    Scaled,
}

impl Variant {
    pub fn parse(value: &str) -> Option<Variant> {
        match value {
            "raw" => Some(Variant::Raw),
            "thumb" => Some(Variant::Thumb),
            "placeholder" => Some(Variant::Placeholder),
            "scaled" => Some(Variant::Scaled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Raw => "raw",
            Variant::Thumb => "thumb",
            Variant::Placeholder => "placeholder",
            Variant::Scaled => "scaled",
        }
    }
}

/// A validated incoming request: source key plus requested presentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Slash-separated key of the original in the photos bucket
    pub original_path: String,
    pub variant: Variant,
    /// Requested width, before quantization
    pub width: u32,
    /// Requested quality, before clamping
    pub quality: i32,
}

/// Width and quality actually used for transcoding and key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedParams {
    pub width: u32,
    pub quality: u32,
}

/// Decode the request path and query string into an [`ImageRequest`].
///
/// The leading path separator is stripped to obtain the source key. `f`
/// defaults to `raw`; an unknown value is rejected here, before any
/// storage access. `w` and `q` fall back to their defaults when absent or
/// unparseable. The first occurrence of each parameter wins.
pub fn parse_image_request(path: &str, query: &str) -> Result<ImageRequest, ResizeError> {
    let original_path = path.trim_start_matches('/').to_string();

    let mut f: Option<String> = None;
    let mut w: Option<String> = None;
    let mut q: Option<String> = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "f" if f.is_none() => f = Some(value.into_owned()),
            "w" if w.is_none() => w = Some(value.into_owned()),
            "q" if q.is_none() => q = Some(value.into_owned()),
            _ => {}
        }
    }

    let variant = match f.as_deref() {
        None => Variant::Raw,
        Some(value) => Variant::parse(value)
            .ok_or_else(|| ResizeError::InvalidVariant(value.to_string()))?,
    };

    let width = w.and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_WIDTH);
    let quality = q.and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_QUALITY);

    Ok(ImageRequest {
        original_path,
        variant,
        width,
        quality,
    })
}

/// Normalize requested width and quality for a variant.
///
/// Pure: identical inputs always resolve identically. Placeholders ignore
/// the requested values entirely so every placeholder request for an image
/// lands on one cached object.
pub fn resolve_params(variant: Variant, requested_width: u32, requested_quality: i32) -> ResolvedParams {
    if variant == Variant::Placeholder {
        return ResolvedParams {
            width: PLACEHOLDER_WIDTH,
            quality: PLACEHOLDER_QUALITY,
        };
    }
    ResolvedParams {
        width: (requested_width / WIDTH_STEP) * WIDTH_STEP,
        quality: requested_quality.clamp(1, 10) as u32,
    }
}

/// Derive the derived-bucket key for a resolved variant:
/// `{dir}/{stem}.{variant}-{width}-{quality}.webp`.
///
/// The stem is the basename minus its final extension. Distinct originals
/// whose directory and stem collide after this normalization share a key;
/// an accepted limitation.
pub fn derive_cache_key(original_path: &str, variant: Variant, params: &ResolvedParams) -> String {
    let (dir, file) = match original_path.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", original_path),
    };
    let stem = match file.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file,
    };
    if dir.is_empty() {
        format!("{}.{}-{}-{}.webp", stem, variant.as_str(), params.width, params.quality)
    } else {
        format!(
            "{}/{}.{}-{}-{}.webp",
            dir,
            stem,
            variant.as_str(),
            params.width,
            params.quality
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_raw() {
        let req = parse_image_request("/2023-12-10/1000013814-01.jpeg", "").unwrap();
        assert_eq!(req.original_path, "2023-12-10/1000013814-01.jpeg");
        assert_eq!(req.variant, Variant::Raw);
        assert_eq!(req.width, DEFAULT_WIDTH);
        assert_eq!(req.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn test_parse_explicit_parameters() {
        let req = parse_image_request("/2023-12-10/1000013814-01.jpeg", "f=thumb&w=500&q=8").unwrap();
        assert_eq!(req.variant, Variant::Thumb);
        assert_eq!(req.width, 500);
        assert_eq!(req.quality, 8);
    }

    #[test]
    fn test_parse_rejects_unknown_variant() {
        let err = parse_image_request("/x.jpeg", "f=bogus").unwrap_err();
        assert!(matches!(err, ResizeError::InvalidVariant(v) if v == "bogus"));
    }

    #[test]
    fn test_parse_rejects_empty_variant_value() {
        let err = parse_image_request("/x.jpeg", "f=").unwrap_err();
        assert!(matches!(err, ResizeError::InvalidVariant(v) if v.is_empty()));
    }

    #[test]
    fn test_parse_first_occurrence_wins() {
        let req = parse_image_request("/x.jpeg", "f=thumb&f=scaled&w=250&w=750").unwrap();
        assert_eq!(req.variant, Variant::Thumb);
        assert_eq!(req.width, 250);
    }

    #[test]
    fn test_parse_unparseable_numbers_use_defaults() {
        let req = parse_image_request("/x.jpeg", "f=scaled&w=wide&q=best").unwrap();
        assert_eq!(req.width, DEFAULT_WIDTH);
        assert_eq!(req.quality, DEFAULT_QUALITY);
    }

    #[test]
    fn test_parse_raw_keeps_supplied_values_but_stays_raw() {
        let req = parse_image_request("/x.jpeg", "f=raw&w=900&q=2").unwrap();
        assert_eq!(req.variant, Variant::Raw);
    }

    #[test]
    fn test_width_quantizes_to_lower_step() {
        for (requested, expected) in [(0, 0), (1, 0), (249, 0), (250, 250), (499, 250), (500, 500), (999, 750)] {
            let params = resolve_params(Variant::Thumb, requested, 6);
            assert_eq!(params.width, expected, "requested width {}", requested);
        }
    }

    #[test]
    fn test_quality_clamps_to_one_through_ten() {
        for (requested, expected) in [(-3, 1), (0, 1), (1, 1), (6, 6), (10, 10), (99, 10)] {
            let params = resolve_params(Variant::Scaled, 250, requested);
            assert_eq!(params.quality, expected, "requested quality {}", requested);
        }
    }

    #[test]
    fn test_placeholder_ignores_requested_values() {
        let params = resolve_params(Variant::Placeholder, 999, 10);
        assert_eq!(params.width, 16);
        assert_eq!(params.quality, 2);
    }

    #[test]
    fn test_cache_key_shape() {
        let params = resolve_params(Variant::Thumb, 500, 8);
        let key = derive_cache_key("2023-12-10/1000013814-01.jpeg", Variant::Thumb, &params);
        assert_eq!(key, "2023-12-10/1000013814-01.thumb-500-8.webp");
    }

    #[test]
    fn test_cache_key_for_root_level_original() {
        let params = resolve_params(Variant::Placeholder, 999, 10);
        let key = derive_cache_key("x.jpeg", Variant::Placeholder, &params);
        assert_eq!(key, "x.placeholder-16-2.webp");
    }

    #[test]
    fn test_cache_key_without_extension() {
        let params = resolve_params(Variant::Scaled, 250, 6);
        let key = derive_cache_key("2023/scan", Variant::Scaled, &params);
        assert_eq!(key, "2023/scan.scaled-250-6.webp");
    }

    #[test]
    fn test_cache_key_keeps_inner_dots() {
        let params = resolve_params(Variant::Thumb, 250, 6);
        let key = derive_cache_key("2023/archive.tar.gz", Variant::Thumb, &params);
        assert_eq!(key, "2023/archive.tar.thumb-250-6.webp");
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let params = resolve_params(Variant::Scaled, 750, 4);
        let a = derive_cache_key("2023-12-10/a.jpeg", Variant::Scaled, &params);
        let b = derive_cache_key("2023-12-10/a.jpeg", Variant::Scaled, &params);
        assert_eq!(a, b);
    }
}
