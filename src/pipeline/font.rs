//! Font provider for the invisible text layer.
//!
//! Discovery is delegated to the `font-locate` crate. The file it returns is
//! validated with `ttf-parser` here, since only glyf-outline TrueType can be
//! embedded as `FontFile2`. When nothing usable turns up the overlay uses
//! the non-embedded Korean CID font every conforming reader ships with.

use crate::error::StreamDocError;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

/// Built-in Adobe-Korea1 font used when no TrueType file is available.
pub const BUILTIN_CID_FONT: &str = "HYSMyeongJo-Medium";

/// Font chosen for the overlay.
#[derive(Clone, PartialEq)]
pub enum OverlayFont {
    /// An embeddable TrueType file.
    TrueType { name: String, data: Vec<u8> },
    /// [`BUILTIN_CID_FONT`] with the `UniKS-UCS2-H` encoding. BMP only.
    BuiltinCid,
}

impl OverlayFont {
    /// PostScript name written as `/BaseFont`.
    pub fn base_font_name(&self) -> &str {
        match self {
            OverlayFont::TrueType { name, .. } => name,
            OverlayFont::BuiltinCid => BUILTIN_CID_FONT,
        }
    }
}

impl fmt::Debug for OverlayFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayFont::TrueType { name, data } => f
                .debug_struct("TrueType")
                .field("name", name)
                .field("bytes", &data.len())
                .finish(),
            OverlayFont::BuiltinCid => f.write_str("BuiltinCid"),
        }
    }
}

/// Pick the overlay font.
///
/// An `explicit` path that is missing or not a usable TrueType file is
/// [`StreamDocError::AssetUnavailable`]. A discovered file that fails
/// validation only logs a warning and falls back to [`OverlayFont::BuiltinCid`].
pub fn resolve_overlay_font(explicit: Option<&Path>) -> Result<OverlayFont, StreamDocError> {
    let path = match font_locate::find_font(explicit) {
        Ok(Some(path)) => path,
        Ok(None) => {
            info!("No TrueType font found; using built-in {}", BUILTIN_CID_FONT);
            return Ok(OverlayFont::BuiltinCid);
        }
        Err(e) => {
            return Err(StreamDocError::AssetUnavailable {
                detail: e.to_string(),
            })
        }
    };

    let loaded = std::fs::read(&path)
        .map_err(|e| format!("cannot read '{}': {e}", path.display()))
        .and_then(|data| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            parse_truetype(data, &stem)
        });

    match loaded {
        Ok(font) => {
            info!("Text layer font: {} ({})", font.base_font_name(), path.display());
            Ok(font)
        }
        Err(detail) if explicit.is_some() => Err(StreamDocError::AssetUnavailable { detail }),
        Err(detail) => {
            warn!("{}; using built-in {}", detail, BUILTIN_CID_FONT);
            Ok(OverlayFont::BuiltinCid)
        }
    }
}

/// Validate raw font bytes and derive a `/BaseFont` name.
pub fn parse_truetype(data: Vec<u8>, fallback_name: &str) -> Result<OverlayFont, String> {
    let name = {
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|e| format!("'{fallback_name}' is not a TrueType font: {e}"))?;
        if face.tables().glyf.is_none() {
            return Err(format!(
                "'{fallback_name}' has no glyf table and cannot be embedded"
            ));
        }
        face.names()
            .into_iter()
            .filter(|n| n.name_id == ttf_parser::name_id::POST_SCRIPT_NAME)
            .find_map(|n| n.to_string())
            .map(|n| sanitize_font_name(&n))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| sanitize_font_name(fallback_name))
    };
    let name = if name.is_empty() {
        "OverlayFont".to_string()
    } else {
        name
    };
    Ok(OverlayFont::TrueType { name, data })
}

/// PDF names must not carry whitespace or delimiters.
fn sanitize_font_name(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
