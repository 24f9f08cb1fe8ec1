//! # font-locate
//!
//! Find a TrueType font that can render Hangul, so that the invisible text
//! layer of a rebuilt PDF maps every character to a real glyph.
//!
//! ## How it works
//!
//! [`find_font`] walks a fixed resolution order and stops at the first hit:
//!
//! 1. An explicit path supplied by the caller. It must exist; a missing file
//!    is an error rather than a silent fallback.
//! 2. The `STREAMDOC_FONT` environment variable.
//! 3. Well-known NanumGothic install locations (distribution packages and the
//!    per-user font directory).
//! 4. `fc-match -f %{file} :lang=ko`, when fontconfig is installed. Only
//!    `.ttf` results are accepted; collections and CFF-flavoured OpenType
//!    cannot be embedded as `FontFile2`.
//!
//! `Ok(None)` means nothing usable was found and the caller should fall back
//! to a built-in (non-embedded) CID font.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use font_locate::find_font;
//!
//! match find_font(None).expect("explicit path was not given") {
//!     Some(path) => println!("embedding {}", path.display()),
//!     None => println!("falling back to the built-in CID font"),
//! }
//! ```

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Environment variable consulted after an explicit path.
pub const FONT_PATH_ENV: &str = "STREAMDOC_FONT";

/// File name of the preferred font.
pub const PREFERRED_FONT_FILE: &str = "NanumGothic.ttf";

/// System-wide install locations, checked in order.
const SYSTEM_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/TTF/NanumGothic.ttf",
    "/usr/share/fonts/truetype/nanum/NanumGothic.ttf",
    "/usr/share/fonts/nanum-fonts/NanumGothic.ttf",
    "/Library/Fonts/NanumGothic.ttf",
    "C:\\Windows\\Fonts\\NanumGothic.ttf",
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by font-locate operations.
#[derive(Error, Debug)]
pub enum FontLocateError {
    /// The caller named a font file that does not exist.
    #[error("Font not found: '{}'", path.display())]
    NotFound { path: PathBuf },

    /// The file exists but is not something we can embed.
    #[error("Unsupported font file '{}': {reason}", path.display())]
    Unsupported { path: PathBuf, reason: String },
}

// ── Thread-safe singleton discovery cache ────────────────────────────────────

static DISCOVERED: OnceLock<Option<PathBuf>> = OnceLock::new();

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolve the font to embed.
///
/// An `explicit` path bypasses discovery entirely. Without one, the result of
/// discovery is computed once per process.
pub fn find_font(explicit: Option<&Path>) -> Result<Option<PathBuf>, FontLocateError> {
    if let Some(path) = explicit {
        return check_explicit(path).map(Some);
    }
    Ok(DISCOVERED.get_or_init(discover).clone())
}

/// Returns `true` when `path` has a `.ttf` extension (case-insensitive).
pub fn is_truetype_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("ttf"))
}

/// Candidate locations checked by discovery, in order, excluding the
/// environment override and fontconfig.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = SYSTEM_CANDIDATES.iter().map(PathBuf::from).collect();
    if let Some(user_fonts) = dirs::font_dir() {
        paths.push(user_fonts.join(PREFERRED_FONT_FILE));
    }
    if let Some(data) = dirs::data_local_dir() {
        paths.push(data.join("fonts").join(PREFERRED_FONT_FILE));
    }
    paths
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn check_explicit(path: &Path) -> Result<PathBuf, FontLocateError> {
    if !path.is_file() {
        return Err(FontLocateError::NotFound {
            path: path.to_path_buf(),
        });
    }
    if !is_truetype_path(path) {
        return Err(FontLocateError::Unsupported {
            path: path.to_path_buf(),
            reason: "expected a .ttf file".to_string(),
        });
    }
    Ok(path.to_path_buf())
}

fn discover() -> Option<PathBuf> {
    // 1. Environment variable override.
    if let Ok(env_path) = std::env::var(FONT_PATH_ENV) {
        let p = PathBuf::from(env_path);
        if p.is_file() && is_truetype_path(&p) {
            return Some(p);
        }
        // Fall through: env var set but unusable → keep looking.
        eprintln!(
            "font-locate: {FONT_PATH_ENV} '{}' is not a usable .ttf; searching …",
            p.display()
        );
    }

    // 2. Well-known locations.
    if let Some(p) = candidate_paths().into_iter().find(|p| p.is_file()) {
        return Some(p);
    }

    // 3. fontconfig.
    fc_match_korean()
}

/// Ask fontconfig for the best Korean-capable font file.
fn fc_match_korean() -> Option<PathBuf> {
    let output = Command::new("fc-match")
        .args(["-f", "%{file}", ":lang=ko"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_fc_match_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_fc_match_output(stdout: &str) -> Option<PathBuf> {
    let path = PathBuf::from(stdout.trim());
    if path.as_os_str().is_empty() || !is_truetype_path(&path) || !path.is_file() {
        return None;
    }
    Some(path)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_missing_path_is_an_error() {
        let err = find_font(Some(Path::new("/definitely/not/here.ttf"))).unwrap_err();
        assert!(matches!(err, FontLocateError::NotFound { .. }));
        assert!(err.to_string().contains("here.ttf"));
    }

    #[test]
    fn explicit_existing_ttf_is_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("Custom.TTF");
        std::fs::write(&font, b"not really a font").unwrap();
        let found = find_font(Some(&font)).unwrap();
        assert_eq!(found, Some(font));
    }

    #[test]
    fn explicit_non_ttf_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("Custom.ttc");
        std::fs::write(&font, b"collection").unwrap();
        let err = find_font(Some(&font)).unwrap_err();
        assert!(matches!(err, FontLocateError::Unsupported { .. }));
    }

    #[test]
    fn truetype_extension_check() {
        assert!(is_truetype_path(Path::new("a/b/NanumGothic.ttf")));
        assert!(is_truetype_path(Path::new("X.TTF")));
        assert!(!is_truetype_path(Path::new("X.otf")));
        assert!(!is_truetype_path(Path::new("X")));
    }

    #[test]
    fn fc_match_output_is_filtered() {
        assert_eq!(parse_fc_match_output(""), None);
        assert_eq!(parse_fc_match_output("   \n"), None);
        assert_eq!(parse_fc_match_output("/nope/Font.ttc"), None);

        let dir = tempfile::tempdir().unwrap();
        let font = dir.path().join("Found.ttf");
        std::fs::write(&font, b"x").unwrap();
        let stdout = format!("{}\n", font.display());
        assert_eq!(parse_fc_match_output(&stdout), Some(font));
    }

    #[test]
    fn candidates_start_with_system_paths() {
        let paths = candidate_paths();
        assert!(paths.len() >= SYSTEM_CANDIDATES.len());
        assert_eq!(paths[0], PathBuf::from(SYSTEM_CANDIDATES[0]));
        assert!(paths
            .iter()
            .all(|p| p.file_name().unwrap() == PREFERRED_FONT_FILE));
    }
}
