//! Optional Ghostscript pass over the finished PDF.
//!
//! Best effort: the caller logs any error and keeps the uncompressed file.
//! The rewritten file only replaces the original when it is strictly smaller.

use crate::config::CompressLevel;
use crate::error::StreamDocError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Ghostscript executable looked up on `PATH`.
pub const GHOSTSCRIPT: &str = "gs";

/// What the compression pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressOutcome {
    /// The original was replaced by the smaller rewrite.
    Replaced { before: u64, after: u64 },
    /// The rewrite was not smaller; the original is untouched.
    Larger { before: u64, after: u64 },
    /// Ghostscript is not installed.
    Unavailable,
}

/// Arguments passed to Ghostscript for one run.
pub fn ghostscript_args(level: CompressLevel, input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-sDEVICE=pdfwrite".to_string(),
        "-dCompatibilityLevel=1.4".to_string(),
        format!("-dPDFSETTINGS=/{}", level.as_str()),
        "-dNOPAUSE".to_string(),
        "-dBATCH".to_string(),
        "-dQUIET".to_string(),
        format!("-sOutputFile={}", output.display()),
        input.display().to_string(),
    ]
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Rewrite `path` with Ghostscript at `level`.
pub async fn compress_pdf(path: &Path, level: CompressLevel) -> Result<CompressOutcome, StreamDocError> {
    compress_with(GHOSTSCRIPT, path, level).await
}

async fn compress_with(
    program: &str,
    path: &Path,
    level: CompressLevel,
) -> Result<CompressOutcome, StreamDocError> {
    let io_err = |p: &Path| {
        let p = p.to_path_buf();
        move |source| StreamDocError::OutputWriteFailed { path: p, source }
    };
    let tmp = temp_sibling(path);
    let before = tokio::fs::metadata(path).await.map_err(io_err(path))?.len();

    debug!("Running {} with /{} on {}", program, level, path.display());
    let output = match Command::new(program)
        .args(ghostscript_args(level, path, &tmp))
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(CompressOutcome::Unavailable),
        Err(e) => return Err(StreamDocError::Internal(format!("cannot run {program}: {e}"))),
    };

    if !output.status.success() {
        let _ = tokio::fs::remove_file(&tmp).await;
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(StreamDocError::Internal(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let after = match tokio::fs::metadata(&tmp).await {
        Ok(m) => m.len(),
        Err(e) => {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(&tmp)(e));
        }
    };

    if after < before {
        tokio::fs::rename(&tmp, path).await.map_err(io_err(path))?;
        info!(
            "Compressed {}: {} → {} bytes",
            path.display(),
            before,
            after
        );
        Ok(CompressOutcome::Replaced { before, after })
    } else {
        let _ = tokio::fs::remove_file(&tmp).await;
        info!("Compression did not shrink {}; keeping original", path.display());
        Ok(CompressOutcome::Larger { before, after })
    }
}
