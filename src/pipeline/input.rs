//! Input resolution: validate the intake path before any work starts.
//!
//! Upload transport and MIME checks happen before the pipeline; here we only
//! make sure the file is there and readable so the caller gets a precise
//! error instead of a generic "page 1 failed to rasterise".

use crate::error::ExtractError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve a local PDF path, validating existence and read permission.
pub fn resolve_input(path: impl AsRef<Path>) -> Result<PathBuf, ExtractError> {
    let path = path.as_ref().to_path_buf();

    if !path.is_file() {
        return Err(ExtractError::FileNotFound { path });
    }

    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ExtractError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ExtractError::FileNotFound { path });
        }
    }

    debug!("Resolved local PDF: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_input("/definitely/not/a/real/file.pdf").unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn directory_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_input(dir.path()).unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn existing_file_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("exam.pdf");
        std::fs::write(&p, b"%PDF-1.7").unwrap();
        assert_eq!(resolve_input(&p).unwrap(), p);
    }
}
