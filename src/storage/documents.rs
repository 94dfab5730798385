use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::utils::TravelError;

/// Where scanned documents are fetched from by reference.
pub trait DocumentSource: Send + Sync {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, TravelError>;
}

/// Documents stored as files below a root directory; references are relative paths.
#[derive(Debug, Clone)]
pub struct FsDocumentSource {
    root: PathBuf,
}

impl FsDocumentSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        FsDocumentSource {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, TravelError> {
        let relative = Path::new(reference);
        let stays_inside = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if reference.is_empty() || !stays_inside {
            return Err(TravelError::DocumentNotFound(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl DocumentSource for FsDocumentSource {
    fn fetch(&self, reference: &str) -> Result<Vec<u8>, TravelError> {
        let path = self.resolve(reference)?;
        fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TravelError::DocumentNotFound(reference.to_string()),
            _ => TravelError::Io(e),
        })
    }
}

/// Declared MIME type from a file extension; unknown extensions are passed through
/// so the input checks reject them.
pub fn mime_type_for_path(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg".to_string(),
        "png" => "image/png".to_string(),
        "tif" | "tiff" => "image/tiff".to_string(),
        other => format!("application/x-{}", if other.is_empty() { "unknown" } else { other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_relative_reference() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("scans")).unwrap();
        fs::write(dir.path().join("scans/page1.png"), b"bytes").unwrap();

        let source = FsDocumentSource::new(dir.path());
        assert_eq!(source.fetch("scans/page1.png").unwrap(), b"bytes");
        assert!(matches!(source.fetch("scans/missing.png"), Err(TravelError::DocumentNotFound(_))));
    }

    #[test]
    fn test_reference_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsDocumentSource::new(dir.path());
        assert!(matches!(source.fetch("../secret.png"), Err(TravelError::DocumentNotFound(_))));
        assert!(matches!(source.fetch("/etc/passwd"), Err(TravelError::DocumentNotFound(_))));
    }

    #[test]
    fn test_mime_type_for_path() {
        assert_eq!(mime_type_for_path(Path::new("a/stamp.JPG")), "image/jpeg");
        assert_eq!(mime_type_for_path(Path::new("scan.tif")), "image/tiff");
        assert_eq!(mime_type_for_path(Path::new("notes.pdf")), "application/x-pdf");
    }
}
