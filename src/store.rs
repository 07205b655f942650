//! Page-image lookup and figure-artifact persistence.
//!
//! ## Layout on disk
//!
//! ```text
//! <data_dir>/
//!   <document_id>.json            document metadata ("total_pages")
//!   images/<document_id>/page_<n>.png
//!   figures/<document_id>/<stem>_<uuid>.png
//! ```
//!
//! Rasterisation and metadata persistence belong to the host application;
//! this module only reads the page images it produced and owns the
//! `figures/` tree. Figure artifacts belong to their document:
//! [`FigureStore::delete_document`] removes them all.

use crate::error::{CropError, LocateError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Page-image lookup provided by the host application.
pub trait PageSource: Send + Sync {
    /// Number of pages, or `None` when the document is unknown.
    fn page_count(&self, document_id: &str) -> Option<usize>;

    /// Path to the rasterised image of a 1-indexed page.
    fn page_image(&self, document_id: &str, page_number: usize) -> Option<PathBuf>;
}

/// True when `id` can be used as a single directory name.
pub fn is_valid_segment(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0'])
}

/// [`PageSource`] over the host's `images/<document_id>/page_<n>.png` tree.
#[derive(Debug, Clone)]
pub struct DirectoryPageStore {
    root: PathBuf,
}

impl DirectoryPageStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    fn page_path(&self, document_id: &str, page_number: usize) -> PathBuf {
        self.root
            .join("images")
            .join(document_id)
            .join(format!("page_{}.png", page_number))
    }

    /// `total_pages` from the document's metadata file, when present.
    fn metadata_page_count(&self, document_id: &str) -> Option<usize> {
        let path = self.root.join(format!("{}.json", document_id));
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => value
                .get("total_pages")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize),
            Err(e) => {
                warn!("Ignoring unreadable metadata '{}': {}", path.display(), e);
                None
            }
        }
    }
}

impl PageSource for DirectoryPageStore {
    fn page_count(&self, document_id: &str) -> Option<usize> {
        if !is_valid_segment(document_id) {
            return None;
        }
        if let Some(n) = self.metadata_page_count(document_id) {
            return Some(n);
        }
        let count = (1..)
            .take_while(|&n| self.page_path(document_id, n).is_file())
            .count();
        (count > 0).then_some(count)
    }

    fn page_image(&self, document_id: &str, page_number: usize) -> Option<PathBuf> {
        if !is_valid_segment(document_id) || page_number == 0 {
            return None;
        }
        let path = self.page_path(document_id, page_number);
        path.is_file().then_some(path)
    }
}

/// Stable identifier of a persisted figure: `<document_id>/<file_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(document_id: &str, file_name: &str) -> Self {
        Self(format!("{}/{}", document_id, file_name))
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (doc, file) = s.split_once('/')?;
        (is_valid_segment(doc) && is_valid_segment(file)).then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn document_id(&self) -> &str {
        self.0.split_once('/').map(|(d, _)| d).unwrap_or("")
    }

    pub fn file_name(&self) -> &str {
        self.0.split_once('/').map(|(_, f)| f).unwrap_or("")
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lossless PNG artifact store for extracted figures.
#[derive(Debug, Clone)]
pub struct FigureStore {
    root: PathBuf,
}

impl FigureStore {
    /// Store rooted at `<data_dir>/figures`.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            root: data_dir.as_ref().join("figures"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `image` as a PNG under a collision-free name derived from `stem`.
    ///
    /// Writes go through a temp file in the target directory followed by a
    /// rename, so a crashed or cancelled write never leaves a partial PNG.
    pub fn save_png(
        &self,
        document_id: &str,
        stem: &str,
        image: &DynamicImage,
    ) -> Result<(ArtifactRef, PathBuf), CropError> {
        let dir = self.root.join(document_id);
        let file_name = format!("{}_{}.png", stem, Uuid::new_v4().simple());
        let path = dir.join(&file_name);
        let write_err = |detail: String| CropError::Write {
            path: path.clone(),
            detail,
        };

        if !is_valid_segment(document_id) {
            return Err(write_err(format!("invalid document id '{document_id}'")));
        }
        std::fs::create_dir_all(&dir).map_err(|e| write_err(e.to_string()))?;

        let mut buf = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .map_err(|e| write_err(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(&buf).map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&path).map_err(|e| write_err(e.error.to_string()))?;

        debug!("Saved artifact {} ({} bytes)", path.display(), buf.len());
        Ok((ArtifactRef::new(document_id, &file_name), path))
    }

    /// Filesystem path for an artifact, if the reference is well-formed.
    pub fn resolve(&self, artifact: &ArtifactRef) -> Option<PathBuf> {
        let parsed = ArtifactRef::parse(artifact.as_str())?;
        Some(self.root.join(parsed.document_id()).join(parsed.file_name()))
    }

    /// Read the PNG bytes of an artifact.
    pub fn fetch(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, LocateError> {
        let path = self.resolve(artifact).ok_or_else(|| LocateError::InvalidDocumentId {
            document_id: artifact.to_string(),
        })?;
        std::fs::read(&path).map_err(|e| LocateError::StoreIo { path, source: e })
    }

    /// Remove one artifact. Missing files are not an error.
    pub fn discard(&self, artifact: &ArtifactRef) -> Result<(), LocateError> {
        let Some(path) = self.resolve(artifact) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LocateError::StoreIo { path, source: e }),
        }
    }

    /// Delete every figure of a document. Returns the number of files removed.
    pub fn delete_document(&self, document_id: &str) -> Result<usize, LocateError> {
        if !is_valid_segment(document_id) {
            return Err(LocateError::InvalidDocumentId {
                document_id: document_id.to_string(),
            });
        }
        let dir = self.root.join(document_id);
        if !dir.exists() {
            return Ok(0);
        }
        let count = std::fs::read_dir(&dir)
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0);
        std::fs::remove_dir_all(&dir).map_err(|e| LocateError::StoreIo {
            path: dir.clone(),
            source: e,
        })?;
        debug!("Deleted {} figures of document {}", count, document_id);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_page(root: &Path, doc: &str, n: usize) {
        let dir = root.join("images").join(doc);
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(20, 30, Rgb([255, 255, 255]))
            .save(dir.join(format!("page_{n}.png")))
            .unwrap();
    }

    #[test]
    fn page_count_from_files() {
        let dir = tempfile::tempdir().unwrap();
        for n in 1..=3 {
            write_page(dir.path(), "doc", n);
        }
        let store = DirectoryPageStore::new(dir.path());
        assert_eq!(store.page_count("doc"), Some(3));
        assert_eq!(store.page_count("missing"), None);
        assert!(store.page_image("doc", 2).is_some());
        assert!(store.page_image("doc", 4).is_none());
        assert!(store.page_image("doc", 0).is_none());
    }

    #[test]
    fn page_count_prefers_metadata() {
        let dir = tempfile::tempdir().unwrap();
        write_page(dir.path(), "doc", 1);
        std::fs::write(dir.path().join("doc.json"), r#"{"id":"doc","total_pages":7}"#).unwrap();
        let store = DirectoryPageStore::new(dir.path());
        assert_eq!(store.page_count("doc"), Some(7));
    }

    #[test]
    fn rejects_traversal_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryPageStore::new(dir.path());
        assert_eq!(store.page_count("../etc"), None);
        assert!(ArtifactRef::parse("../x.png").is_none());
        assert!(ArtifactRef::parse("doc/../../x.png").is_none());
        assert!(ArtifactRef::parse("doc/fig.png").is_some());
    }

    #[test]
    fn save_fetch_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FigureStore::new(dir.path());
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])));

        let (a, path_a) = store.save_png("doc", "p1_fig", &img).unwrap();
        let (b, _) = store.save_png("doc", "p1_fig", &img).unwrap();
        assert_ne!(a, b, "repeated saves must not collide");
        assert!(path_a.is_file());
        assert_eq!(a.document_id(), "doc");
        assert!(a.file_name().starts_with("p1_fig_"));

        let bytes = store.fetch(&a).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");

        store.discard(&b).unwrap();
        store.discard(&b).unwrap();
        assert!(store.fetch(&b).is_err());

        assert_eq!(store.delete_document("doc").unwrap(), 1);
        assert!(store.fetch(&a).is_err());
        assert_eq!(store.delete_document("doc").unwrap(), 0);
    }

    #[test]
    fn save_rejects_bad_document_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FigureStore::new(dir.path());
        let img = DynamicImage::ImageRgb8(RgbImage::new(2, 2));
        assert!(store.save_png("a/b", "x", &img).is_err());
    }
}
