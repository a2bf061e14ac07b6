//! Reference catalog — identity → reference embeddings.
//!
//! The source of truth is an on-disk tree `<root>/<identity>/<image>`;
//! `build` turns it into an in-memory catalog in one pass. The catalog is
//! write-seldom/read-many: mutations happen on a clone which the owner
//! publishes wholesale, so concurrent readers only ever see a complete
//! snapshot.

use crate::provider::{EmbeddingProvider, FaceScan, ImageData, ProviderError};
use crate::types::Embedding;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Accepted reference image extensions, compared case-insensitively.
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog root not found: {0}")]
    RootNotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no face detected in reference image")]
    NoFaceDetected,
    #[error("embedding model mismatch: catalog holds {expected}, provider produced {actual}")]
    ModelMismatch { expected: String, actual: String },
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),
}

/// One identity and its reference embeddings, in insertion order.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub identity: String,
    pub references: Vec<Embedding>,
}

/// Mapping of identity → reference embeddings.
///
/// Entries iterate in the order identities were added; `build` adds them in
/// sorted directory-name order, so resolver tie-breaks are deterministic
/// for a given tree rather than depending on directory listing order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    /// Build a catalog by scanning the immediate subdirectories of `root`.
    ///
    /// Each subdirectory name is an identity; each image file inside is
    /// embedded. Unreadable or faceless images are logged and skipped,
    /// never fatal — an identity with zero usable images simply yields no
    /// entry.
    pub fn build(root: &Path, provider: &mut dyn EmbeddingProvider) -> Result<Self, CatalogError> {
        if !root.is_dir() {
            return Err(CatalogError::RootNotFound(root.display().to_string()));
        }

        let mut dirs: Vec<(String, PathBuf)> = fs::read_dir(root)
            .map_err(|source| CatalogError::Io {
                path: root.display().to_string(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                Some((name, entry.path()))
            })
            .collect();
        dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut catalog = Catalog::default();
        for (identity, dir) in dirs {
            let references = load_references(&identity, &dir, provider);
            if references.is_empty() {
                tracing::warn!(identity = %identity, "no usable reference images, skipping identity");
                continue;
            }
            tracing::info!(
                identity = %identity,
                references = references.len(),
                "loaded reference embeddings"
            );
            catalog.entries.push(CatalogEntry {
                identity,
                references,
            });
        }

        tracing::info!(
            identities = catalog.entries.len(),
            references = catalog.reference_count(),
            "reference catalog built"
        );
        Ok(catalog)
    }

    /// Assemble a catalog from pre-computed entries (alternate storage
    /// backends, tests). Entry order becomes the iteration order.
    pub fn from_entries(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Currently known identities, in entry order.
    pub fn identities(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.identity.clone()).collect()
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.iter().any(|e| e.identity == identity)
    }

    /// Embed `image` and append it to `identity`'s references, creating the
    /// identity (at the end of the entry order) if absent.
    pub fn add_reference(
        &mut self,
        identity: &str,
        image: &ImageData,
        provider: &mut dyn EmbeddingProvider,
    ) -> Result<(), CatalogError> {
        let embedding = match provider.scan(image)? {
            FaceScan::NoFace => return Err(CatalogError::NoFaceDetected),
            FaceScan::Face(embedding) => embedding,
        };
        self.add_embedding(identity, embedding)
    }

    /// Append a pre-computed embedding (callers that run the provider
    /// elsewhere, e.g. behind an engine thread). Enforces the same-model
    /// invariant.
    pub fn add_embedding(
        &mut self,
        identity: &str,
        embedding: Embedding,
    ) -> Result<(), CatalogError> {
        if let Some(expected) = self.model() {
            if expected != embedding.model {
                return Err(CatalogError::ModelMismatch {
                    expected: expected.to_string(),
                    actual: embedding.model,
                });
            }
        }

        match self.entries.iter_mut().find(|e| e.identity == identity) {
            Some(entry) => entry.references.push(embedding),
            None => self.entries.push(CatalogEntry {
                identity: identity.to_string(),
                references: vec![embedding],
            }),
        }
        Ok(())
    }

    /// Remove an identity and all its references. Returns `false` when the
    /// identity was not present.
    pub fn remove_identity(&mut self, identity: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.identity != identity);
        self.entries.len() != before
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of reference embeddings across all identities.
    pub fn reference_count(&self) -> usize {
        self.entries.iter().map(|e| e.references.len()).sum()
    }

    /// Model id of the embeddings held, if any.
    fn model(&self) -> Option<&str> {
        self.entries
            .first()
            .and_then(|e| e.references.first())
            .map(|r| r.model.as_str())
    }
}

/// Embed every usable image in one identity directory.
///
/// Failures are isolated per image: unreadable files, provider failures
/// and faceless images each log a warning and are skipped.
fn load_references(
    identity: &str,
    dir: &Path,
    provider: &mut dyn EmbeddingProvider,
) -> Vec<Embedding> {
    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect(),
        Err(error) => {
            tracing::warn!(identity = %identity, dir = %dir.display(), %error, "failed to list identity directory");
            return Vec::new();
        }
    };
    files.sort();

    let mut references = Vec::new();
    for path in files {
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read reference image");
                continue;
            }
        };
        match provider.scan(&ImageData::Encoded(bytes)) {
            Ok(FaceScan::Face(embedding)) => references.push(embedding),
            Ok(FaceScan::NoFace) => {
                tracing::warn!(path = %path.display(), "no face detected in reference image, skipping");
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to embed reference image");
            }
        }
    }
    references
}

/// True when the file extension is one of the accepted image extensions.
fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let lower = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}
