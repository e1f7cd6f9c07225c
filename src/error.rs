//! Error types for the epub-math2svg library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`Math2SvgError`] — **Fatal**: the run cannot proceed at all (documents
//!   directory missing, invalid configuration, no usable rendering backend),
//!   or the manifest step failed. Returned as `Err(Math2SvgError)` from the
//!   top-level entry points, or recorded on the output for the manifest step.
//!
//! * [`DocumentError`] — **Non-fatal**: one document could not be read or
//!   written back. Stored on [`crate::output::DocumentResult`]; all other
//!   documents are still processed.
//!
//! * [`RenderFailure`] — **Non-fatal**: one expression could not be rendered,
//!   even after the placeholder fallback. Stored on
//!   [`crate::model::RenderedAsset`]; its original markup stays in place.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the epub-math2svg library.
#[derive(Debug, Error)]
pub enum Math2SvgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The documents directory does not exist or is not a directory.
    #[error("Documents directory not found: '{path}'")]
    DocumentsDirNotFound { path: PathBuf },

    /// The image output directory could not be created.
    #[error("Failed to create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The TeX toolchain cannot be invoked; raised before any document is read.
    #[error("Rendering backend unavailable: {reason}\n{hint}")]
    BackendUnavailable { reason: String, hint: String },

    // ── Manifest errors ───────────────────────────────────────────────────
    /// The manifest file does not exist or cannot be read.
    #[error("Failed to read manifest '{path}': {source}")]
    ManifestNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not well-formed XML.
    #[error("Manifest '{path}' is not well-formed XML: {detail}")]
    ManifestParse { path: PathBuf, detail: String },

    /// The manifest has no items container element.
    #[error("Manifest '{path}' has no <manifest> element")]
    ManifestStructure { path: PathBuf },

    /// Writing the updated manifest failed.
    #[error("Failed to write manifest '{path}': {source}")]
    ManifestWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The manifest step failed after documents were converted.
    ///
    /// Carries the rendered message of the underlying manifest error, which
    /// is kept on [`crate::output::ConversionOutput::manifest_error`].
    #[error("Manifest update failed: {0}")]
    ManifestUpdate(String),

    /// Some documents failed.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_result`] when the
    /// caller wants to treat any document failure as an error.
    #[error("{failed}/{total} documents failed during conversion")]
    PartialFailure { failed: usize, total: usize },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single document.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum DocumentError {
    /// The document could not be read (missing, unreadable, not UTF-8).
    #[error("{path}: read failed: {detail}")]
    ReadFailed { path: PathBuf, detail: String },

    /// The rewritten document could not be persisted.
    #[error("{path}: write failed: {detail}")]
    WriteFailed { path: PathBuf, detail: String },
}

/// A non-fatal error for a single expression.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RenderFailure {
    /// The backend reported an error for this source.
    #[error("{backend} backend failed: {detail}")]
    Backend { backend: String, detail: String },

    /// The backend returned bytes that are not an SVG image.
    #[error("{backend} backend produced no SVG output")]
    InvalidOutput { backend: String },

    /// The image could not be persisted to its target path.
    #[error("Failed to write '{path}': {detail}")]
    WriteFailed { path: PathBuf, detail: String },

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed: {0}")]
    Join(String),
}
