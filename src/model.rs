//! Core data model shared by the pipeline stages.
//!
//! [`MathExpression`] and [`RenderedAsset`] live for one run only.
//! [`ManifestItem`] values are persisted into the package manifest and
//! survive across runs, which is why the manifest merge is duplicate-safe.

use crate::error::{DocumentError, RenderFailure};
use crate::pipeline::{input, sanitize};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Inline math sits in running text; display math is a centred block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MathKind {
    Inline,
    Display,
}

impl MathKind {
    /// Tag mixed into the content key so inline and display renders of the
    /// same source never share a file.
    pub fn tag(self) -> &'static str {
        match self {
            MathKind::Inline => "inline",
            MathKind::Display => "display",
        }
    }

    /// Filename qualifier placed between the prefix and the hash token.
    pub fn qualifier(self) -> &'static str {
        match self {
            MathKind::Inline => "",
            MathKind::Display => "eq_",
        }
    }
}

/// One math region found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MathExpression {
    pub kind: MathKind,
    /// Byte range of the whole container element in the document text.
    pub span: Range<usize>,
    /// The container markup exactly as it appears at `span`.
    pub matched: String,
    /// Delimiter-wrapped LaTeX as it appeared inside the container.
    pub raw_text: String,
    /// Delimiters stripped, entities unescaped, known environment nestings repaired.
    pub normalized_source: String,
    /// Container `id` attribute (display only).
    pub equation_id: Option<String>,
    /// Equation-number markup, e.g. `(1)` (display only).
    pub equation_number: Option<String>,
}

impl MathExpression {
    pub fn new(kind: MathKind, span: Range<usize>, matched: String, raw_text: String) -> Self {
        let normalized_source = sanitize::normalize(&raw_text);
        Self {
            kind,
            span,
            matched,
            raw_text,
            normalized_source,
            equation_id: None,
            equation_number: None,
        }
    }

    pub fn with_equation(mut self, id: Option<String>, number: Option<String>) -> Self {
        if self.kind == MathKind::Display {
            self.equation_id = id.filter(|s| !s.is_empty());
            self.equation_number = number.filter(|s| !s.trim().is_empty());
        }
        self
    }

    /// Source shortened for log lines.
    pub fn excerpt(&self) -> String {
        const MAX: usize = 60;
        let src = self.normalized_source.trim();
        match src.char_indices().nth(MAX) {
            Some((idx, _)) => format!("{}\u{2026}", &src[..idx]),
            None => src.to_string(),
        }
    }
}

/// Outcome of rendering one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    /// Primary backend produced the image (or it already existed on disk).
    Rendered,
    /// The placeholder backend produced the image.
    RenderedFallback,
    /// No image; the original markup is left untouched.
    Failed,
}

/// The output of rendering one [`MathExpression`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedAsset {
    /// Deterministic hash token of `kind` + normalized source.
    pub content_key: String,
    /// Absolute location of the image, named from `content_key`.
    pub file_path: PathBuf,
    pub status: RenderStatus,
    /// `true` when an existing file was reused without invoking a backend.
    pub reused: bool,
    /// Last failure seen; set on `Failed`, and on `RenderedFallback` to
    /// record why the primary path was abandoned.
    pub failure: Option<RenderFailure>,
}

impl RenderedAsset {
    /// An image exists at `file_path` and may be referenced.
    pub fn is_usable(&self) -> bool {
        self.status != RenderStatus::Failed
    }
}

/// Entry in the package manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// One input file: a path and its full text.
#[derive(Debug, Clone)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
}

impl Document {
    /// Read a document as UTF-8.
    pub async fn load(path: &Path) -> Result<Self, DocumentError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DocumentError::ReadFailed {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            text,
        })
    }

    /// Directory the document's relative references resolve against.
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Write the text back in place (temp file + rename).
    pub async fn persist(&self) -> Result<(), DocumentError> {
        input::write_atomic(&self.path, self.text.as_bytes())
            .await
            .map_err(|e| DocumentError::WriteFailed {
                path: self.path.clone(),
                detail: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_normalizes_source() {
        let e = MathExpression::new(
            MathKind::Inline,
            0..10,
            "<span class=\"math\">\\(a &lt; b\\)</span>".into(),
            "\\(a &lt; b\\)".into(),
        );
        assert_eq!(e.normalized_source, "a < b");
    }

    #[test]
    fn equation_metadata_ignored_for_inline() {
        let e = MathExpression::new(MathKind::Inline, 0..1, "x".into(), "x".into())
            .with_equation(Some("equation-a".into()), Some("(1)".into()));
        assert!(e.equation_id.is_none());
        assert!(e.equation_number.is_none());
    }

    #[test]
    fn empty_equation_metadata_dropped() {
        let e = MathExpression::new(MathKind::Display, 0..1, "x".into(), "\\[x\\]".into())
            .with_equation(Some(String::new()), Some("  ".into()));
        assert!(e.equation_id.is_none());
        assert!(e.equation_number.is_none());
    }

    #[test]
    fn excerpt_truncates_long_sources() {
        let long = "x".repeat(200);
        let e = MathExpression::new(MathKind::Inline, 0..1, long.clone(), long);
        assert_eq!(e.excerpt().chars().count(), 61);
        assert!(e.excerpt().ends_with('\u{2026}'));
    }

    #[test]
    fn kinds_have_distinct_tags() {
        assert_ne!(MathKind::Inline.tag(), MathKind::Display.tag());
        assert_ne!(MathKind::Inline.qualifier(), MathKind::Display.qualifier());
    }
}
