//! Result types returned by the conversion entry points.
//!
//! Everything here is `Serialize` so the CLI can print a run as JSON.

use crate::error::{DocumentError, Math2SvgError};
use crate::model::ManifestItem;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Outcome for one document.
///
/// `expressions` counts containers found; the image counters count distinct
/// images referenced by (or attempted for) this document, so a formula that
/// appears three times is rendered and counted once.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentResult {
    pub path: PathBuf,
    pub expressions: usize,
    /// Containers replaced by image references.
    pub replaced: usize,
    /// Containers left in place because their image could not be produced.
    pub left_untouched: usize,
    /// Images produced by the primary backend.
    pub rendered: usize,
    /// Images produced by the placeholder backend.
    pub fallback: usize,
    /// Images that could not be produced at all.
    pub failed: usize,
    /// Images already on disk and not re-rendered.
    pub reused: usize,
    pub style_injected: bool,
    /// The document was written back.
    pub modified: bool,
    /// Images referenced by the rewritten document.
    pub assets: Vec<PathBuf>,
    pub duration_ms: u64,
    /// Set when the document could not be read or written; counters are then
    /// whatever was reached before the failure.
    pub error: Option<DocumentError>,
}

impl DocumentResult {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// What a dry run found in one document.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InspectionReport {
    pub path: PathBuf,
    pub inline: usize,
    pub display: usize,
    /// Image filenames the expressions map to, deduplicated and sorted.
    pub images: Vec<String>,
    /// How many of `images` already exist in the image directory.
    pub existing_images: usize,
    pub error: Option<DocumentError>,
}

/// Outcome of the manifest step.
#[derive(Debug, Clone, Serialize)]
pub struct ManifestReport {
    pub path: PathBuf,
    pub added: Vec<ManifestItem>,
    /// Hrefs already declared, left alone.
    pub skipped: Vec<String>,
    /// `false` when nothing was added and the file was not touched.
    pub written: bool,
}

/// Aggregate counters for a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub documents_total: usize,
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub documents_modified: usize,
    pub expressions_found: usize,
    pub replaced: usize,
    pub left_untouched: usize,
    pub rendered: usize,
    pub fallback: usize,
    pub failed: usize,
    pub reused: usize,
    /// Distinct images referenced across all documents.
    pub assets_total: usize,
    pub manifest_added: usize,
    pub manifest_skipped: usize,
    pub total_duration_ms: u64,
}

impl ConversionStats {
    /// Sum the per-document counters.
    pub fn from_documents(documents: &[DocumentResult]) -> Self {
        let mut stats = Self {
            documents_total: documents.len(),
            ..Self::default()
        };
        for d in documents {
            if d.is_ok() {
                stats.documents_processed += 1;
            } else {
                stats.documents_failed += 1;
            }
            if d.modified {
                stats.documents_modified += 1;
            }
            stats.expressions_found += d.expressions;
            stats.replaced += d.replaced;
            stats.left_untouched += d.left_untouched;
            stats.rendered += d.rendered;
            stats.fallback += d.fallback;
            stats.failed += d.failed;
            stats.reused += d.reused;
        }
        stats
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionOutput {
    /// Per-document results, in discovery order.
    pub documents: Vec<DocumentResult>,
    /// Every image referenced by a rewritten document, sorted.
    pub assets: BTreeSet<PathBuf>,
    pub manifest: Option<ManifestReport>,
    /// Set when the manifest step failed; document changes are kept.
    pub manifest_error: Option<String>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Treat any recorded failure as an error.
    ///
    /// A manifest failure takes precedence over document failures.
    pub fn into_result(self) -> Result<Self, Math2SvgError> {
        if let Some(detail) = &self.manifest_error {
            return Err(Math2SvgError::ManifestUpdate(detail.clone()));
        }
        if self.stats.documents_failed > 0 {
            return Err(Math2SvgError::PartialFailure {
                failed: self.stats.documents_failed,
                total: self.stats.documents_total,
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, replaced: usize, failed: Option<&str>) -> DocumentResult {
        DocumentResult {
            expressions: replaced,
            replaced,
            rendered: replaced,
            modified: replaced > 0,
            error: failed.map(|d| DocumentError::ReadFailed {
                path: PathBuf::from(name),
                detail: d.to_string(),
            }),
            ..DocumentResult::new(PathBuf::from(name))
        }
    }

    #[test]
    fn stats_sum_documents() {
        let docs = vec![doc("a", 2, None), doc("b", 0, None), doc("c", 0, Some("denied"))];
        let s = ConversionStats::from_documents(&docs);
        assert_eq!(s.documents_total, 3);
        assert_eq!(s.documents_processed, 2);
        assert_eq!(s.documents_failed, 1);
        assert_eq!(s.documents_modified, 1);
        assert_eq!(s.replaced, 2);
    }

    #[test]
    fn into_result_reports_document_failures() {
        let documents = vec![doc("a", 1, None), doc("b", 0, Some("denied"))];
        let out = ConversionOutput {
            stats: ConversionStats::from_documents(&documents),
            documents,
            ..ConversionOutput::default()
        };
        let err = out.into_result().unwrap_err();
        assert!(matches!(err, Math2SvgError::PartialFailure { failed: 1, total: 2 }));
    }

    #[test]
    fn into_result_reports_manifest_failure() {
        let out = ConversionOutput {
            manifest_error: Some("no <manifest>".into()),
            ..ConversionOutput::default()
        };
        assert!(matches!(
            out.into_result().unwrap_err(),
            Math2SvgError::ManifestUpdate(_)
        ));
    }

    #[test]
    fn output_serializes_to_json() {
        let out = ConversionOutput {
            documents: vec![doc("ch1.xhtml", 1, None)],
            ..ConversionOutput::default()
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["documents"][0]["path"], "ch1.xhtml");
        assert!(json["manifest"].is_null());
    }
}
