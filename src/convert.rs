//! Eager (whole-run) conversion entry points.
//!
//! ## Why eager vs. streaming?
//!
//! [`convert`] waits for every document, then performs the manifest step
//! once over the union of referenced images and returns everything in one
//! [`ConversionOutput`]. Use [`crate::stream::convert_stream`] to observe
//! documents as they finish; the manifest is then the caller's job (see
//! [`crate::pipeline::manifest::update_manifest`]).
//!
//! ## Failure scopes
//!
//! Setup problems (missing documents directory, unusable backend) fail the
//! run before any document is read. A document that cannot be read or
//! written is recorded on its [`DocumentResult`] and the others continue.
//! A manifest failure is recorded on the output; converted documents stay
//! converted.

use crate::config::ConversionConfig;
use crate::error::Math2SvgError;
use crate::model::{Document, MathExpression, MathKind, RenderStatus, RenderedAsset};
use crate::output::{ConversionOutput, ConversionStats, DocumentResult, InspectionReport};
use crate::pipeline::render::{resolve_renderer, Renderer};
use crate::pipeline::{extract, input, manifest, naming, rewrite};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Convert every document in `config.documents_dir`, then update the
/// manifest once if one is configured.
///
/// # Returns
/// `Ok(ConversionOutput)` even if some documents, expressions, or the
/// manifest step failed; inspect `output.stats`, `output.manifest_error`,
/// or call [`ConversionOutput::into_result`].
///
/// # Errors
/// Only for setup failures: documents directory missing, image directory
/// not creatable, rendering backend unavailable.
pub async fn convert(config: &ConversionConfig) -> Result<ConversionOutput, Math2SvgError> {
    let total_start = Instant::now();
    info!("Starting conversion: {}", config.documents_dir.display());

    let mut documents: Vec<DocumentResult> = crate::stream::convert_stream(config)
        .await?
        .collect()
        .await;
    documents.sort_by(|a, b| a.path.cmp(&b.path));

    let assets: BTreeSet<PathBuf> = documents
        .iter()
        .filter(|d| d.is_ok())
        .flat_map(|d| d.assets.iter().cloned())
        .collect();

    let mut stats = ConversionStats::from_documents(&documents);
    stats.assets_total = assets.len();

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(stats.documents_total, stats.documents_processed);
    }

    let mut output = ConversionOutput {
        documents,
        assets,
        manifest: None,
        manifest_error: None,
        stats,
    };

    if let Some(manifest_path) = &config.manifest_path {
        if output.assets.is_empty() {
            info!("No images referenced; manifest left untouched");
        } else {
            match merge_into_manifest(manifest_path, config, &output.assets).await {
                Ok(report) => {
                    output.stats.manifest_added = report.added.len();
                    output.stats.manifest_skipped = report.skipped.len();
                    output.manifest = Some(report);
                }
                Err(e) => {
                    error!("Manifest update failed: {}", e);
                    output.manifest_error = Some(e.to_string());
                }
            }
        }
    }

    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    info!(
        "Conversion complete: {}/{} documents, {} replaced, {} fallback, {} failed, {}ms",
        output.stats.documents_processed,
        output.stats.documents_total,
        output.stats.replaced,
        output.stats.fallback,
        output.stats.failed,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(config: &ConversionConfig) -> Result<ConversionOutput, Math2SvgError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Math2SvgError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(config))
}

/// Extract without rendering or writing anything.
///
/// Does not require a TeX installation.
pub async fn inspect(config: &ConversionConfig) -> Result<Vec<InspectionReport>, Math2SvgError> {
    let documents_dir = absolute(&config.documents_dir)?;
    let images_dir = absolute(&config.images_dir)?;
    let paths = input::discover_documents(&documents_dir, &config.extensions)?;

    let mut reports = Vec::with_capacity(paths.len());
    for path in paths {
        let mut report = InspectionReport {
            path: path.clone(),
            ..InspectionReport::default()
        };
        match Document::load(&path).await {
            Ok(doc) => {
                let found = extract::extract(
                    &doc.text,
                    &config.inline_container,
                    &config.display_container,
                    &doc.path,
                );
                report.inline = found.iter().filter(|e| e.kind == MathKind::Inline).count();
                report.display = found.len() - report.inline;
                let names: BTreeSet<String> = found
                    .iter()
                    .map(|e| naming::name_for(&e.normalized_source, e.kind, &config.image_prefix))
                    .collect();
                report.existing_images = names
                    .iter()
                    .filter(|n| images_dir.join(n).is_file())
                    .count();
                report.images = names.into_iter().collect();
            }
            Err(e) => {
                warn!("{}", e);
                report.error = Some(e);
            }
        }
        reports.push(report);
    }
    Ok(reports)
}

// ── Run preparation ──────────────────────────────────────────────────────

/// Everything resolved before the first document is read.
pub(crate) struct PreparedRun {
    pub config: ConversionConfig,
    pub documents: Vec<PathBuf>,
    pub renderer: Renderer,
}

/// Absolutize directories, discover documents, create the image directory
/// and resolve the backend, in that order.
pub(crate) async fn prepare(config: &ConversionConfig) -> Result<PreparedRun, Math2SvgError> {
    let mut config = config.clone();
    config.documents_dir = absolute(&config.documents_dir)?;
    config.images_dir = absolute(&config.images_dir)?;

    let documents = input::discover_documents(&config.documents_dir, &config.extensions)?;
    info!(
        "Found {} documents in {}",
        documents.len(),
        config.documents_dir.display()
    );

    tokio::fs::create_dir_all(&config.images_dir)
        .await
        .map_err(|e| Math2SvgError::OutputDirFailed {
            path: config.images_dir.clone(),
            source: e,
        })?;

    let renderer = resolve_renderer(&config).await?;
    Ok(PreparedRun {
        config,
        documents,
        renderer,
    })
}

fn absolute(path: &Path) -> Result<PathBuf, Math2SvgError> {
    input::absolutize(path)
        .map_err(|e| Math2SvgError::Internal(format!("Cannot resolve '{}': {}", path.display(), e)))
}

// ── Per-document processing ──────────────────────────────────────────────

/// Extract, render, rewrite and persist one document.
///
/// Never fails: read and write errors are recorded on the result.
/// `config.images_dir` must be absolute.
pub async fn process_document(
    path: &Path,
    renderer: &Renderer,
    config: &ConversionConfig,
) -> DocumentResult {
    let start = Instant::now();
    let mut result = DocumentResult::new(path.to_path_buf());

    let mut doc = match Document::load(path).await {
        Ok(doc) => doc,
        Err(e) => {
            warn!("{}", e);
            result.error = Some(e);
            return result;
        }
    };

    let found = extract::extract(
        &doc.text,
        &config.inline_container,
        &config.display_container,
        &doc.path,
    );
    result.expressions = found.len();
    if found.is_empty() {
        debug!("{}: no math", path.display());
        result.duration_ms = start.elapsed().as_millis() as u64;
        return result;
    }

    // One render per distinct image, in first-seen order.
    let targets: Vec<PathBuf> = found
        .iter()
        .map(|e| target_path(e, config))
        .collect();
    let mut unique: Vec<(&MathExpression, &PathBuf)> = Vec::new();
    let mut seen: HashSet<&PathBuf> = HashSet::new();
    for (expr, target) in found.iter().zip(&targets) {
        if seen.insert(target) {
            unique.push((expr, target));
        }
    }
    debug!(
        "{}: {} expressions, {} distinct images",
        path.display(),
        found.len(),
        unique.len()
    );

    // Owned jobs keep the boxed document stream `Send`.
    let jobs: Vec<(MathExpression, PathBuf)> = unique
        .iter()
        .map(|(expr, target)| ((*expr).clone(), (*target).clone()))
        .collect();
    let rendered: Vec<RenderedAsset> = stream::iter(jobs.into_iter().map(|(expr, target)| {
        let renderer = renderer.clone();
        async move { renderer.render(&expr, target).await }
    }))
    .buffered(config.render_concurrency)
    .collect()
    .await;

    for asset in &rendered {
        match asset.status {
            RenderStatus::Rendered | RenderStatus::RenderedFallback if asset.reused => {
                result.reused += 1
            }
            RenderStatus::Rendered => result.rendered += 1,
            RenderStatus::RenderedFallback => result.fallback += 1,
            RenderStatus::Failed => result.failed += 1,
        }
    }
    let by_target: HashMap<&Path, &RenderedAsset> = rendered
        .iter()
        .map(|a| (a.file_path.as_path(), a))
        .collect();

    let pairs: Vec<(MathExpression, RenderedAsset)> = found
        .iter()
        .zip(&targets)
        .filter_map(|(expr, target)| {
            by_target
                .get(target.as_path())
                .map(|asset| (expr.clone(), (*asset).clone()))
        })
        .collect();

    let outcome = rewrite::rewrite(&doc, &pairs);
    result.replaced = outcome.replaced;
    result.left_untouched = outcome.left_untouched;
    result.style_injected = outcome.style_injected;

    if outcome.changed() {
        doc.text = outcome.text;
        if let Err(e) = doc.persist().await {
            error!("{}", e);
            result.error = Some(e);
            result.duration_ms = start.elapsed().as_millis() as u64;
            return result;
        }
        result.modified = true;
    }
    result.assets = outcome.referenced_assets.into_iter().collect();

    if result.left_untouched > 0 {
        warn!(
            "{}: {} of {} expressions left as markup",
            path.display(),
            result.left_untouched,
            result.expressions
        );
    }
    result.duration_ms = start.elapsed().as_millis() as u64;
    debug!(
        "{}: replaced {} in {}ms",
        path.display(),
        result.replaced,
        result.duration_ms
    );
    result
}

fn target_path(expr: &MathExpression, config: &ConversionConfig) -> PathBuf {
    config.images_dir.join(naming::name_for(
        &expr.normalized_source,
        expr.kind,
        &config.image_prefix,
    ))
}

async fn merge_into_manifest(
    manifest_path: &Path,
    config: &ConversionConfig,
    assets: &BTreeSet<PathBuf>,
) -> Result<crate::output::ManifestReport, Math2SvgError> {
    let manifest_path = absolute(manifest_path)?;
    let content_root = match &config.content_root {
        Some(root) => absolute(root)?,
        None => input::resolve_content_root(&manifest_path),
    };
    debug!("Manifest content root: {}", content_root.display());
    manifest::update_manifest(&manifest_path, assets, &content_root, &config.manifest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderMode, RenderOptions};

    fn reduced_config(docs: &Path, images: &Path) -> ConversionConfig {
        ConversionConfig::builder(docs, images)
            .render_mode(RenderMode::Reduced)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn duplicates_in_one_document_render_once() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("a.xhtml");
        std::fs::write(
            &doc,
            r#"<html><head></head><body><p><span class="math">\(x\)</span> and <span class="math">x</span></p></body></html>"#,
        )
        .unwrap();
        let images = dir.path().join("img");
        std::fs::create_dir(&images).unwrap();
        let config = reduced_config(dir.path(), &images);
        let renderer = Renderer::reduced(RenderOptions::default(), 2);

        let result = process_document(&doc, &renderer, &config).await;
        assert_eq!(result.expressions, 2);
        assert_eq!(result.replaced, 2);
        assert_eq!(result.fallback, 1);
        assert_eq!(result.assets.len(), 1);
        assert_eq!(std::fs::read_dir(&images).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn unreadable_document_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let config = reduced_config(dir.path(), dir.path());
        let renderer = Renderer::reduced(RenderOptions::default(), 1);
        let result = process_document(&dir.path().join("gone.xhtml"), &renderer, &config).await;
        assert!(!result.is_ok());
    }

    #[tokio::test]
    async fn document_without_math_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let doc = dir.path().join("a.html");
        std::fs::write(&doc, "<html><head></head><body>none</body></html>").unwrap();
        let config = reduced_config(dir.path(), dir.path());
        let renderer = Renderer::reduced(RenderOptions::default(), 1);
        let result = process_document(&doc, &renderer, &config).await;
        assert!(!result.modified);
        assert_eq!(result.expressions, 0);
    }

    #[tokio::test]
    async fn inspect_counts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"<html><head></head><body><span class="math">\(a\)</span><div class="math">\[b\]</div></body></html>"#;
        std::fs::write(dir.path().join("c.xhtml"), body).unwrap();
        let images = dir.path().join("img");
        let config = reduced_config(dir.path(), &images);

        let reports = inspect(&config).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].inline, 1);
        assert_eq!(reports[0].display, 1);
        assert_eq!(reports[0].images.len(), 2);
        assert_eq!(reports[0].existing_images, 0);
        assert!(!images.exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("c.xhtml")).unwrap(), body);
    }

    #[tokio::test]
    async fn missing_documents_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = reduced_config(&dir.path().join("nope"), dir.path());
        let err = convert(&config).await.unwrap_err();
        assert!(matches!(err, Math2SvgError::DocumentsDirNotFound { .. }));
    }
}
