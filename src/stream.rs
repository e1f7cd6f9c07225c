//! Streaming conversion API: emit documents as they complete.
//!
//! ## Why stream?
//!
//! A book with a few hundred chapters and thousands of formulas takes a
//! while under a real TeX installation. A stream lets callers report each
//! document as soon as it is written instead of waiting for the whole run.
//!
//! Unlike the eager [`crate::convert::convert`], [`convert_stream`] does
//! **not** touch the manifest: the manifest is a single shared file and is
//! updated once, after every document is done. Collect the `assets` of the
//! successful results and pass them to
//! [`crate::pipeline::manifest::update_manifest`].
//!
//! Documents arrive in completion order; sort by `path` if order matters.

use crate::config::ConversionConfig;
use crate::convert::{prepare, process_document};
use crate::error::Math2SvgError;
use crate::output::DocumentResult;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::info;

/// A boxed stream of document results.
pub type DocumentStream = Pin<Box<dyn Stream<Item = DocumentResult> + Send>>;

/// Convert documents, streaming each result as it is ready.
///
/// # Returns
/// - `Ok(DocumentStream)` — one item per discovered document, including
///   documents that failed (see [`DocumentResult::error`])
/// - `Err(Math2SvgError)` — setup failure; no document was read
///
/// # Example
/// ```rust,no_run
/// use epub_math2svg::{convert_stream, ConversionConfig, RenderMode};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::builder("OEBPS/text", "OEBPS/images")
///     .render_mode(RenderMode::Reduced)
///     .build()?;
/// let mut stream = convert_stream(&config).await?;
/// while let Some(doc) = stream.next().await {
///     println!("{}: {} replaced", doc.path.display(), doc.replaced);
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(config: &ConversionConfig) -> Result<DocumentStream, Math2SvgError> {
    info!(
        "Starting streaming conversion: {}",
        config.documents_dir.display()
    );

    // ── Resolve documents, output directory and backend ──────────────────
    let prepared = prepare(config).await?;
    let total = prepared.documents.len();

    if let Some(ref cb) = prepared.config.progress_callback {
        cb.on_conversion_start(total);
    }

    // ── Build the stream ─────────────────────────────────────────────────
    let concurrency = prepared.config.concurrency;
    let config = Arc::new(prepared.config);
    let renderer = prepared.renderer;

    let s = stream::iter(prepared.documents.into_iter().map(move |path| {
        let config = Arc::clone(&config);
        let renderer = renderer.clone();
        async move {
            if let Some(ref cb) = config.progress_callback {
                cb.on_document_start(&path, total);
            }
            let result = process_document(&path, &renderer, &config).await;
            if let Some(ref cb) = config.progress_callback {
                match &result.error {
                    None => cb.on_document_complete(&path, total, result.replaced, result.left_untouched),
                    Some(e) => cb.on_document_error(&path, total, &e.to_string()),
                }
            }
            result
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}
