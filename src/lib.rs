//! # epub-math2svg
//!
//! Replace LaTeX math in XHTML/HTML documents with SVG images and register the
//! images in the EPUB package manifest.
//!
//! ## Why this crate?
//!
//! Documentation toolchains (Sphinx, Pandoc, …) emit math as LaTeX source
//! wrapped in `<span class="math">` or `<div class="math">` and leave it to
//! MathJax to typeset in the browser. E-readers do not run MathJax, so the
//! reader sees raw `\frac{a}{b}`. This crate typesets every expression once
//! with a local TeX installation, writes it as a content-addressed SVG, and
//! points the document at the image. An expression the toolchain cannot
//! handle still gets a placeholder image instead of breaking the book.
//!
//! ## Pipeline Overview
//!
//! ```text
//! documents_dir/*.xhtml
//!  │
//!  ├─ 1. Input     discover documents (non-recursive, by extension)
//!  ├─ 2. Extract   inline + display containers, spans, equation numbers
//!  ├─ 3. Sanitize  strip delimiters, unescape, repair env nestings
//!  ├─ 4. Name      uuid v5 of kind + source → math_<token>.svg
//!  ├─ 5. Render    latex → dvisvgm (spawn_blocking), placeholder on failure
//!  ├─ 6. Rewrite   splice <img> references, inject the math stylesheet
//!  └─ 7. Manifest  one surgical merge of every referenced image into the OPF
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use epub_math2svg::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // latex + dvisvgm discovered in ~/bin, then on PATH
//!     let config = ConversionConfig::builder("book/OEBPS/text", "book/OEBPS/images")
//!         .manifest_path("book/OEBPS/content.opf")
//!         .build()?;
//!     let output = convert(&config).await?;
//!     eprintln!(
//!         "{} replaced, {} placeholder, {} failed; {} manifest items added",
//!         output.stats.replaced,
//!         output.stats.fallback,
//!         output.stats.failed,
//!         output.stats.manifest_added
//!     );
//!     output.into_result()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `math2svg` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! epub-math2svg = { version = "0.3", default-features = false }
//! ```
//!
//! ## Render Modes
//!
//! | Mode | Needs TeX | Output |
//! |------|-----------|--------|
//! | [`RenderMode::Full`]    | yes | typeset SVG, placeholder only where TeX fails |
//! | [`RenderMode::Reduced`] | no  | placeholder SVG for every expression |
//!
//! Images are named from their content, so re-running over an already
//! converted book renders nothing and adds nothing to the manifest.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    ContainerSpec, ConversionConfig, ConversionConfigBuilder, ManifestOptions, RenderMode,
    RenderOptions,
};
pub use convert::{convert, convert_sync, inspect, process_document};
pub use error::{DocumentError, Math2SvgError, RenderFailure};
pub use model::{Document, ManifestItem, MathExpression, MathKind, RenderStatus, RenderedAsset};
pub use output::{
    ConversionOutput, ConversionStats, DocumentResult, InspectionReport, ManifestReport,
};
pub use pipeline::manifest::update_manifest;
pub use pipeline::render::{LatexBackend, MathBackend, PlaceholderBackend, Renderer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, DocumentStream};
