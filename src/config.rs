//! Configuration types for math-to-SVG conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks and to log the exact settings of
//! a run. The library never reads environment variables; the CLI maps its
//! flags (and their `MATH2SVG_*` env fallbacks) onto the builder.

use crate::error::Math2SvgError;
use crate::pipeline::render::MathBackend;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one conversion run.
///
/// # Example
/// ```rust
/// use epub_math2svg::{ConversionConfig, RenderMode};
///
/// let config = ConversionConfig::builder("OEBPS/text", "OEBPS/images")
///     .manifest_path("OEBPS/content.opf")
///     .image_prefix("eq-")
///     .render_mode(RenderMode::Reduced)
///     .build()
///     .unwrap();
/// assert_eq!(config.image_prefix, "eq-");
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Directory scanned (non-recursively) for markup documents.
    pub documents_dir: PathBuf,

    /// Directory receiving the generated SVG files. Created if missing.
    pub images_dir: PathBuf,

    /// Package manifest (OPF) to register the images in. Optional.
    pub manifest_path: Option<PathBuf>,

    /// Root that manifest hrefs are relative to.
    ///
    /// When `None` and a manifest is set, derived from the manifest location;
    /// see [`crate::pipeline::input::resolve_content_root`].
    pub content_root: Option<PathBuf>,

    /// Prefix for every generated filename. Default: `math_`.
    pub image_prefix: String,

    /// Document extensions picked up from `documents_dir`.
    /// Default: `xhtml`, `html`, `htm`.
    pub extensions: Vec<String>,

    /// Element recognised as inline math. Default: `<span class="math …">`.
    pub inline_container: ContainerSpec,

    /// Element recognised as display math. Default: `<div class="math …">`.
    pub display_container: ContainerSpec,

    /// Full TeX rendering or placeholder-only rendering. Default: [`RenderMode::Full`].
    pub render_mode: RenderMode,

    /// Directory searched first for the TeX binaries. When `None`, `~/bin`.
    pub backend_path: Option<PathBuf>,

    /// Pre-constructed primary backend. Takes precedence over toolchain discovery.
    pub backend: Option<Arc<dyn MathBackend>>,

    /// Typesetting parameters passed to every backend.
    pub render: RenderOptions,

    /// Documents processed concurrently. Default: 4.
    pub concurrency: usize,

    /// Backend invocations in flight across all documents. Default: 4.
    ///
    /// Each `latex` run is a separate process in a private temp directory,
    /// but TeX installations do not cope well with dozens of simultaneous
    /// runs writing to the same font cache.
    pub render_concurrency: usize,

    /// Re-render even when an image with the computed name already exists.
    /// Default: false.
    pub overwrite_assets: bool,

    /// Manifest identifier and media-type conventions.
    pub manifest: ManifestOptions,

    /// Document-level progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("documents_dir", &self.documents_dir)
            .field("images_dir", &self.images_dir)
            .field("manifest_path", &self.manifest_path)
            .field("content_root", &self.content_root)
            .field("image_prefix", &self.image_prefix)
            .field("extensions", &self.extensions)
            .field("inline_container", &self.inline_container)
            .field("display_container", &self.display_container)
            .field("render_mode", &self.render_mode)
            .field("backend_path", &self.backend_path)
            .field("backend", &self.backend.as_ref().map(|b| b.name().to_string()))
            .field("render", &self.render)
            .field("concurrency", &self.concurrency)
            .field("render_concurrency", &self.render_concurrency)
            .field("overwrite_assets", &self.overwrite_assets)
            .field("manifest", &self.manifest)
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder(
        documents_dir: impl Into<PathBuf>,
        images_dir: impl Into<PathBuf>,
    ) -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self {
                documents_dir: documents_dir.into(),
                images_dir: images_dir.into(),
                manifest_path: None,
                content_root: None,
                image_prefix: "math_".to_string(),
                extensions: vec!["xhtml".into(), "html".into(), "htm".into()],
                inline_container: ContainerSpec::new("span", ["math"]),
                display_container: ContainerSpec::new("div", ["math"]),
                render_mode: RenderMode::default(),
                backend_path: None,
                backend: None,
                render: RenderOptions::default(),
                concurrency: 4,
                render_concurrency: 4,
                overwrite_assets: false,
                manifest: ManifestOptions::default(),
                progress_callback: None,
            },
        }
    }
}

/// Builder for [`ConversionConfig`].
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl fmt::Debug for ConversionConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ConversionConfigBuilder {
    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_path = Some(path.into());
        self
    }

    pub fn content_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.content_root = Some(path.into());
        self
    }

    pub fn image_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.image_prefix = prefix.into();
        self
    }

    pub fn extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.extensions = exts
            .into_iter()
            .map(|e| {
                let ext: String = e.into();
                ext.trim_start_matches('.').to_ascii_lowercase()
            })
            .collect();
        self
    }

    pub fn inline_container(mut self, spec: ContainerSpec) -> Self {
        self.config.inline_container = spec;
        self
    }

    pub fn display_container(mut self, spec: ContainerSpec) -> Self {
        self.config.display_container = spec;
        self
    }

    pub fn render_mode(mut self, mode: RenderMode) -> Self {
        self.config.render_mode = mode;
        self
    }

    pub fn backend_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend_path = Some(path.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn MathBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn render_options(mut self, options: RenderOptions) -> Self {
        self.config.render = options;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn render_concurrency(mut self, n: usize) -> Self {
        self.config.render_concurrency = n.max(1);
        self
    }

    pub fn overwrite_assets(mut self, v: bool) -> Self {
        self.config.overwrite_assets = v;
        self
    }

    pub fn manifest_options(mut self, options: ManifestOptions) -> Self {
        self.config.manifest = options;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Math2SvgError> {
        let c = &self.config;
        if c.documents_dir.as_os_str().is_empty() {
            return Err(Math2SvgError::InvalidConfig(
                "Documents directory must not be empty".into(),
            ));
        }
        if c.images_dir.as_os_str().is_empty() {
            return Err(Math2SvgError::InvalidConfig(
                "Images directory must not be empty".into(),
            ));
        }
        if !is_safe_prefix(&c.image_prefix) {
            return Err(Math2SvgError::InvalidConfig(format!(
                "Image prefix must be non-empty and use only [A-Za-z0-9_.-], got {:?}",
                c.image_prefix
            )));
        }
        if c.extensions.is_empty() {
            return Err(Math2SvgError::InvalidConfig(
                "At least one document extension is required".into(),
            ));
        }
        for spec in [&c.inline_container, &c.display_container] {
            if spec.tag.is_empty() {
                return Err(Math2SvgError::InvalidConfig(
                    "Container tag must not be empty".into(),
                ));
            }
        }
        if c.render.inline_font_pt <= 0.0 || c.render.display_font_pt <= c.render.inline_font_pt {
            return Err(Math2SvgError::InvalidConfig(format!(
                "Font sizes must satisfy 0 < inline < display, got {} / {}",
                c.render.inline_font_pt, c.render.display_font_pt
            )));
        }
        if c.manifest.id_prefix.is_empty() || c.manifest.id_width == 0 {
            return Err(Math2SvgError::InvalidConfig(
                "Manifest id prefix must be non-empty and id width ≥ 1".into(),
            ));
        }
        if c.concurrency == 0 || c.render_concurrency == 0 {
            return Err(Math2SvgError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

fn is_safe_prefix(prefix: &str) -> bool {
    !prefix.is_empty()
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

// ── Container definitions ────────────────────────────────────────────────

/// Element predicate identifying a math container.
///
/// Matches when the element name equals `tag` (ASCII case-insensitive) and
/// its `class` attribute contains every token in `classes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub tag: String,
    pub classes: Vec<String>,
}

impl ContainerSpec {
    pub fn new<I, S>(tag: impl Into<String>, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tag: tag.into().to_ascii_lowercase(),
            classes: classes.into_iter().map(Into::into).collect(),
        }
    }

    /// Compare a local element name and raw `class` value against the spec.
    pub fn matches(&self, local_name: &str, class_attr: Option<&str>) -> bool {
        if !local_name.eq_ignore_ascii_case(&self.tag) {
            return false;
        }
        let tokens: Vec<&str> = class_attr.unwrap_or("").split_ascii_whitespace().collect();
        self.classes.iter().all(|c| tokens.contains(&c.as_str()))
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which backend performs primary rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    /// `latex` + `dvisvgm` with the configured preamble; placeholder on failure. (default)
    #[default]
    Full,
    /// No TeX toolchain: every expression becomes a placeholder image.
    Reduced,
}

/// Typesetting parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Font size for inline math, in points. Default: 14.
    pub inline_font_pt: f32,
    /// Font size for display math, in points. Must exceed `inline_font_pt`. Default: 17.
    pub display_font_pt: f32,
    /// Padding around the cropped drawing, in points. Default: 1.
    pub border_pt: f32,
    /// LaTeX preamble lines. Default: `\usepackage{amsmath,amssymb,bm}`.
    pub preamble: String,
    /// Text drawn by the placeholder backend for inline math.
    pub inline_placeholder: String,
    /// Text drawn by the placeholder backend for display math.
    pub display_placeholder: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            inline_font_pt: 14.0,
            display_font_pt: 17.0,
            border_pt: 1.0,
            preamble: r"\usepackage{amsmath,amssymb,bm}".to_string(),
            inline_placeholder: "[math]".to_string(),
            display_placeholder: "[equation]".to_string(),
        }
    }
}

impl RenderOptions {
    pub fn font_pt(&self, kind: crate::model::MathKind) -> f32 {
        match kind {
            crate::model::MathKind::Inline => self.inline_font_pt,
            crate::model::MathKind::Display => self.display_font_pt,
        }
    }

    pub fn placeholder(&self, kind: crate::model::MathKind) -> &str {
        match kind {
            crate::model::MathKind::Inline => &self.inline_placeholder,
            crate::model::MathKind::Display => &self.display_placeholder,
        }
    }
}

/// Manifest identifier conventions for generated items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestOptions {
    /// Identifier prefix; generated ids are `{id_prefix}{n:0width$}`. Default: `image`.
    pub id_prefix: String,
    /// Zero-padding width of the numeric suffix. Default: 4.
    pub id_width: usize,
    /// Media type of generated items. Default: `image/svg+xml`.
    pub media_type: String,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            id_prefix: "image".to_string(),
            id_width: 4,
            media_type: SVG_MEDIA_TYPE.to_string(),
        }
    }
}

/// MIME type of every generated asset.
pub const SVG_MEDIA_TYPE: &str = "image/svg+xml";
