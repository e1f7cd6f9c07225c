//! Rendering: LaTeX source → SVG file.
//!
//! ## Backends
//!
//! A [`MathBackend`] turns one normalized source into SVG bytes. It is
//! synchronous and may block (the TeX backend spawns two processes), so the
//! [`Renderer`] always calls it through `tokio::task::spawn_blocking`.
//!
//! * [`LatexBackend`] — `latex` + `dvisvgm` with the configured preamble
//! * [`PlaceholderBackend`] — pure Rust, no macro expansion; draws the
//!   placeholder text and carries the source in the SVG `<title>`
//!
//! ## Fallback
//!
//! In full mode the primary backend runs first; any failure (bad LaTeX,
//! missing package, crash, non-SVG output, write error) is logged and the
//! placeholder backend is tried once. If that fails as well the expression is
//! [`RenderStatus::Failed`] and nothing is written. In reduced mode the
//! placeholder is the only backend and every image is
//! [`RenderStatus::RenderedFallback`].
//!
//! ## Reuse
//!
//! An existing target is reused without a render unless overwriting is on.
//! Placeholders carry [`PLACEHOLDER_CLASS`] on their root element: with a
//! primary backend they are rendered again, in reduced mode they are reused
//! and still count as [`RenderStatus::RenderedFallback`].
//!
//! ## Why a semaphore?
//!
//! Documents are processed concurrently and each may hold hundreds of
//! expressions. `render_concurrency` caps backend invocations across the
//! whole run, independently of how many documents are in flight.

use crate::config::{ConversionConfig, RenderMode, RenderOptions};
use crate::error::{Math2SvgError, RenderFailure};
use crate::model::{MathExpression, MathKind, RenderStatus, RenderedAsset};
use crate::pipeline::input::write_atomic_blocking;
use crate::pipeline::naming;
use crate::pipeline::sanitize::{leading_environment, NUMBERED_ENVIRONMENTS};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use tex_locate::{locate_toolchain, SearchPath, Toolchain};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// A synchronous LaTeX → SVG renderer.
pub trait MathBackend: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    /// Render `source` (already normalized) and return the SVG document.
    fn render(
        &self,
        source: &str,
        kind: MathKind,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderFailure>;
}

// ── TeX backend ──────────────────────────────────────────────────────────────

const JOB_NAME: &str = "expr";

/// Full-capability backend driving an installed TeX toolchain.
#[derive(Debug, Clone)]
pub struct LatexBackend {
    toolchain: Toolchain,
    path_value: OsString,
}

impl LatexBackend {
    pub fn new(toolchain: Toolchain) -> Result<Self, Math2SvgError> {
        let path_value = toolchain
            .search_path
            .to_os_string()
            .map_err(|e| Math2SvgError::BackendUnavailable {
                reason: e.to_string(),
                hint: BACKEND_HINT.to_string(),
            })?;
        Ok(Self {
            toolchain,
            path_value,
        })
    }

    /// Locate the toolchain on the search path derived from `override_dir`.
    ///
    /// Blocking: probes each program with `--version`.
    pub fn discover(override_dir: Option<&Path>) -> Result<Self, Math2SvgError> {
        let search_path = SearchPath::resolve(override_dir);
        debug!("Backend search path: {}", search_path);
        let toolchain =
            locate_toolchain(&search_path).map_err(|e| Math2SvgError::BackendUnavailable {
                reason: e.to_string(),
                hint: BACKEND_HINT.to_string(),
            })?;
        info!(
            "Using {} ({}) and {} ({})",
            toolchain.latex.display(),
            toolchain.latex_version,
            toolchain.dvisvgm.display(),
            toolchain.dvisvgm_version
        );
        Self::new(toolchain)
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    fn run(&self, program: &Path, args: &[OsString], cwd: &Path) -> Result<(), String> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .env("PATH", &self.path_value)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("cannot run {}: {}", program.display(), e))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let tail = stderr
            .lines()
            .chain(stdout.lines())
            .map(str::trim)
            .rfind(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        Err(format!("{} exited with {}: {}", program.display(), output.status, tail))
    }
}

const BACKEND_HINT: &str = "Install a TeX distribution providing `latex` and `dvisvgm`, \
point --latex-path at their directory, or re-run with --reduced to render placeholder images";

impl MathBackend for LatexBackend {
    fn name(&self) -> &str {
        "latex"
    }

    fn render(
        &self,
        source: &str,
        kind: MathKind,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderFailure> {
        let failure = |detail: String| RenderFailure::Backend {
            backend: self.name().to_string(),
            detail,
        };

        let dir = tempfile::Builder::new()
            .prefix("math2svg-")
            .tempdir()
            .map_err(|e| failure(format!("cannot create work directory: {e}")))?;
        let tex_path = dir.path().join(format!("{JOB_NAME}.tex"));
        std::fs::write(&tex_path, latex_document(source, kind, options))
            .map_err(|e| failure(format!("cannot write {}: {e}", tex_path.display())))?;

        let latex_args: Vec<OsString> = vec![
            "-interaction=nonstopmode".into(),
            "-halt-on-error".into(),
            format!("-output-directory={}", dir.path().display()).into(),
            format!("{JOB_NAME}.tex").into(),
        ];
        if let Err(detail) = self.run(&self.toolchain.latex, &latex_args, dir.path()) {
            let log = std::fs::read_to_string(dir.path().join(format!("{JOB_NAME}.log")))
                .unwrap_or_default();
            return Err(failure(first_tex_error(&log).unwrap_or(detail)));
        }

        let svg_path = dir.path().join(format!("{JOB_NAME}.svg"));
        let dvisvgm_args: Vec<OsString> = vec![
            "--no-fonts".into(),
            "--exact-bbox".into(),
            "-o".into(),
            svg_path.clone().into_os_string(),
            format!("{JOB_NAME}.dvi").into(),
        ];
        self.run(&self.toolchain.dvisvgm, &dvisvgm_args, dir.path())
            .map_err(failure)?;

        std::fs::read(&svg_path).map_err(|e| failure(format!("no SVG produced: {e}")))
    }
}

/// First `!` error line of a TeX log.
fn first_tex_error(log: &str) -> Option<String> {
    log.lines()
        .find(|l| l.starts_with('!'))
        .map(|l| l.trim().to_string())
}

/// Standalone document for one expression.
///
/// Sources led by a display environment are typeset as-is, with numbered
/// environments switched to their starred form; the equation number lives in
/// the markup next to the image. Other display sources go inside `\[ … \]`,
/// where `split` and friends are legal. Inline sources are text-style math.
pub fn latex_document(source: &str, kind: MathKind, options: &RenderOptions) -> String {
    let size = options.font_pt(kind);
    let skip = size * 1.2;

    let env = leading_environment(source);
    let is_display_env = env
        .map(|e| NUMBERED_ENVIRONMENTS.contains(&e))
        .unwrap_or(false);

    let display_options = format!("border={}pt,varwidth", options.border_pt);
    let (class_options, body) = if is_display_env {
        let name = env.unwrap_or_default();
        let body = if name.ends_with('*') {
            source.to_string()
        } else {
            star_environment(source, name)
        };
        (display_options, body)
    } else {
        match kind {
            MathKind::Inline => (format!("border={}pt", options.border_pt), format!("${source}$")),
            // `--exact-bbox` crops the display skips
            MathKind::Display => (display_options, format!("\\[ {source} \\]")),
        }
    };

    format!(
        "\\RequirePackage{{fix-cm}}\n\
         \\documentclass[{class_options}]{{standalone}}\n\
         {preamble}\n\
         \\begin{{document}}\n\
         \\fontsize{{{size}pt}}{{{skip:.1}pt}}\\selectfont\n\
         {body}\n\
         \\end{{document}}\n",
        preamble = options.preamble,
    )
}

fn star_environment(source: &str, name: &str) -> String {
    let open = format!("\\begin{{{name}}}");
    let close = format!("\\end{{{name}}}");
    match (source.strip_prefix(&open), source.rfind(&close)) {
        (Some(_), Some(close_at)) if close_at >= open.len() => format!(
            "\\begin{{{name}*}}{}\\end{{{name}*}}{}",
            &source[open.len()..close_at],
            &source[close_at + close.len()..]
        ),
        _ => source.to_string(),
    }
}

// ── Placeholder backend ──────────────────────────────────────────────────────

/// Class on the root `<svg>` of every placeholder image.
pub const PLACEHOLDER_CLASS: &str = "math2svg-placeholder";

/// Reduced-capability backend: no TeX, just a visible placeholder.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderBackend;

impl MathBackend for PlaceholderBackend {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn render(
        &self,
        source: &str,
        kind: MathKind,
        options: &RenderOptions,
    ) -> Result<Vec<u8>, RenderFailure> {
        placeholder_svg(source, kind, options).map_err(|detail| RenderFailure::Backend {
            backend: self.name().to_string(),
            detail,
        })
    }
}

fn placeholder_svg(source: &str, kind: MathKind, options: &RenderOptions) -> Result<Vec<u8>, String> {
    let size = options.font_pt(kind);
    let label = options.placeholder(kind);
    let border = options.border_pt;
    let width = label.chars().count() as f32 * size * 0.6 + 2.0 * border;
    let height = size * 1.4 + 2.0 * border;
    let baseline = border + size * 1.05;

    let width_attr = format!("{width:.2}pt");
    let height_attr = format!("{height:.2}pt");
    let view_box = format!("0 0 {width:.2} {height:.2}");
    let x = format!("{border:.2}");
    let y = format!("{baseline:.2}");
    let font_size = format!("{size:.2}");

    let mut writer = Writer::new(Vec::new());
    let svg = BytesStart::new("svg").with_attributes([
        ("xmlns", "http://www.w3.org/2000/svg"),
        ("class", PLACEHOLDER_CLASS),
        ("width", width_attr.as_str()),
        ("height", height_attr.as_str()),
        ("viewBox", view_box.as_str()),
    ]);
    let text = BytesStart::new("text").with_attributes([
        ("x", x.as_str()),
        ("y", y.as_str()),
        ("font-family", "serif"),
        ("font-style", "italic"),
        ("font-size", font_size.as_str()),
        ("fill", "#444444"),
    ]);

    let events = [
        Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        Event::Start(svg),
        Event::Start(BytesStart::new("title")),
        Event::Text(BytesText::new(source)),
        Event::End(BytesEnd::new("title")),
        Event::Start(text),
        Event::Text(BytesText::new(label)),
        Event::End(BytesEnd::new("text")),
        Event::End(BytesEnd::new("svg")),
    ];
    for event in events {
        writer.write_event(event).map_err(|e| e.to_string())?;
    }
    Ok(writer.into_inner())
}

// ── Renderer ─────────────────────────────────────────────────────────────────

/// Drives the backends for one run.
#[derive(Clone)]
pub struct Renderer {
    primary: Option<Arc<dyn MathBackend>>,
    fallback: Arc<dyn MathBackend>,
    options: RenderOptions,
    permits: Arc<Semaphore>,
    overwrite: bool,
}

impl Renderer {
    /// Full mode: `primary` first, placeholder on failure.
    pub fn new(primary: Arc<dyn MathBackend>, options: RenderOptions, concurrency: usize) -> Self {
        Self {
            primary: Some(primary),
            fallback: Arc::new(PlaceholderBackend),
            options,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            overwrite: false,
        }
    }

    /// Reduced mode: placeholder only.
    pub fn reduced(options: RenderOptions, concurrency: usize) -> Self {
        Self {
            primary: None,
            fallback: Arc::new(PlaceholderBackend),
            options,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            overwrite: false,
        }
    }

    /// Replace the fallback backend.
    pub fn with_fallback(mut self, fallback: Arc<dyn MathBackend>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Re-render even when `target` already exists.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn primary_name(&self) -> &str {
        self.primary
            .as_deref()
            .map(|b| b.name())
            .unwrap_or_else(|| self.fallback.name())
    }

    /// Render `expr` to `target`.
    ///
    /// Never returns an error: failures are recorded on the asset.
    pub async fn render(&self, expr: &MathExpression, target: PathBuf) -> RenderedAsset {
        let content_key = naming::content_key(&expr.normalized_source, expr.kind);
        let asset = |status, reused, failure| RenderedAsset {
            content_key: content_key.clone(),
            file_path: target.clone(),
            status,
            reused,
            failure,
        };

        if !self.overwrite {
            match existing(&target).await {
                Existing::Missing => {}
                Existing::Image => {
                    debug!("Reusing existing {}", target.display());
                    return asset(RenderStatus::Rendered, true, None);
                }
                Existing::Placeholder if self.primary.is_none() => {
                    debug!("Reusing existing placeholder {}", target.display());
                    return asset(RenderStatus::RenderedFallback, true, None);
                }
                Existing::Placeholder => {
                    debug!("Replacing placeholder {}", target.display());
                }
            }
        }

        let _permit = match self.permits.acquire().await {
            Ok(p) => p,
            Err(e) => {
                let failure = RenderFailure::Join(e.to_string());
                error!("Cannot schedule render of {}: {}", expr.excerpt(), failure);
                return asset(RenderStatus::Failed, false, Some(failure));
            }
        };

        let mut primary_failure = None;
        if let Some(primary) = &self.primary {
            match self.attempt(primary.clone(), expr, &target).await {
                Ok(()) => {
                    debug!("Rendered {} with {}", target.display(), primary.name());
                    return asset(RenderStatus::Rendered, false, None);
                }
                Err(f) => {
                    warn!(
                        "{} could not render {:?}: {}; using {} fallback",
                        primary.name(),
                        expr.excerpt(),
                        f,
                        self.fallback.name()
                    );
                    primary_failure = Some(f);
                }
            }
        }

        match self.attempt(self.fallback.clone(), expr, &target).await {
            Ok(()) => asset(RenderStatus::RenderedFallback, false, primary_failure),
            Err(f) => {
                error!(
                    "Giving up on {:?}: {} fallback failed: {}",
                    expr.excerpt(),
                    self.fallback.name(),
                    f
                );
                asset(RenderStatus::Failed, false, Some(f))
            }
        }
    }

    async fn attempt(
        &self,
        backend: Arc<dyn MathBackend>,
        expr: &MathExpression,
        target: &Path,
    ) -> Result<(), RenderFailure> {
        let source = expr.normalized_source.clone();
        let kind = expr.kind;
        let options = self.options.clone();
        let target = target.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let bytes = backend.render(&source, kind, &options)?;
            if !looks_like_svg(&bytes) {
                return Err(RenderFailure::InvalidOutput {
                    backend: backend.name().to_string(),
                });
            }
            write_atomic_blocking(&target, &bytes).map_err(|e| RenderFailure::WriteFailed {
                path: target.clone(),
                detail: e.to_string(),
            })
        })
        .await
        .map_err(|e| RenderFailure::Join(e.to_string()))?
    }
}

/// What already sits at a render target.
enum Existing {
    Missing,
    Image,
    Placeholder,
}

async fn existing(path: &Path) -> Existing {
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Existing::Missing;
    }
    match tokio::fs::read(path).await {
        Ok(bytes) if is_placeholder(&bytes) => Existing::Placeholder,
        _ => Existing::Image,
    }
}

fn is_placeholder(bytes: &[u8]) -> bool {
    let marker = format!("class=\"{PLACEHOLDER_CLASS}\"");
    bytes.windows(marker.len()).any(|w| w == marker.as_bytes())
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    bytes.windows(4).any(|w| w == b"<svg")
}

/// Build the run's [`Renderer`] from the config.
///
/// Priority: an injected backend, then reduced mode, then toolchain
/// discovery. Discovery failure is fatal here, before any document is read.
pub async fn resolve_renderer(config: &ConversionConfig) -> Result<Renderer, Math2SvgError> {
    let renderer = if let Some(backend) = &config.backend {
        info!("Using injected {} backend", backend.name());
        Renderer::new(backend.clone(), config.render.clone(), config.render_concurrency)
    } else {
        match config.render_mode {
            RenderMode::Reduced => {
                info!("Reduced render mode: every expression becomes a placeholder image");
                Renderer::reduced(config.render.clone(), config.render_concurrency)
            }
            RenderMode::Full => {
                let override_dir = config.backend_path.clone();
                let backend = tokio::task::spawn_blocking(move || {
                    LatexBackend::discover(override_dir.as_deref())
                })
                .await
                .map_err(|e| Math2SvgError::Internal(format!("Backend discovery panicked: {e}")))??;
                Renderer::new(Arc::new(backend), config.render.clone(), config.render_concurrency)
            }
        }
    };
    Ok(renderer.with_overwrite(config.overwrite_assets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sanitize::normalize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBackend(&'static [u8]);

    impl MathBackend for FixedBackend {
        fn name(&self) -> &str {
            "fixed"
        }
        fn render(&self, _: &str, _: MathKind, _: &RenderOptions) -> Result<Vec<u8>, RenderFailure> {
            Ok(self.0.to_vec())
        }
    }

    struct FailingBackend(AtomicUsize);

    impl MathBackend for FailingBackend {
        fn name(&self) -> &str {
            "failing"
        }
        fn render(&self, _: &str, _: MathKind, _: &RenderOptions) -> Result<Vec<u8>, RenderFailure> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(RenderFailure::Backend {
                backend: "failing".into(),
                detail: "! Undefined control sequence.".into(),
            })
        }
    }

    fn expr(src: &str, kind: MathKind) -> MathExpression {
        MathExpression::new(kind, 0..src.len(), src.to_string(), src.to_string())
    }

    const SVG: &[u8] = b"<?xml version='1.0'?><svg xmlns='http://www.w3.org/2000/svg'/>";

    #[test]
    fn inline_document_uses_text_math() {
        let doc = latex_document("x^2", MathKind::Inline, &RenderOptions::default());
        assert!(doc.contains("{standalone}"));
        assert!(doc.contains(r"\usepackage{amsmath,amssymb,bm}"));
        assert!(doc.contains("$x^2$"));
        assert!(doc.contains(r"\fontsize{14pt}"));
    }

    #[test]
    fn display_document_is_larger_and_in_display_math() {
        let doc = latex_document(r"\sum_i i", MathKind::Display, &RenderOptions::default());
        assert!(doc.contains(r"\[ \sum_i i \]"));
        assert!(doc.contains("varwidth"));
        assert!(doc.contains(r"\fontsize{17pt}"));
        assert!(!doc.contains('$'));
    }

    #[test]
    fn numbered_environment_is_starred() {
        let doc = latex_document(
            r"\begin{align}a &= b\end{align}",
            MathKind::Display,
            &RenderOptions::default(),
        );
        assert!(doc.contains(r"\begin{align*}a &= b\end{align*}"));
        assert!(doc.contains("varwidth"));
        assert!(!doc.contains('$'));
    }

    #[test]
    fn inner_alignment_is_wrapped_in_display_math() {
        let doc = latex_document(
            r"\begin{aligned}a\end{aligned}",
            MathKind::Display,
            &RenderOptions::default(),
        );
        assert!(doc.contains(r"\[ \begin{aligned}a\end{aligned} \]"));
    }

    #[test]
    fn sphinx_split_display_is_typeset_in_display_math() {
        let source = normalize(r"\[\begin{split}a &amp;= b\\ &amp;= c\end{split}\]");
        assert_eq!(source, r"\begin{split}a &= b\\ &= c\end{split}");

        let doc = latex_document(&source, MathKind::Display, &RenderOptions::default());
        assert!(doc.contains(r"\[ \begin{split}a &= b\\ &= c\end{split} \]"));
        assert!(doc.contains(r"\documentclass[border=1pt,varwidth]{standalone}"));
        assert!(!doc.contains(r"\displaystyle"));
        assert!(!doc.contains('$'));
    }

    #[test]
    fn tex_error_line_extracted() {
        let log = "This is pdfTeX\n(./expr.tex\n! Undefined control sequence.\nl.5 \\foo\n";
        assert_eq!(
            first_tex_error(log).as_deref(),
            Some("! Undefined control sequence.")
        );
        assert!(first_tex_error("all good").is_none());
    }

    #[test]
    fn placeholder_is_svg_with_escaped_title() {
        let bytes = PlaceholderBackend
            .render("a < b & c", MathKind::Inline, &RenderOptions::default())
            .unwrap();
        let svg = String::from_utf8(bytes).unwrap();
        assert!(svg.starts_with("<?xml"));
        assert!(svg.contains("<svg"));
        assert!(svg.contains("<title>a &lt; b &amp; c</title>"));
        assert!(svg.contains("[math]"));
        assert!(is_placeholder(svg.as_bytes()));
        assert!(!is_placeholder(SVG));
    }

    #[test]
    fn placeholder_differs_by_kind() {
        let opts = RenderOptions::default();
        let inline = PlaceholderBackend.render("x", MathKind::Inline, &opts).unwrap();
        let display = PlaceholderBackend.render("x", MathKind::Display, &opts).unwrap();
        assert!(String::from_utf8_lossy(&display).contains("[equation]"));
        assert_ne!(inline, display);
    }

    #[tokio::test]
    async fn primary_success_is_rendered() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let r = Renderer::new(Arc::new(FixedBackend(SVG)), RenderOptions::default(), 2);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::Rendered);
        assert!(!asset.reused);
        assert_eq!(std::fs::read(&target).unwrap(), SVG);
    }

    #[tokio::test]
    async fn primary_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let failing = Arc::new(FailingBackend(AtomicUsize::new(0)));
        let r = Renderer::new(failing.clone(), RenderOptions::default(), 1);
        let asset = r.render(&expr(r"\bad", MathKind::Display), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::RenderedFallback);
        assert!(matches!(asset.failure, Some(RenderFailure::Backend { .. })));
        assert!(String::from_utf8(std::fs::read(&target).unwrap())
            .unwrap()
            .contains("[equation]"));
        assert_eq!(failing.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn both_failing_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let r = Renderer::new(
            Arc::new(FailingBackend(AtomicUsize::new(0))),
            RenderOptions::default(),
            1,
        )
        .with_fallback(Arc::new(FailingBackend(AtomicUsize::new(0))));
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::Failed);
        assert!(!asset.is_usable());
        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn non_svg_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let r = Renderer::new(Arc::new(FixedBackend(b"%PDF-1.5")), RenderOptions::default(), 1);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::RenderedFallback);
        assert!(matches!(asset.failure, Some(RenderFailure::InvalidOutput { .. })));
    }

    #[tokio::test]
    async fn existing_target_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        std::fs::write(&target, SVG).unwrap();
        let failing = Arc::new(FailingBackend(AtomicUsize::new(0)));
        let r = Renderer::new(failing.clone(), RenderOptions::default(), 1);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::Rendered);
        assert!(asset.reused);
        assert_eq!(failing.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn existing_placeholder_is_rerendered_by_primary() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let opts = RenderOptions::default();
        std::fs::write(&target, PlaceholderBackend.render("x", MathKind::Inline, &opts).unwrap())
            .unwrap();

        let r = Renderer::new(Arc::new(FixedBackend(SVG)), opts, 1);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::Rendered);
        assert!(!asset.reused);
        assert_eq!(std::fs::read(&target).unwrap(), SVG);
    }

    #[tokio::test]
    async fn existing_placeholder_in_reduced_mode_is_reused_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let opts = RenderOptions::default();
        let placeholder = PlaceholderBackend.render("x", MathKind::Inline, &opts).unwrap();
        std::fs::write(&target, &placeholder).unwrap();

        let r = Renderer::reduced(opts, 1);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::RenderedFallback);
        assert!(asset.reused);
        assert_eq!(std::fs::read(&target).unwrap(), placeholder);
    }

    #[tokio::test]
    async fn reduced_mode_renders_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("m.svg");
        let r = Renderer::reduced(RenderOptions::default(), 1);
        let asset = r.render(&expr("x", MathKind::Inline), target.clone()).await;
        assert_eq!(asset.status, RenderStatus::RenderedFallback);
        assert!(asset.failure.is_none());
        assert_eq!(r.primary_name(), "placeholder");
    }

    #[tokio::test]
    async fn injected_backend_takes_precedence() {
        let config = ConversionConfig::builder("docs", "img")
            .backend(Arc::new(FixedBackend(SVG)))
            .render_mode(RenderMode::Reduced)
            .build()
            .unwrap();
        let r = resolve_renderer(&config).await.unwrap();
        assert_eq!(r.primary_name(), "fixed");
    }

    #[tokio::test]
    async fn missing_toolchain_is_backend_unavailable() {
        let empty = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder("docs", "img")
            .backend_path(empty.path())
            .build()
            .unwrap();
        // Only meaningful where no TeX is installed on PATH either.
        if tex_locate::SearchPath::resolve(Some(empty.path()))
            .find_program(tex_locate::LATEX_PROGRAM)
            .is_some()
        {
            return;
        }
        let err = resolve_renderer(&config).await.err().unwrap();
        assert!(matches!(err, Math2SvgError::BackendUnavailable { .. }));
        assert!(err.to_string().contains("--reduced"));
    }
}
