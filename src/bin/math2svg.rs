//! CLI binary for epub-math2svg.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use epub_math2svg::{
    convert, inspect, ConversionConfig, ConversionOutput, ConversionProgressCallback, RenderMode,
    ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the run and a log line per
/// document. Documents complete out of order when `--concurrency > 1`.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_conversion_start` reports the document count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Locating TeX toolchain…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
    }

    fn elapsed(&self, path: &Path) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(path))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting math in {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, path: &Path, _total: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(path.to_path_buf(), Instant::now());
        }
        self.bar.set_message(file_name(path));
    }

    fn on_document_complete(&self, path: &Path, _total: usize, replaced: usize, failed: usize) {
        let secs = self.elapsed(path);
        let mark = if failed == 0 { green("✓") } else { yellow("⚠") };
        let failed_note = if failed == 0 {
            String::new()
        } else {
            format!("  {}", yellow(&format!("{failed} left as markup")))
        };
        self.bar.println(format!(
            "  {} {:<32}  {}{}  {}",
            mark,
            file_name(path),
            dim(&format!("{replaced:>4} replaced")),
            failed_note,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, path: &Path, _total: usize, error: &str) {
        let secs = self.elapsed(path);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<32}  {}  {}",
            red("✗"),
            file_name(path),
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents processed",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents processed  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every chapter and register the images in the package manifest
  math2svg book/OEBPS/text book/OEBPS/images --manifest book/OEBPS/content.opf

  # Use a TeX installation outside PATH
  math2svg text images --latex-path /opt/texlive/2024/bin/x86_64-linux

  # No TeX available: placeholder image for every expression
  math2svg --reduced text images

  # Dry run: count expressions, render nothing
  math2svg --inspect-only text images

  # Machine-readable summary
  math2svg --json text images --manifest content.opf > report.json

REQUIREMENTS:
  latex and dvisvgm (TeX Live or MiKTeX), with the standalone, varwidth,
  fix-cm, amsmath, amssymb and bm packages. The directory given by
  --latex-path (default: ~/bin) is searched first, then PATH.

ENVIRONMENT VARIABLES:
  MATH2SVG_*       Every flag can be set as MATH2SVG_<FLAG> (e.g. MATH2SVG_REDUCED=1)
  RUST_LOG         Overrides the log filter (e.g. RUST_LOG=epub_math2svg=debug)
"#;

/// Replace LaTeX math in XHTML documents with SVG images.
#[derive(Parser, Debug)]
#[command(
    name = "math2svg",
    version,
    about = "Replace LaTeX math in XHTML/HTML documents with SVG images",
    long_about = "Render every inline and display math expression in a directory of XHTML/HTML \
documents to a content-addressed SVG image, rewrite the documents to reference the images, and \
register the images in the EPUB package manifest.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the documents to convert.
    #[arg(env = "MATH2SVG_DOCUMENTS_DIR")]
    documents_dir: PathBuf,

    /// Directory receiving the SVG images (created if missing).
    #[arg(env = "MATH2SVG_IMAGES_DIR")]
    images_dir: PathBuf,

    /// EPUB package manifest (content.opf) to register the images in.
    #[arg(short, long, env = "MATH2SVG_MANIFEST")]
    manifest: Option<PathBuf>,

    /// Directory manifest hrefs are relative to. Default: derived from --manifest.
    #[arg(long, env = "MATH2SVG_CONTENT_ROOT")]
    content_root: Option<PathBuf>,

    /// Filename prefix for generated images.
    #[arg(long, env = "MATH2SVG_PREFIX", default_value = "math_")]
    prefix: String,

    /// Directory containing latex and dvisvgm, searched before PATH.
    #[arg(long, env = "MATH2SVG_LATEX_PATH")]
    latex_path: Option<PathBuf>,

    /// Render placeholders only; no TeX installation required.
    #[arg(long, env = "MATH2SVG_REDUCED")]
    reduced: bool,

    /// Number of documents processed concurrently.
    #[arg(short, long, env = "MATH2SVG_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Number of TeX runs in flight.
    #[arg(long, env = "MATH2SVG_RENDER_JOBS", default_value_t = 4)]
    render_jobs: usize,

    /// Re-render images that already exist.
    #[arg(long, env = "MATH2SVG_OVERWRITE")]
    overwrite: bool,

    /// Output structured JSON (ConversionOutput) on stdout.
    #[arg(long, env = "MATH2SVG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MATH2SVG_NO_PROGRESS")]
    no_progress: bool,

    /// Count expressions per document; render and write nothing.
    #[arg(long)]
    inspect_only: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MATH2SVG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MATH2SVG_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.inspect_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let reports = inspect(&config)
            .await
            .context("Failed to inspect documents")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&reports).context("Failed to serialise report")?
            );
        } else {
            for r in &reports {
                match &r.error {
                    Some(e) => println!("{:<40} {}", file_name(&r.path), red(&e.to_string())),
                    None => println!(
                        "{:<40} {:>4} inline  {:>4} display  {:>4} images ({} existing)",
                        file_name(&r.path),
                        r.inline,
                        r.display,
                        r.images.len(),
                        r.existing_images
                    ),
                }
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    let output = convert(&config).await.context("Conversion failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&output, show_progress);
    }

    let exit = if output.manifest_error.is_some() || output.stats.documents_failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    };
    if let Err(e) = output.into_result() {
        eprintln!("{} {}", red("error:"), e);
    }
    Ok(exit)
}

fn print_summary(output: &ConversionOutput, show_progress: bool) {
    let s = &output.stats;
    if !show_progress {
        eprintln!(
            "Processed {}/{} documents in {}ms",
            s.documents_processed, s.documents_total, s.total_duration_ms
        );
    }
    eprintln!(
        "   {} expressions  →  {} replaced, {} left as markup",
        s.expressions_found,
        bold(&s.replaced.to_string()),
        s.left_untouched
    );
    eprintln!(
        "   {} images: {} rendered, {} placeholder, {} reused, {} failed",
        s.assets_total,
        s.rendered,
        if s.fallback > 0 {
            yellow(&s.fallback.to_string())
        } else {
            s.fallback.to_string()
        },
        dim(&s.reused.to_string()),
        if s.failed > 0 {
            red(&s.failed.to_string())
        } else {
            s.failed.to_string()
        },
    );
    if let Some(m) = &output.manifest {
        eprintln!(
            "   manifest {}: {} added, {} already present",
            bold(&m.path.display().to_string()),
            m.added.len(),
            m.skipped.len()
        );
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder(&cli.documents_dir, &cli.images_dir)
        .image_prefix(cli.prefix.clone())
        .render_mode(if cli.reduced {
            RenderMode::Reduced
        } else {
            RenderMode::Full
        })
        .concurrency(cli.concurrency)
        .render_concurrency(cli.render_jobs)
        .overwrite_assets(cli.overwrite);

    if let Some(ref manifest) = cli.manifest {
        builder = builder.manifest_path(manifest);
    }
    if let Some(ref root) = cli.content_root {
        builder = builder.content_root(root);
    }
    if let Some(ref dir) = cli.latex_path {
        builder = builder.backend_path(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
