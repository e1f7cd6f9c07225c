//! ManifestMerger: register generated images in the package manifest.
//!
//! The manifest is scanned as XML to find the items container (matched by
//! local name, so `<manifest>` and `<opf:manifest>` both work) and the items
//! already declared; new `<item/>` elements are then spliced into the
//! original text after the last existing item, reusing its indentation and
//! qualified name. Everything else, namespace declarations included, is
//! written back byte for byte.
//!
//! The file's encoding is detected from its BOM or XML declaration and kept
//! on write. Nothing is written when every asset is already listed, so
//! merging the same set twice leaves the file untouched.

use crate::config::ManifestOptions;
use crate::error::Math2SvgError;
use crate::model::ManifestItem;
use crate::output::ManifestReport;
use crate::pipeline::input::{normalize_href, relative_path, to_href, write_atomic};
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8};
use once_cell::sync::Lazy;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Result of merging hrefs into manifest text.
#[derive(Debug, Clone)]
pub struct ManifestMerge {
    pub text: String,
    pub added: Vec<ManifestItem>,
    /// Hrefs that were already declared.
    pub skipped: Vec<String>,
}

/// Merge `assets` into the manifest at `path` and write it back if anything
/// was added.
pub async fn update_manifest(
    path: &Path,
    assets: &BTreeSet<PathBuf>,
    content_root: &Path,
    options: &ManifestOptions,
) -> Result<ManifestReport, Math2SvgError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| Math2SvgError::ManifestNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
    let (text, encoding) = decode(&bytes).map_err(|detail| Math2SvgError::ManifestParse {
        path: path.to_path_buf(),
        detail,
    })?;
    debug!("Manifest {} decoded as {}", path.display(), encoding.label());

    let hrefs: Vec<String> = assets
        .iter()
        .map(|asset| {
            let rel = relative_path(content_root, asset);
            if rel.starts_with("..") {
                warn!(
                    "{} is outside the content root {}",
                    asset.display(),
                    content_root.display()
                );
            }
            to_href(&rel)
        })
        .collect();

    let merge = merge_manifest_str(path, &text, &hrefs, options)?;
    for href in &merge.skipped {
        info!("Manifest already lists {}, skipped", href);
    }

    let mut report = ManifestReport {
        path: path.to_path_buf(),
        added: merge.added,
        skipped: merge.skipped,
        written: false,
    };
    if report.added.is_empty() {
        info!("Manifest {} is up to date", path.display());
        return Ok(report);
    }

    let text = ensure_declaration(&merge.text, encoding.label());
    write_atomic(path, &encoding.encode(&text))
        .await
        .map_err(|e| Math2SvgError::ManifestWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
    report.written = true;
    info!(
        "Added {} items to manifest {}",
        report.added.len(),
        path.display()
    );
    Ok(report)
}

/// Pure merge over decoded manifest text. `path` only labels errors.
pub fn merge_manifest_str(
    path: &Path,
    text: &str,
    hrefs: &[String],
    options: &ManifestOptions,
) -> Result<ManifestMerge, Math2SvgError> {
    let parse_error = |detail: String| Math2SvgError::ManifestParse {
        path: path.to_path_buf(),
        detail,
    };
    let scan = scan(text)
        .map_err(|e| parse_error(e.to_string()))?
        .ok_or_else(|| Math2SvgError::ManifestStructure {
            path: path.to_path_buf(),
        })?;
    if scan.extra_manifests > 0 {
        warn!(
            "{}: {} additional <manifest> elements ignored",
            path.display(),
            scan.extra_manifests
        );
    }
    if scan.unclosed {
        return Err(parse_error("<manifest> is never closed".into()));
    }

    let id_pattern = Regex::new(&format!("^{}(\\d+)$", regex::escape(&options.id_prefix)))
        .map_err(|e| Math2SvgError::Internal(format!("id pattern: {e}")))?;
    let highest = scan
        .ids
        .iter()
        .filter_map(|id| id_pattern.captures(id)?.get(1)?.as_str().parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    // `None` once the numeric range is used up; only an error if an id is needed.
    let mut next = highest.checked_add(1);
    let exhausted = || {
        parse_error(format!(
            "no free \"{}\" item id after {}{}",
            options.id_prefix,
            options.id_prefix,
            highest
        ))
    };
    let taken_ids: HashSet<&str> = scan.ids.iter().map(String::as_str).collect();
    let mut known: HashSet<String> = scan.hrefs.iter().cloned().collect();

    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for href in hrefs {
        let href = normalize_href(href);
        if known.contains(&href) {
            skipped.push(href);
            continue;
        }
        let mut n = next.ok_or_else(exhausted)?;
        let mut id = format!("{}{:0width$}", options.id_prefix, n, width = options.id_width);
        while taken_ids.contains(id.as_str()) {
            n = n.checked_add(1).ok_or_else(exhausted)?;
            id = format!("{}{:0width$}", options.id_prefix, n, width = options.id_width);
        }
        next = n.checked_add(1);
        known.insert(href.clone());
        added.push(ManifestItem {
            id,
            href,
            media_type: options.media_type.clone(),
        });
    }

    let text = if added.is_empty() {
        text.to_string()
    } else {
        splice(text, &scan, &added)
    };
    Ok(ManifestMerge {
        text,
        added,
        skipped,
    })
}

// ── Scan ─────────────────────────────────────────────────────────────────────

struct ManifestScan {
    /// The manifest start tag (or the whole self-closing tag).
    open: Range<usize>,
    qname: String,
    self_closing: bool,
    close_start: Option<usize>,
    last_item: Option<ItemPos>,
    ids: Vec<String>,
    hrefs: Vec<String>,
    extra_manifests: usize,
    unclosed: bool,
}

struct ItemPos {
    start: usize,
    end: usize,
    qname: String,
}

fn scan(text: &str) -> Result<Option<ManifestScan>, quick_xml::Error> {
    let mut reader = Reader::from_str(text);
    let mut found: Option<ManifestScan> = None;
    let mut inside = false;

    loop {
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;
        match &event {
            Event::Start(e) | Event::Empty(e) => {
                let self_closing = matches!(event, Event::Empty(_));
                let start = text[..end].rfind('<').unwrap_or(end);
                let local = e.local_name();
                if local.as_ref() == b"manifest" {
                    if let Some(scan) = found.as_mut() {
                        scan.extra_manifests += 1;
                        continue;
                    }
                    found = Some(ManifestScan {
                        open: start..end,
                        qname: qualified_name(e),
                        self_closing,
                        close_start: None,
                        last_item: None,
                        ids: Vec::new(),
                        hrefs: Vec::new(),
                        extra_manifests: 0,
                        unclosed: false,
                    });
                    inside = !self_closing;
                } else if inside && local.as_ref() == b"item" {
                    if let Some(scan) = found.as_mut() {
                        for attr in e.attributes().flatten() {
                            let raw = String::from_utf8_lossy(&attr.value).into_owned();
                            let value = unescape(&raw).map(|v| v.into_owned()).unwrap_or(raw);
                            match attr.key.local_name().as_ref() {
                                b"id" => scan.ids.push(value),
                                b"href" => scan.hrefs.push(normalize_href(&value)),
                                _ => {}
                            }
                        }
                        scan.last_item = Some(ItemPos {
                            start,
                            end,
                            qname: qualified_name(e),
                        });
                    }
                }
            }
            Event::End(e) if inside => {
                let local = e.local_name();
                if let Some(scan) = found.as_mut() {
                    if local.as_ref() == b"manifest" {
                        scan.close_start = text[..end].rfind("</");
                        inside = false;
                    } else if local.as_ref() == b"item" {
                        if let Some(last) = scan.last_item.as_mut() {
                            last.end = end;
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if inside {
        if let Some(scan) = found.as_mut() {
            scan.unclosed = true;
        }
    }
    Ok(found)
}

fn qualified_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

// ── Splice ───────────────────────────────────────────────────────────────────

fn splice(text: &str, scan: &ManifestScan, items: &[ManifestItem]) -> String {
    let nl = if text.contains("\r\n") { "\r\n" } else { "\n" };
    let manifest_indent = line_indent(text, scan.open.start);

    let render_block = |indent: &str, qname: &str| -> String {
        items
            .iter()
            .map(|item| format!("{nl}{indent}{}", item_markup(qname, item)))
            .collect()
    };

    if let Some(last) = &scan.last_item {
        let indent = line_indent(text, last.start);
        let block = render_block(indent, &last.qname);
        return format!("{}{}{}", &text[..last.end], block, &text[last.end..]);
    }

    let indent = format!("{manifest_indent}  ");
    let item_qname = sibling_name(&scan.qname, "item");
    let mut block = render_block(&indent, &item_qname);

    if scan.self_closing {
        let raw = &text[scan.open.clone()];
        let head = raw.trim_end_matches('>').trim_end_matches('/').trim_end();
        return format!(
            "{}{}>{}{}{}</{}>{}",
            &text[..scan.open.start],
            head,
            block,
            nl,
            manifest_indent,
            scan.qname,
            &text[scan.open.end..]
        );
    }

    let close = scan.close_start.unwrap_or(scan.open.end);
    if !text[scan.open.end..close].contains('\n') {
        block.push_str(nl);
        block.push_str(manifest_indent);
    }
    format!(
        "{}{}{}",
        &text[..scan.open.end],
        block,
        &text[scan.open.end..]
    )
}

fn item_markup(qname: &str, item: &ManifestItem) -> String {
    format!(
        r#"<{qname} id="{}" href="{}" media-type="{}"/>"#,
        escape(item.id.as_str()),
        escape(item.href.as_str()),
        escape(item.media_type.as_str())
    )
}

/// Whitespace between the start of the line and `pos`, or `""` when the
/// line holds other content before it.
fn line_indent(text: &str, pos: usize) -> &str {
    let line_start = text[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let prefix = &text[line_start..pos];
    if prefix.chars().all(char::is_whitespace) {
        prefix
    } else {
        ""
    }
}

/// `opf:manifest` + `item` → `opf:item`.
fn sibling_name(qname: &str, local: &str) -> String {
    match qname.split_once(':') {
        Some((prefix, _)) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

/// How the manifest bytes were encoded.
#[derive(Debug, Clone, Copy)]
pub struct SourceEncoding {
    pub encoding: &'static Encoding,
    pub bom: bool,
}

impl SourceEncoding {
    pub fn label(&self) -> &'static str {
        self.encoding.name()
    }

    /// Encode `text` back into the original encoding (and BOM).
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len() + 3);
        if self.encoding == UTF_16LE || self.encoding == UTF_16BE {
            let le = self.encoding == UTF_16LE;
            if self.bom {
                out.extend_from_slice(if le { &[0xFFu8, 0xFE][..] } else { &[0xFEu8, 0xFF][..] });
            }
            for unit in text.encode_utf16() {
                out.extend_from_slice(&if le { unit.to_le_bytes() } else { unit.to_be_bytes() });
            }
            return out;
        }
        if self.bom && self.encoding == UTF_8 {
            out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
        }
        let (bytes, _, unmappable) = self.encoding.encode(text);
        if unmappable {
            warn!(
                "Manifest text has characters outside {}; written as character references",
                self.encoding.name()
            );
        }
        out.extend_from_slice(&bytes);
        out
    }
}

static RE_DECL_ENCODING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:-]+)["']"#).unwrap()
});

/// Decode manifest bytes, honouring a BOM, then the XML declaration.
pub fn decode(bytes: &[u8]) -> Result<(String, SourceEncoding), String> {
    let (encoding, bom, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, true, &bytes[bom_len..]),
        None => {
            let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
            let declared = RE_DECL_ENCODING
                .captures(&head)
                .and_then(|c| c.get(1))
                .and_then(|m| Encoding::for_label(m.as_str().as_bytes()));
            (declared.unwrap_or(UTF_8), false, bytes)
        }
    };
    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        return Err(format!("content is not valid {}", encoding.name()));
    }
    Ok((text.into_owned(), SourceEncoding { encoding, bom }))
}

/// Prefix an XML declaration when the text has none.
pub fn ensure_declaration(text: &str, label: &str) -> String {
    if text.trim_start().starts_with("<?xml") {
        text.to_string()
    } else {
        format!("<?xml version=\"1.0\" encoding=\"{label}\"?>\n{text}")
    }
}
