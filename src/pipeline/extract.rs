//! Extractor: locate math containers and the exact byte span to replace.
//!
//! The primary scan walks the document as an XML event stream and matches
//! containers by element name and `class` tokens ([`ContainerSpec`]), so
//! attribute order, extra classes and nested markup do not matter. Byte
//! positions come from the reader, which makes every span an exact slice
//! of the original text and leaves everything outside it untouched.
//!
//! Documents the XML reader rejects (unterminated comments, stray markup)
//! fall back to a tag-pattern scan over the same container definitions.
//!
//! Containers never overlap: while one is open, nested elements (including
//! other containers) are part of its content. Containers whose LaTeX is
//! empty or lacks its closing delimiter are skipped with a warning.

use crate::config::ContainerSpec;
use crate::model::{MathExpression, MathKind};
use crate::pipeline::sanitize::has_balanced_delimiters;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use std::ops::Range;
use std::path::Path;
use tracing::{debug, warn};

/// Class token of the equation-number element inside a display container.
pub const EQNO_CLASS: &str = "eqno";

/// Find every math container in `text`, ordered by position.
///
/// `origin` only labels diagnostics.
pub fn extract(
    text: &str,
    inline: &ContainerSpec,
    display: &ContainerSpec,
    origin: &Path,
) -> Vec<MathExpression> {
    match structured_scan(text, inline, display, origin) {
        Ok(found) => {
            debug!("{}: {} math containers", origin.display(), found.len());
            found
        }
        Err(e) => {
            warn!(
                "{}: markup is not well-formed ({}), falling back to pattern scan",
                origin.display(),
                e
            );
            pattern_scan(text, inline, display, origin)
        }
    }
}

// ── Structured scan ──────────────────────────────────────────────────────────

struct OpenContainer {
    kind: MathKind,
    tag: String,
    start: usize,
    content_start: usize,
    /// Nested elements with the container's own name.
    depth: usize,
    id: Option<String>,
    eqno: Option<OpenEqno>,
    eqno_range: Option<Range<usize>>,
    eqno_text: String,
}

struct OpenEqno {
    start: usize,
    span_depth: usize,
    anchor_depth: usize,
}

fn structured_scan(
    text: &str,
    inline: &ContainerSpec,
    display: &ContainerSpec,
    origin: &Path,
) -> Result<Vec<MathExpression>, quick_xml::Error> {
    let mut reader = Reader::from_str(text);
    {
        let config = reader.config_mut();
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut found = Vec::new();
    let mut open: Option<OpenContainer> = None;

    loop {
        let event = reader.read_event()?;
        let end = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                let local = local_name(&e);
                let tag_start = tag_start(text, end);
                match open.as_mut() {
                    Some(c) => {
                        if local.eq_ignore_ascii_case(&c.tag) {
                            c.depth += 1;
                        }
                        if c.kind == MathKind::Display {
                            track_eqno_start(c, &local, &e, tag_start);
                        }
                    }
                    None => {
                        let class = attribute(&e, "class");
                        let kind = if display.matches(&local, class.as_deref()) {
                            Some(MathKind::Display)
                        } else if inline.matches(&local, class.as_deref()) {
                            Some(MathKind::Inline)
                        } else {
                            None
                        };
                        if let Some(kind) = kind {
                            open = Some(OpenContainer {
                                kind,
                                tag: local,
                                start: tag_start,
                                content_start: end,
                                depth: 0,
                                id: attribute(&e, "id"),
                                eqno: None,
                                eqno_range: None,
                                eqno_text: String::new(),
                            });
                        }
                    }
                }
            }
            Event::End(e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let Some(c) = open.as_mut() else { continue };

                if local.eq_ignore_ascii_case(&c.tag) {
                    if c.depth == 0 {
                        if let Some(c) = open.take() {
                            let close_start = text[..end].rfind("</").unwrap_or(end);
                            push_container(&mut found, text, c, close_start, end, origin);
                        }
                        continue;
                    }
                    c.depth -= 1;
                }
                if c.kind == MathKind::Display {
                    track_eqno_end(c, &local, end);
                }
            }
            Event::Text(t) => {
                if let Some(c) = open.as_mut() {
                    if in_eqno_number(c) {
                        c.eqno_text.push_str(&String::from_utf8_lossy(t.as_ref()));
                    }
                }
            }
            Event::GeneralRef(r) => {
                if let Some(c) = open.as_mut() {
                    if in_eqno_number(c) {
                        c.eqno_text.push('&');
                        c.eqno_text.push_str(&String::from_utf8_lossy(r.as_ref()));
                        c.eqno_text.push(';');
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(c) = open {
        warn!(
            "{}: {} math container at byte {} is never closed, skipped",
            origin.display(),
            c.kind.tag(),
            c.start
        );
    }

    Ok(found)
}

fn track_eqno_start(c: &mut OpenContainer, local: &str, e: &BytesStart<'_>, tag_start: usize) {
    match c.eqno.as_mut() {
        Some(eq) => {
            if local.eq_ignore_ascii_case("span") {
                eq.span_depth += 1;
            } else if local.eq_ignore_ascii_case("a") {
                eq.anchor_depth += 1;
            }
        }
        None if c.eqno_range.is_none() && local.eq_ignore_ascii_case("span") => {
            let class = attribute(e, "class");
            if has_class(class.as_deref(), EQNO_CLASS) {
                c.eqno = Some(OpenEqno {
                    start: tag_start,
                    span_depth: 0,
                    anchor_depth: 0,
                });
            }
        }
        None => {}
    }
}

fn track_eqno_end(c: &mut OpenContainer, local: &str, end: usize) {
    let Some(eq) = c.eqno.as_mut() else { return };
    if local.eq_ignore_ascii_case("a") {
        eq.anchor_depth = eq.anchor_depth.saturating_sub(1);
    } else if local.eq_ignore_ascii_case("span") {
        if eq.span_depth == 0 {
            c.eqno_range = Some(eq.start..end);
            c.eqno = None;
        } else {
            eq.span_depth -= 1;
        }
    }
}

fn in_eqno_number(c: &OpenContainer) -> bool {
    c.eqno.as_ref().map(|eq| eq.anchor_depth == 0).unwrap_or(false)
}

fn push_container(
    found: &mut Vec<MathExpression>,
    text: &str,
    c: OpenContainer,
    close_start: usize,
    end: usize,
    origin: &Path,
) {
    let content_end = close_start.max(c.content_start);
    let raw = match &c.eqno_range {
        Some(r) if r.start >= c.content_start && r.end <= content_end => {
            format!("{}{}", &text[c.content_start..r.start], &text[r.end..content_end])
        }
        _ => text[c.content_start..content_end].to_string(),
    };
    let number = c.eqno_range.as_ref().map(|_| c.eqno_text.trim().to_string());
    accept(
        found,
        c.kind,
        c.start..end,
        text,
        raw.trim().to_string(),
        c.id,
        number,
        origin,
    );
}

#[allow(clippy::too_many_arguments)]
fn accept(
    found: &mut Vec<MathExpression>,
    kind: MathKind,
    span: Range<usize>,
    text: &str,
    raw: String,
    id: Option<String>,
    number: Option<String>,
    origin: &Path,
) {
    if raw.is_empty() {
        warn!(
            "{}: empty {} math container at byte {}, skipped",
            origin.display(),
            kind.tag(),
            span.start
        );
        return;
    }
    let balanced = has_balanced_delimiters(&raw);
    let expr = MathExpression::new(kind, span.clone(), text[span].to_string(), raw)
        .with_equation(id, number);
    if !balanced {
        warn!(
            "{}: {} math at byte {} has no closing delimiter, skipped: {}",
            origin.display(),
            kind.tag(),
            expr.span.start,
            expr.excerpt()
        );
        return;
    }
    found.push(expr);
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name.as_bytes())
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn has_class(class_attr: Option<&str>, token: &str) -> bool {
    class_attr
        .unwrap_or("")
        .split_ascii_whitespace()
        .any(|t| t == token)
}

/// Byte offset of the `<` opening the tag that ends at `end`.
fn tag_start(text: &str, end: usize) -> usize {
    text[..end].rfind('<').unwrap_or(end)
}

// ── Pattern fallback ─────────────────────────────────────────────────────────

static RE_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:^|\s)class\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});
static RE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)(?:^|\s)id\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());
static RE_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<a\b[^>]*>.*?</a\s*>").unwrap());
static RE_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());

fn attr_value(re: &Regex, attrs: &str) -> Option<String> {
    re.captures(attrs)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
}

/// Opening and closing tag patterns for one element name.
struct TagPatterns {
    open: Regex,
    any: Regex,
}

impl TagPatterns {
    fn new(tag: &str) -> Result<Self, regex::Error> {
        let tag = regex::escape(tag);
        Ok(Self {
            open: Regex::new(&format!(r"(?i)<{tag}\b([^>]*?)(/?)>"))?,
            any: Regex::new(&format!(r"(?i)<(/?){tag}\b[^>]*?(/?)>"))?,
        })
    }

    /// From `from` (just past an opening tag), find the matching close tag,
    /// returning `(close_start, close_end)`.
    fn find_close(&self, text: &str, from: usize) -> Option<(usize, usize)> {
        let mut depth = 0usize;
        for m in self.any.captures_iter(&text[from..]) {
            let whole = m.get(0)?;
            let closing = m.get(1).map(|g| !g.as_str().is_empty()).unwrap_or(false);
            let self_closing = m.get(2).map(|g| !g.as_str().is_empty()).unwrap_or(false);
            if closing {
                if depth == 0 {
                    return Some((from + whole.start(), from + whole.end()));
                }
                depth -= 1;
            } else if !self_closing {
                depth += 1;
            }
        }
        None
    }
}

fn pattern_scan(
    text: &str,
    inline: &ContainerSpec,
    display: &ContainerSpec,
    origin: &Path,
) -> Vec<MathExpression> {
    let mut found = scan_kind(text, display, MathKind::Display, origin);
    let inline_found = scan_kind(text, inline, MathKind::Inline, origin);
    for e in inline_found {
        let overlaps = found
            .iter()
            .any(|d| e.span.start < d.span.end && d.span.start < e.span.end);
        if !overlaps {
            found.push(e);
        }
    }
    found.sort_by_key(|e| e.span.start);
    found
}

fn scan_kind(
    text: &str,
    spec: &ContainerSpec,
    kind: MathKind,
    origin: &Path,
) -> Vec<MathExpression> {
    let patterns = match TagPatterns::new(&spec.tag) {
        Ok(p) => p,
        Err(e) => {
            warn!("{}: cannot scan for <{}>: {}", origin.display(), spec.tag, e);
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    let mut cursor = 0usize;
    for open in patterns.open.captures_iter(text) {
        let Some(whole) = open.get(0) else { continue };
        if whole.start() < cursor {
            continue;
        }
        let attrs = open.get(1).map(|m| m.as_str()).unwrap_or("");
        let self_closing = open.get(2).map(|m| !m.as_str().is_empty()).unwrap_or(false);
        let class = attr_value(&RE_CLASS, attrs);
        if self_closing || !spec.matches(&spec.tag, class.as_deref()) {
            continue;
        }

        let Some((close_start, close_end)) = patterns.find_close(text, whole.end()) else {
            warn!(
                "{}: {} math container at byte {} is never closed, skipped",
                origin.display(),
                kind.tag(),
                whole.start()
            );
            continue;
        };
        cursor = close_end;

        let content = &text[whole.end()..close_start];
        let (raw, number) = match kind {
            MathKind::Display => split_eqno(content),
            MathKind::Inline => (content.to_string(), None),
        };
        let id = match kind {
            MathKind::Display => attr_value(&RE_ID, attrs),
            MathKind::Inline => None,
        };
        accept(
            &mut found,
            kind,
            whole.start()..close_end,
            text,
            raw.trim().to_string(),
            id,
            number,
            origin,
        );
    }
    found
}

/// Remove the equation-number element from display content, returning the
/// remaining LaTeX and the number text (permalink anchor dropped).
fn split_eqno(content: &str) -> (String, Option<String>) {
    let Ok(span) = TagPatterns::new("span") else {
        return (content.to_string(), None);
    };
    for open in span.open.captures_iter(content) {
        let Some(whole) = open.get(0) else { continue };
        let attrs = open.get(1).map(|m| m.as_str()).unwrap_or("");
        if !has_class(attr_value(&RE_CLASS, attrs).as_deref(), EQNO_CLASS) {
            continue;
        }
        let Some((close_start, close_end)) = span.find_close(content, whole.end()) else {
            break;
        };
        let inner = &content[whole.end()..close_start];
        let number = RE_TAG
            .replace_all(&RE_ANCHOR.replace_all(inner, ""), "")
            .trim()
            .to_string();
        let rest = format!("{}{}", &content[..whole.start()], &content[close_end..]);
        return (rest, Some(number));
    }
    (content.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> (ContainerSpec, ContainerSpec) {
        (
            ContainerSpec::new("span", ["math"]),
            ContainerSpec::new("div", ["math"]),
        )
    }

    fn run(text: &str) -> Vec<MathExpression> {
        let (inline, display) = specs();
        extract(text, &inline, &display, Path::new("test.xhtml"))
    }

    const SPHINX_DISPLAY: &str = concat!(
        r#"<div class="math notranslate nohighlight" id="equation-euler">"#,
        r##"<span class="eqno">(1)<a class="headerlink" href="#equation-euler" title="Permalink to this equation">¶</a></span>"##,
        r"\[e^{i\pi} + 1 = 0\]</div>"
    );

    #[test]
    fn finds_inline_span() {
        let text = r#"<p>Let <span class="math notranslate nohighlight">\(x^2+y^2\)</span> be.</p>"#;
        let found = run(text);
        assert_eq!(found.len(), 1);
        let e = &found[0];
        assert_eq!(e.kind, MathKind::Inline);
        assert_eq!(e.normalized_source, "x^2+y^2");
        assert_eq!(&text[e.span.clone()], e.matched);
        assert!(e.matched.starts_with("<span") && e.matched.ends_with("</span>"));
    }

    #[test]
    fn finds_bare_inline_source() {
        let found = run(r#"<p><span class="math">x^2+y^2</span></p>"#);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].normalized_source, "x^2+y^2");
    }

    #[test]
    fn display_carries_id_and_number() {
        let text = format!("<body>{SPHINX_DISPLAY}</body>");
        let found = run(&text);
        assert_eq!(found.len(), 1);
        let e = &found[0];
        assert_eq!(e.kind, MathKind::Display);
        assert_eq!(e.equation_id.as_deref(), Some("equation-euler"));
        assert_eq!(e.equation_number.as_deref(), Some("(1)"));
        assert_eq!(e.normalized_source, r"e^{i\pi} + 1 = 0");
        assert_eq!(e.matched, SPHINX_DISPLAY);
    }

    #[test]
    fn attribute_order_and_extra_classes_do_not_matter() {
        let text = r#"<p><span id="s1" class="nohighlight math">\(a\)</span></p>"#;
        let found = run(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].normalized_source, "a");
    }

    #[test]
    fn non_math_elements_ignored() {
        let text = r#"<p><span class="mathematics">\(a\)</span><div class="note">b</div></p>"#;
        assert!(run(text).is_empty());
    }

    #[test]
    fn mixed_document_is_ordered() {
        let text = format!(
            r#"<html><body><p><span class="math">\(a\)</span></p>{SPHINX_DISPLAY}<p><span class="math">\(b\)</span></p></body></html>"#
        );
        let found = run(&text);
        let kinds: Vec<_> = found.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![MathKind::Inline, MathKind::Display, MathKind::Inline]);
        assert!(found.windows(2).all(|w| w[0].span.end <= w[1].span.start));
    }

    #[test]
    fn nested_container_is_not_double_counted() {
        let text = r#"<div class="math"><span class="math">\(x\)</span></div>"#;
        let found = run(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, MathKind::Display);
    }

    #[test]
    fn malformed_display_skipped() {
        let text = r#"<body><div class="math">\[x + 1</div><p><span class="math">\(y\)</span></p></body>"#;
        let found = run(text);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].normalized_source, "y");
    }

    #[test]
    fn no_containers_is_empty() {
        assert!(run("<html><body><p>plain</p></body></html>").is_empty());
    }

    #[test]
    fn entities_stay_escaped_in_raw_text() {
        let text = r#"<p><span class="math">\(a &lt; b\)</span></p>"#;
        let found = run(text);
        assert_eq!(found[0].raw_text, r"\(a &lt; b\)");
        assert_eq!(found[0].normalized_source, "a < b");
    }

    #[test]
    fn falls_back_on_ill_formed_markup() {
        // The unterminated comment makes the XML reader fail at end of input.
        let text = format!(
            r#"<p>Q & A <span class="math">\(x\)</span></p>{SPHINX_DISPLAY}<!-- draft"#
        );
        let found = run(&text);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].kind, MathKind::Inline);
        assert_eq!(found[0].normalized_source, "x");
        assert_eq!(found[1].equation_id.as_deref(), Some("equation-euler"));
        assert_eq!(found[1].equation_number.as_deref(), Some("(1)"));
        assert_eq!(found[1].matched, SPHINX_DISPLAY);
    }

    #[test]
    fn pattern_scan_matches_structured_scan() {
        let text = format!(
            r#"<body><p><span class="other"><span class="math">\(a\)</span></span></p>{SPHINX_DISPLAY}</body>"#
        );
        let (inline, display) = specs();
        let structured = structured_scan(&text, &inline, &display, Path::new("t")).unwrap();
        let fallback = pattern_scan(&text, &inline, &display, Path::new("t"));
        assert_eq!(structured, fallback);
    }

    #[test]
    fn unclosed_container_skipped() {
        let text = r#"<p><span class="math">\(x\)"#;
        assert!(run(text).is_empty());
    }

    #[test]
    fn custom_container_spec() {
        let inline = ContainerSpec::new("code", ["tex"]);
        let display = ContainerSpec::new("pre", ["tex"]);
        let text = r#"<p><code class="tex">\(q\)</code> <span class="math">\(z\)</span></p>"#;
        let found = extract(text, &inline, &display, Path::new("t"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].normalized_source, "q");
    }
}
