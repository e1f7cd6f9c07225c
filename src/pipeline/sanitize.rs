//! LaTeX normalisation: the text handed to the backend and hashed for the
//! asset name.
//!
//! [`normalize`] is total and deterministic: no I/O, never fails, identical
//! input always yields identical output. Rules, in order:
//!
//! 1. Trim surrounding whitespace
//! 2. Unescape `&lt;`, `&gt;`, `&amp;` (the container text is taken raw from
//!    the markup, so it may still be entity-escaped)
//! 3. Strip one enclosing delimiter pair: `\(…\)`, `\[…\]`, `$$…$$` or `$…$`.
//!    Content that already starts with `\begin{…}` has no enclosing pair: the
//!    environment is the structure and is kept as-is
//! 4. Repair environment nestings the TeX backend rejects, until stable:
//!    * an inner alignment (`aligned`, `gathered`, …) wrapped in an outer
//!      `split` / `equation` / `displaymath` collapses to the inner one
//!    * a `split` / `displaymath` wrapper around a numbered top-level
//!      environment (`align`, `equation`, `gather`, …) is removed
//!
//! The repairs are textual rewrites of patterns the documentation toolchain is
//! known to emit, not a LaTeX validity check. Extend [`INNER_ALIGNMENTS`],
//! [`NUMBERED_ENVIRONMENTS`] and their wrapper lists only together with a
//! test case.

use once_cell::sync::Lazy;
use regex::Regex;

/// Math-mode alignment environments that need a surrounding display.
pub const INNER_ALIGNMENTS: &[&str] = &["aligned", "alignedat", "gathered", "split", "cases"];

/// Top-level display environments that carry their own equation numbers.
pub const NUMBERED_ENVIRONMENTS: &[&str] = &[
    "equation", "equation*", "align", "align*", "alignat", "alignat*", "gather", "gather*",
    "multline", "multline*", "flalign", "flalign*", "eqnarray", "eqnarray*",
];

/// Wrappers collapsed around an inner alignment.
const ALIGNMENT_WRAPPERS: &[&str] = &["split", "equation", "equation*", "displaymath"];

/// Wrappers removed around a numbered environment.
const NUMBERED_WRAPPERS: &[&str] = &["split", "displaymath"];

/// Normalize a raw container source. See the module docs for the rules.
pub fn normalize(raw: &str) -> String {
    let s = unescape_entities(raw.trim());
    let s = strip_delimiters(&s);
    let mut s = s.trim().to_string();

    // Every repair strictly shortens the string, so this terminates.
    while let Some(next) = repair_environments(&s) {
        s = next;
    }
    s
}

// ── Rule 2: Unescape entities ────────────────────────────────────────────────

fn unescape_entities(input: &str) -> String {
    // `&amp;` last so `&amp;lt;` becomes `&lt;`, not `<`.
    input
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

// ── Rule 3: Strip enclosing delimiters ───────────────────────────────────────

fn strip_delimiters(input: &str) -> &str {
    let s = input.trim();
    if s.starts_with(r"\begin{") {
        return s;
    }
    const PAIRS: &[(&str, &str)] = &[(r"\(", r"\)"), (r"\[", r"\]"), ("$$", "$$"), ("$", "$")];
    for (open, close) in PAIRS {
        if s.len() >= open.len() + close.len() && s.starts_with(open) && s.ends_with(close) {
            let inner = &s[open.len()..s.len() - close.len()];
            // `$a$ + $b$` is two inline spans, not one wrapped expression.
            if *open == "$" && inner.contains('$') {
                continue;
            }
            return inner;
        }
    }
    s
}

/// `true` when a display source opens with its own math delimiter, or with an
/// environment. Used by the extractor to reject containers whose closing
/// delimiter is missing.
pub fn has_balanced_delimiters(raw: &str) -> bool {
    let s = unescape_entities(raw.trim());
    let s = s.trim();
    for (open, close) in [(r"\[", r"\]"), (r"\(", r"\)"), ("$$", "$$")] {
        if s.starts_with(open) {
            return s.len() >= open.len() + close.len() && s.ends_with(close);
        }
    }
    if let Some(name) = leading_environment(s) {
        return s.ends_with(&format!(r"\end{{{name}}}"));
    }
    !s.is_empty()
}

// ── Rule 4: Environment repairs ──────────────────────────────────────────────

static RE_BEGIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\\begin\{([A-Za-z]+\*?)\}").expect("static regex"));

/// Name of the environment `s` opens with, if any.
pub fn leading_environment(s: &str) -> Option<&str> {
    RE_BEGIN
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// If `s` is exactly `\begin{name}…\end{name}`, return `(name, body)`.
fn unwrap_environment(s: &str) -> Option<(&str, &str)> {
    let name = leading_environment(s)?;
    let open_len = r"\begin{}".len() + name.len();
    let close = format!(r"\end{{{name}}}");
    if s.len() < open_len + close.len() || !s.ends_with(&close) {
        return None;
    }
    Some((name, s[open_len..s.len() - close.len()].trim()))
}

fn repair_environments(s: &str) -> Option<String> {
    let (outer, body) = unwrap_environment(s)?;
    let (inner, _) = unwrap_environment(body)?;

    let collapse_alignment =
        ALIGNMENT_WRAPPERS.contains(&outer) && INNER_ALIGNMENTS.contains(&inner) && outer != inner;
    let drop_wrapper = NUMBERED_WRAPPERS.contains(&outer) && NUMBERED_ENVIRONMENTS.contains(&inner);

    if collapse_alignment || drop_wrapper {
        Some(body.to_string())
    } else {
        None
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_inline_paren_delimiters() {
        assert_eq!(normalize(r"\(x^2+y^2\)"), "x^2+y^2");
    }

    #[test]
    fn strips_display_bracket_delimiters() {
        assert_eq!(normalize("\n\\[\n  e^{i\\pi} + 1 = 0\n\\]\n"), r"e^{i\pi} + 1 = 0");
    }

    #[test]
    fn strips_dollar_delimiters() {
        assert_eq!(normalize("$a+b$"), "a+b");
        assert_eq!(normalize("$$a+b$$"), "a+b");
    }

    #[test]
    fn keeps_separate_dollar_spans() {
        assert_eq!(normalize("$a$ and $b$"), "$a$ and $b$");
    }

    #[test]
    fn bare_source_passes_through() {
        assert_eq!(normalize("x^2+y^2"), "x^2+y^2");
    }

    #[test]
    fn unescapes_entities() {
        assert_eq!(normalize(r"\(a &lt; b &amp;&amp; c &gt; d\)"), "a < b && c > d");
        assert_eq!(normalize("&amp;lt;"), "&lt;");
    }

    #[test]
    fn environment_kept_without_delimiters() {
        let src = r"\begin{align}a &= b\\ c &= d\end{align}";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn collapses_split_around_aligned() {
        let src = r"\[\begin{split}\begin{aligned} a &= b \end{aligned}\end{split}\]";
        assert_eq!(normalize(src), r"\begin{aligned} a &= b \end{aligned}");
    }

    #[test]
    fn removes_split_around_numbered_align() {
        let src = "\\[\\begin{split}\n\\begin{align} x &= 1 \\end{align}\n\\end{split}\\]";
        assert_eq!(normalize(src), r"\begin{align} x &= 1 \end{align}");
    }

    #[test]
    fn plain_split_untouched() {
        let src = r"\[\begin{split}a &= b\\ &= c\end{split}\]";
        assert_eq!(normalize(src), r"\begin{split}a &= b\\ &= c\end{split}");
    }

    #[test]
    fn unrelated_nesting_untouched() {
        let src = r"\begin{equation}\begin{matrix}1\end{matrix}\end{equation}";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn repairs_apply_until_stable() {
        let src = r"\begin{displaymath}\begin{split}\begin{aligned}a\end{aligned}\end{split}\end{displaymath}";
        assert_eq!(normalize(src), r"\begin{aligned}a\end{aligned}");
    }

    #[test]
    fn normalize_is_deterministic_and_total() {
        for s in ["", "$", r"\(", r"\]", "&amp;", r"\begin{", r"\begin{x}", "\u{1F600}"] {
            assert_eq!(normalize(s), normalize(s), "input {s:?}");
        }
    }

    #[test]
    fn balanced_delimiter_check() {
        assert!(has_balanced_delimiters(r"\[x\]"));
        assert!(has_balanced_delimiters("x^2"));
        assert!(has_balanced_delimiters(r"\begin{align}a\end{align}"));
        assert!(!has_balanced_delimiters(r"\[x"));
        assert!(!has_balanced_delimiters("$$x"));
        assert!(!has_balanced_delimiters(r"\begin{align}a"));
        assert!(!has_balanced_delimiters("   "));
    }
}
