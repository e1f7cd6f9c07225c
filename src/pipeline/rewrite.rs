//! Rewriter: replace rendered containers with image references.
//!
//! Spans come from the extractor and are spliced in one forward pass, so
//! text outside the replaced containers is copied byte for byte. Failed
//! expressions keep their original markup.
//!
//! The presentation rule block is inserted before `</head>` only when the
//! pass replaced something and the exact block is not already present,
//! which makes a second pass over a converted document a no-op.

use crate::model::{Document, MathExpression, MathKind, RenderedAsset};
use crate::pipeline::input::{relative_path, to_href};
use quick_xml::escape::escape;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Inline style of every inline image.
pub const INLINE_IMAGE_STYLE: &str = "vertical-align: middle; display: inline-block; height: 1.2em;";

/// Rules injected once into each converted document.
pub const MATH_STYLE_BLOCK: &str = concat!(
    "<style type=\"text/css\">\n",
    ".math-image { vertical-align: middle; display: inline-block; height: 1.2em; margin: 0; padding: 0; }\n",
    ".math-display { text-align: center; margin: 1em 0; }\n",
    ".math-display-image { display: inline-block; max-width: 100%; }\n",
    ".math-display .eqno { float: right; }\n",
    "</style>"
);

/// Result of one rewrite pass.
#[derive(Debug, Clone, Default)]
pub struct RewriteOutcome {
    pub text: String,
    /// Images referenced by the rewritten text.
    pub referenced_assets: BTreeSet<PathBuf>,
    pub replaced: usize,
    /// Expressions whose markup was kept (render failed or span stale).
    pub left_untouched: usize,
    pub style_injected: bool,
}

impl RewriteOutcome {
    pub fn changed(&self) -> bool {
        self.replaced > 0 || self.style_injected
    }
}

/// Rewrite `doc` given each expression paired with its render result.
///
/// Pairs must be in document order with non-overlapping spans, as the
/// extractor produces them.
pub fn rewrite(doc: &Document, rendered: &[(MathExpression, RenderedAsset)]) -> RewriteOutcome {
    let text = doc.text.as_str();
    let mut out = String::with_capacity(text.len());
    let mut outcome = RewriteOutcome::default();
    let mut cursor = 0usize;

    for (expr, asset) in rendered {
        let span = expr.span.clone();
        let stale = span.start < cursor
            || span.end > text.len()
            || text.get(span.clone()) != Some(expr.matched.as_str());
        if stale {
            warn!(
                "{}: container at byte {} no longer matches, left untouched",
                doc.path.display(),
                span.start
            );
            outcome.left_untouched += 1;
            continue;
        }
        if !asset.is_usable() {
            debug!(
                "{}: keeping original markup for {:?}",
                doc.path.display(),
                expr.excerpt()
            );
            outcome.left_untouched += 1;
            continue;
        }

        let src = to_href(&relative_path(doc.base_dir(), &asset.file_path));
        out.push_str(&text[cursor..span.start]);
        out.push_str(&replacement(expr, &src));
        cursor = span.end;

        outcome.replaced += 1;
        outcome.referenced_assets.insert(asset.file_path.clone());
    }
    out.push_str(&text[cursor..]);

    if outcome.replaced > 0 && !out.contains(MATH_STYLE_BLOCK) {
        match find_head_close(&out) {
            Some(at) => {
                out.insert_str(at, &format!("{MATH_STYLE_BLOCK}\n"));
                outcome.style_injected = true;
            }
            None => warn!(
                "{}: no </head>, math style rules not injected",
                doc.path.display()
            ),
        }
    }

    outcome.text = out;
    outcome
}

/// Image markup for one expression.
pub fn replacement(expr: &MathExpression, src: &str) -> String {
    let src = escape(src);
    let alt = escape(expr.normalized_source.as_str());
    match expr.kind {
        MathKind::Inline => format!(
            r#"<img src="{src}" alt="{alt}" class="math-image" style="{INLINE_IMAGE_STYLE}"/>"#
        ),
        MathKind::Display => {
            let id = expr
                .equation_id
                .as_deref()
                .map(|id| format!(r#" id="{id}""#))
                .unwrap_or_default();
            let number = expr
                .equation_number
                .as_deref()
                .map(|n| format!(r#"<span class="eqno">{n}</span>"#))
                .unwrap_or_default();
            format!(
                r#"<div class="math-display"{id}><img src="{src}" alt="{alt}" class="math-display-image"/>{number}</div>"#
            )
        }
    }
}

fn find_head_close(text: &str) -> Option<usize> {
    text.to_ascii_lowercase().find("</head>")
}
