//! Content-addressed asset names.
//!
//! The name of an image is a pure function of what it shows: a UUIDv5 digest
//! (namespace [`Uuid::NAMESPACE_OID`]) of the kind tag and the normalized
//! LaTeX, truncated to [`TOKEN_LEN`] hex digits. Identical expressions in any
//! number of documents therefore map to one file, which is also what lets a
//! re-run skip expressions whose image already exists.

use crate::model::MathKind;
use uuid::Uuid;

/// Hex digits kept from the digest. The first 12 digits of a v5 UUID are all
/// hash output (the version nibble comes after them).
pub const TOKEN_LEN: usize = 12;

/// Deterministic key for `normalized_source` rendered as `kind`.
pub fn content_key(normalized_source: &str, kind: MathKind) -> String {
    let keyed = format!("{}:{}", kind.tag(), normalized_source);
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, keyed.as_bytes());
    let mut token = digest.simple().to_string();
    token.truncate(TOKEN_LEN);
    token
}

/// `prefix` + kind qualifier + content key + `.svg`.
///
/// The prefix is validated by the config builder; characters outside
/// `[A-Za-z0-9_.-]` are still replaced here so the result is always a single
/// path component.
pub fn name_for(normalized_source: &str, kind: MathKind, prefix: &str) -> String {
    let safe_prefix: String = prefix
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}{}{}.svg",
        safe_prefix,
        kind.qualifier(),
        content_key(normalized_source, kind)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::sanitize::normalize;

    #[test]
    fn same_input_same_name() {
        let a = name_for(&normalize(r"\(x^2+y^2\)"), MathKind::Inline, "math_");
        let b = name_for(&normalize(r"\(x^2+y^2\)"), MathKind::Inline, "math_");
        assert_eq!(a, b);
    }

    #[test]
    fn delimiters_do_not_change_name() {
        let a = name_for(&normalize(r"\(x^2\)"), MathKind::Inline, "math_");
        let b = name_for(&normalize("x^2"), MathKind::Inline, "math_");
        assert_eq!(a, b);
    }

    #[test]
    fn kind_changes_name() {
        let inline = name_for("x", MathKind::Inline, "math_");
        let display = name_for("x", MathKind::Display, "math_");
        assert_ne!(inline, display);
        assert!(display.starts_with("math_eq_"));
    }

    #[test]
    fn different_sources_differ() {
        assert_ne!(
            name_for("a+b", MathKind::Inline, "m"),
            name_for("a-b", MathKind::Inline, "m")
        );
    }

    #[test]
    fn name_shape() {
        let name = name_for(r"\frac{1}{2}", MathKind::Inline, "math_");
        assert!(name.starts_with("math_"));
        assert!(name.ends_with(".svg"));
        assert_eq!(name.len(), "math_".len() + TOKEN_LEN + ".svg".len());
        let token = &name["math_".len().."math_".len() + TOKEN_LEN];
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn unsafe_prefix_cannot_escape_directory() {
        let name = name_for("x", MathKind::Inline, "../a/b");
        assert!(!name.contains('/'));
        assert!(name.starts_with(".._a_b"));
    }

    #[test]
    fn known_key_is_stable() {
        // Pinned: changing the hashing scheme renames every published image.
        let key = content_key("x^2+y^2", MathKind::Inline);
        let expected = Uuid::new_v5(&Uuid::NAMESPACE_OID, b"inline:x^2+y^2")
            .simple()
            .to_string();
        assert_eq!(key, expected[..TOKEN_LEN]);
    }
}
