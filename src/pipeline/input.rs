//! Input discovery and path plumbing.
//!
//! * [`discover_documents`] — the markup files of one run
//! * [`resolve_content_root`] — where manifest hrefs are relative to
//! * [`absolutize`], [`relative_path`], [`to_href`] — purely lexical path
//!   arithmetic, so results do not depend on symlinks or on files existing
//! * [`write_atomic`] — temp file in the target directory, then rename, so a
//!   crash never leaves a half-written document or image behind

use crate::error::Math2SvgError;
use glob::{MatchOptions, Pattern};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Directory names that conventionally hold the package content.
pub const CONTENT_DIR_NAMES: &[&str] = &["OEBPS", "content"];

/// List the documents directly inside `dir` with one of `extensions`
/// (case-insensitive), sorted and deduplicated.
pub fn discover_documents(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, Math2SvgError> {
    if !dir.is_dir() {
        return Err(Math2SvgError::DocumentsDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let options = MatchOptions {
        case_sensitive: false,
        require_literal_separator: true,
        require_literal_leading_dot: false,
    };
    let escaped_dir = Pattern::escape(&dir.to_string_lossy());

    let mut found = Vec::new();
    for ext in extensions {
        let pattern = format!("{}/*.{}", escaped_dir, Pattern::escape(ext));
        let paths = glob::glob_with(&pattern, options)
            .map_err(|e| Math2SvgError::InvalidConfig(format!("Bad extension {ext:?}: {e}")))?;
        for entry in paths {
            match entry {
                Ok(p) if p.is_file() => found.push(p),
                Ok(_) => {}
                Err(e) => debug!("Skipping unreadable entry: {}", e),
            }
        }
    }

    found.sort();
    found.dedup();
    debug!("Discovered {} documents in {}", found.len(), dir.display());
    Ok(found)
}

/// Derive the content root from the manifest location.
///
/// The manifest directory if it is named `OEBPS` or `content`; otherwise its
/// parent if that is so named; otherwise the manifest directory itself.
pub fn resolve_content_root(manifest_path: &Path) -> PathBuf {
    let manifest_dir = manifest_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let is_content_dir = |p: &Path| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| CONTENT_DIR_NAMES.contains(&n))
            .unwrap_or(false)
    };

    if is_content_dir(&manifest_dir) {
        return manifest_dir;
    }
    if let Some(parent) = manifest_dir.parent() {
        if is_content_dir(parent) {
            return parent.to_path_buf();
        }
    }
    manifest_dir
}

/// Absolute, lexically normalised form of `path` (no `.` or `..` components).
pub fn absolutize(path: &Path) -> std::io::Result<PathBuf> {
    Ok(normalize_lexically(&std::path::absolute(path)?))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Path of `target` as seen from directory `base`. Both should be absolute.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize_lexically(base);
    let target = normalize_lexically(target);
    let base: Vec<Component<'_>> = base.components().collect();
    let target: Vec<Component<'_>> = target.components().collect();

    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for c in &target[common..] {
        out.push(c.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Forward-slash form used in markup `src` attributes and manifest hrefs.
pub fn to_href(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Normalise an href already present in a manifest for comparison.
pub fn normalize_href(href: &str) -> String {
    let href = href.trim().replace('\\', "/");
    href.trim_start_matches("./").to_string()
}

/// Write `bytes` to `path` atomically (blocking).
///
/// The temporary file is unique per call, so concurrent writers of the same
/// content-addressed target cannot interleave; the last rename wins and
/// every rename installs a complete file.
pub fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".math2svg-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Async wrapper around [`write_atomic_blocking`].
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| std::io::Error::other(format!("write task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_root_is_oebps_manifest_dir() {
        assert_eq!(
            resolve_content_root(Path::new("/book/OEBPS/content.opf")),
            PathBuf::from("/book/OEBPS")
        );
    }

    #[test]
    fn content_root_is_named_parent() {
        assert_eq!(
            resolve_content_root(Path::new("/book/content/meta/package.opf")),
            PathBuf::from("/book/content")
        );
    }

    #[test]
    fn content_root_defaults_to_manifest_dir() {
        assert_eq!(
            resolve_content_root(Path::new("/book/pkg/package.opf")),
            PathBuf::from("/book/pkg")
        );
    }

    #[test]
    fn relative_path_sibling_dir() {
        assert_eq!(
            relative_path(Path::new("/b/OEBPS/text"), Path::new("/b/OEBPS/images/m.svg")),
            PathBuf::from("../images/m.svg")
        );
    }

    #[test]
    fn relative_path_descendant() {
        assert_eq!(
            relative_path(Path::new("/b/OEBPS"), Path::new("/b/OEBPS/images/m.svg")),
            PathBuf::from("images/m.svg")
        );
    }

    #[test]
    fn relative_path_same_dir() {
        assert_eq!(relative_path(Path::new("/a"), Path::new("/a")), PathBuf::from("."));
    }

    #[test]
    fn relative_path_ignores_dot_segments() {
        assert_eq!(
            relative_path(Path::new("/b/./text/../text"), Path::new("/b/images/../images/x.svg")),
            PathBuf::from("../images/x.svg")
        );
    }

    #[test]
    fn href_uses_forward_slashes() {
        assert_eq!(to_href(Path::new("images/m.svg")), "images/m.svg");
        assert_eq!(normalize_href(".\\images\\m.svg"), "images/m.svg");
        assert_eq!(normalize_href("./images/m.svg"), "images/m.svg");
    }

    #[test]
    fn discovery_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.xhtml", "a.HTML", "c.htm", "notes.txt", "d.xml"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.xhtml")).unwrap();

        let exts: Vec<String> = vec!["xhtml".into(), "html".into(), "htm".into()];
        let docs = discover_documents(dir.path(), &exts).unwrap();
        let names: Vec<_> = docs
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.HTML", "b.xhtml", "c.htm"]);
    }

    #[test]
    fn discovery_missing_dir_is_fatal() {
        let err = discover_documents(Path::new("/definitely/not/here"), &["xhtml".to_string()])
            .unwrap_err();
        assert!(matches!(err, Math2SvgError::DocumentsDirNotFound { .. }));
    }

    #[test]
    fn atomic_write_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.svg");
        write_atomic_blocking(&target, b"<svg/>").unwrap();
        write_atomic_blocking(&target, b"<svg></svg>").unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"<svg></svg>");
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "no temp files left behind");
    }
}
