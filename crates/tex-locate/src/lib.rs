//! # tex-locate
//!
//! Resolve the search path for an external TeX toolchain and locate the two
//! binaries the SVG renderer drives: `latex` and `dvisvgm`.
//!
//! TeX distributions are frequently installed per-user (TinyTeX, a manual
//! `install-tl` into `~/bin`), so the inherited `PATH` of a GUI-launched or
//! cron-launched process often does not contain them. This crate computes the
//! search path **once**, as a value, instead of mutating the process
//! environment:
//!
//! 1. An explicit override directory, if the caller has one, otherwise the
//!    conventional user-local binary directory `~/bin`.
//! 2. Followed by every entry of the inherited `PATH`, in order, duplicates
//!    removed.
//!
//! The resulting [`SearchPath`] is used both to locate the programs and as
//! the `PATH` handed to their child processes (`latex` itself spawns
//! `kpsewhich` and friends).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tex_locate::{locate_toolchain, SearchPath};
//!
//! let search_path = SearchPath::resolve(None);
//! let toolchain = locate_toolchain(&search_path).expect("TeX toolchain unavailable");
//! println!("latex:   {}", toolchain.latex.display());
//! println!("dvisvgm: {}", toolchain.dvisvgm.display());
//! ```

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Program name of the TeX engine producing DVI output.
pub const LATEX_PROGRAM: &str = "latex";

/// Program name of the DVI to SVG converter.
pub const DVISVGM_PROGRAM: &str = "dvisvgm";

/// User-local binary directory, relative to the home directory.
const USER_BIN_DIR: &str = "bin";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by tex-locate operations.
#[derive(Error, Debug)]
pub enum TexLocateError {
    /// The program is not present in any search-path directory.
    #[error("'{program}' not found on search path: {search_path}")]
    NotFound {
        program: String,
        search_path: String,
    },

    /// The program exists but `--version` could not be run or failed.
    #[error("'{path}' could not be executed: {reason}")]
    Probe { path: PathBuf, reason: String },

    /// The directories cannot be joined into a `PATH` value.
    #[error("Search path could not be assembled: {0}")]
    SearchPath(String),
}

// ── Search path ──────────────────────────────────────────────────────────────

/// Ordered list of directories searched for toolchain binaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Build the search path from process state: `override_dir` (or `~/bin`)
    /// prepended to the inherited `PATH`.
    ///
    /// This is the only function in the workspace that reads `PATH` or the
    /// home directory.
    pub fn resolve(override_dir: Option<&Path>) -> Self {
        let front = match override_dir {
            Some(dir) => Some(dir.to_path_buf()),
            None => dirs::home_dir().map(|h| h.join(USER_BIN_DIR)),
        };
        Self::from_parts(front, std::env::var_os("PATH"))
    }

    /// Pure constructor: `front` first, then the split `inherited` value.
    pub fn from_parts(front: Option<PathBuf>, inherited: Option<OsString>) -> Self {
        let mut dirs: Vec<PathBuf> = Vec::new();
        let inherited_dirs = inherited
            .as_deref()
            .map(|v| std::env::split_paths(v).collect::<Vec<_>>())
            .unwrap_or_default();

        for dir in front.into_iter().chain(inherited_dirs) {
            if dir.as_os_str().is_empty() || dirs.contains(&dir) {
                continue;
            }
            dirs.push(dir);
        }
        Self { dirs }
    }

    /// Directories in search order.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Join the directories into a value suitable for a child's `PATH`.
    pub fn to_os_string(&self) -> Result<OsString, TexLocateError> {
        std::env::join_paths(&self.dirs).map_err(|e| TexLocateError::SearchPath(e.to_string()))
    }

    /// First executable named `program` in search order.
    pub fn find_program(&self, program: &str) -> Option<PathBuf> {
        self.dirs.iter().find_map(|dir| {
            candidate_names(program)
                .into_iter()
                .map(|name| dir.join(name))
                .find(|p| is_executable(p))
        })
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if cfg!(windows) { ";" } else { ":" };
        let joined = self
            .dirs
            .iter()
            .map(|d| d.to_string_lossy())
            .collect::<Vec<_>>()
            .join(sep);
        f.write_str(&joined)
    }
}

#[cfg(windows)]
fn candidate_names(program: &str) -> Vec<String> {
    vec![format!("{program}.exe"), program.to_string()]
}

#[cfg(not(windows))]
fn candidate_names(program: &str) -> Vec<String> {
    vec![program.to_string()]
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

// ── Toolchain ────────────────────────────────────────────────────────────────

/// A located and probed TeX toolchain.
#[derive(Debug, Clone)]
pub struct Toolchain {
    pub latex: PathBuf,
    pub dvisvgm: PathBuf,
    /// First line of `latex --version`.
    pub latex_version: String,
    /// First line of `dvisvgm --version`.
    pub dvisvgm_version: String,
    /// Search path the children must run with.
    pub search_path: SearchPath,
}

/// Run `<program> --version` and return the first non-empty output line.
pub fn probe(program: &Path, search_path: &SearchPath) -> Result<String, TexLocateError> {
    let path_value = search_path.to_os_string()?;
    let output = Command::new(program)
        .arg("--version")
        .env("PATH", path_value)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| TexLocateError::Probe {
            path: program.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(TexLocateError::Probe {
            path: program.to_path_buf(),
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string())
}

/// Locate and probe `latex` and `dvisvgm` on `search_path`.
pub fn locate_toolchain(search_path: &SearchPath) -> Result<Toolchain, TexLocateError> {
    let latex = locate(LATEX_PROGRAM, search_path)?;
    let dvisvgm = locate(DVISVGM_PROGRAM, search_path)?;
    let latex_version = probe(&latex, search_path)?;
    let dvisvgm_version = probe(&dvisvgm, search_path)?;

    Ok(Toolchain {
        latex,
        dvisvgm,
        latex_version,
        dvisvgm_version,
        search_path: search_path.clone(),
    })
}

fn locate(program: &str, search_path: &SearchPath) -> Result<PathBuf, TexLocateError> {
    search_path
        .find_program(program)
        .ok_or_else(|| TexLocateError::NotFound {
            program: program.to_string(),
            search_path: search_path.to_string(),
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_is_searched_first() {
        let inherited = std::env::join_paths(["/usr/bin", "/bin"]).unwrap();
        let sp = SearchPath::from_parts(Some(PathBuf::from("/opt/tex/bin")), Some(inherited));
        assert_eq!(
            sp.dirs(),
            &[
                PathBuf::from("/opt/tex/bin"),
                PathBuf::from("/usr/bin"),
                PathBuf::from("/bin")
            ]
        );
    }

    #[test]
    fn duplicates_and_empty_entries_dropped() {
        let inherited = std::env::join_paths(["/usr/bin", "", "/usr/bin"]).unwrap();
        let sp = SearchPath::from_parts(Some(PathBuf::from("/usr/bin")), Some(inherited));
        assert_eq!(sp.dirs(), &[PathBuf::from("/usr/bin")]);
    }

    #[test]
    fn no_inherited_path() {
        let sp = SearchPath::from_parts(None, None);
        assert!(sp.dirs().is_empty());
        assert!(sp.find_program("latex").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn finds_only_executables() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("latex");
        std::fs::write(&plain, "#!/bin/sh\n").unwrap();

        let sp = SearchPath::from_parts(Some(dir.path().to_path_buf()), None);
        assert!(sp.find_program("latex").is_none(), "not executable yet");

        std::fs::set_permissions(&plain, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(sp.find_program("latex"), Some(plain));
    }

    #[cfg(unix)]
    #[test]
    fn probe_reads_first_line() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("dvisvgm");
        std::fs::write(&script, "#!/bin/sh\necho\necho 'dvisvgm 3.2'\necho extra\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sp = SearchPath::from_parts(Some(dir.path().to_path_buf()), std::env::var_os("PATH"));
        assert_eq!(probe(&script, &sp).unwrap(), "dvisvgm 3.2");
    }

    #[test]
    fn missing_toolchain_names_program() {
        let dir = tempfile::tempdir().unwrap();
        let sp = SearchPath::from_parts(Some(dir.path().to_path_buf()), None);
        let err = locate_toolchain(&sp).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("latex"), "got: {msg}");
        assert!(msg.contains(&dir.path().to_string_lossy().to_string()));
    }
}
