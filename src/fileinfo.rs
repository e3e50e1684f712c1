//! Immutable metadata record for a remote or local filesystem entry.
//!
//! [`FileInfo`] is a plain value type: no hidden references, cheap to
//! clone, normalised once at construction. Remote entries use POSIX
//! path algebra (always forward slash, leading `/`); local entries use
//! the host's native separator.

use std::path::Path;
use std::time::SystemTime;

use crate::predicate::PredicateBundle;

/// Which path algebra an entry's `abspath` follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// POSIX-style DBFS path, always absolute, always forward-slash.
    Remote,
    /// Host-native local filesystem path.
    Local,
}

/// Metadata for one remote or local entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    kind: PathKind,
    is_dir: bool,
    size: i64,
    mtime: i64,
    abspath: String,
}

impl FileInfo {
    /// Builds a remote entry from the fields the backend's `get-status`
    /// / `list` responses carry. `path` is normalised immediately.
    #[must_use]
    pub fn from_remote(is_dir: bool, size: i64, mtime_ms: i64, path: &str) -> Self {
        Self {
            kind: PathKind::Remote,
            is_dir,
            size,
            mtime: mtime_ms,
            abspath: normalize_posix(path),
        }
    }

    /// Builds a local entry from `std::fs` metadata.
    ///
    /// # Errors
    ///
    /// Returns the underlying IO error if `modified()` is unsupported
    /// on this platform.
    pub fn from_local_metadata(
        path: &Path,
        metadata: &std::fs::Metadata,
    ) -> std::io::Result<Self> {
        let mtime_ms = system_time_to_ms(metadata.modified()?);
        Ok(Self {
            kind: PathKind::Local,
            is_dir: metadata.is_dir(),
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            mtime: mtime_ms,
            abspath: path.to_string_lossy().into_owned(),
        })
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    #[must_use]
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn mtime(&self) -> i64 {
        self.mtime
    }

    #[must_use]
    pub fn abspath(&self) -> &str {
        &self.abspath
    }

    #[must_use]
    pub fn kind(&self) -> PathKind {
        self.kind
    }

    #[must_use]
    pub fn type_str(&self) -> &'static str {
        if self.is_dir { "dir" } else { "file" }
    }

    #[must_use]
    pub fn basename(&self) -> &str {
        self.abspath
            .rsplit(self.separator())
            .next()
            .unwrap_or(&self.abspath)
    }

    fn separator(&self) -> char {
        match self.kind {
            PathKind::Remote => '/',
            PathKind::Local => std::path::MAIN_SEPARATOR,
        }
    }

    /// Returns this entry's path relative to `base`.
    ///
    /// If `requested` was itself absolute, the absolute path is
    /// returned unchanged (the caller asked for an absolute path, so it
    /// gets one back). Exact equality with `base` yields `"."`.
    #[must_use]
    pub fn relpath(&self, base: &str, requested: Option<&str>) -> String {
        if let Some(requested) = requested {
            if is_absolute(requested, self.kind) {
                return self.abspath.clone();
            }
        }
        if self.abspath == base {
            return ".".to_string();
        }
        let sep = self.separator();
        let mut prefix = base.to_string();
        if !prefix.ends_with(sep) {
            prefix.push(sep);
        }
        self.abspath
            .strip_prefix(prefix.as_str())
            .unwrap_or(&self.abspath)
            .to_string()
    }

    /// Evaluates a compiled predicate bundle against this entry.
    #[must_use]
    pub fn check_predicates(&self, relpath: &str, bundle: &PredicateBundle) -> bool {
        bundle.evaluate(self, relpath)
    }
}

fn is_absolute(path: &str, kind: PathKind) -> bool {
    match kind {
        PathKind::Remote => path.starts_with('/'),
        PathKind::Local => Path::new(path).is_absolute(),
    }
}

/// Normalises a POSIX-style path: resolves `.`/`..` components and
/// collapses repeated slashes, always returning an absolute path.
#[must_use]
pub fn normalize_posix(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    if out.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", out.join("/"))
    }
}

fn system_time_to_ms(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_posix_collapses_dot_and_dotdot() {
        assert_eq!(normalize_posix("/a/./b/../c"), "/a/c");
        assert_eq!(normalize_posix("/a//b"), "/a/b");
        assert_eq!(normalize_posix("/"), "/");
    }

    #[test]
    fn basename_splits_on_remote_separator() {
        let fi = FileInfo::from_remote(false, 10, 0, "/d/sub/c");
        assert_eq!(fi.basename(), "c");
        assert_eq!(fi.type_str(), "file");
    }

    #[test]
    fn relpath_returns_dot_for_exact_base_match() {
        let fi = FileInfo::from_remote(true, 0, 0, "/d");
        assert_eq!(fi.relpath("/d", None), ".");
    }

    #[test]
    fn relpath_strips_base_prefix() {
        let fi = FileInfo::from_remote(false, 10, 0, "/d/sub/c");
        assert_eq!(fi.relpath("/d", None), "sub/c");
    }

    #[test]
    fn relpath_returns_abspath_unchanged_when_requested_was_absolute() {
        let fi = FileInfo::from_remote(false, 10, 0, "/d/sub/c");
        assert_eq!(fi.relpath("/d", Some("/d/sub/c")), "/d/sub/c");
    }
}
