//! Predicate bundle evaluation for [`crate::fileinfo::FileInfo`] entries.
//!
//! The source dispatches predicates by reflected method names, and two
//! of those overloads take the wrong arguments. Here every predicate is
//! looked up through the same uniform shape — `(fi, relpath) -> bool` —
//! whether it is a positive predicate or its `exclude_` counterpart, so
//! there is no signature to get wrong.
//!
//! Compiling a glob or a user-supplied pattern into a [`Regex`] is the
//! caller's job (argument parsing lives outside this crate); this module
//! only evaluates already-compiled values.

use regex::Regex;

use crate::fileinfo::FileInfo;

/// The full set of compiled predicates for one find/rget/rput
/// invocation. `None` means "not active". Evaluation is conjunctive:
/// an entry is kept iff every positive predicate matches and no
/// exclude predicate matches.
#[derive(Debug, Clone, Default)]
pub struct PredicateBundle {
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub newer_than: Option<i64>,
    pub older_than: Option<i64>,
    pub name: Option<Regex>,
    pub iname: Option<Regex>,
    pub re: Option<Regex>,
    pub ire: Option<Regex>,
    pub wholere: Option<Regex>,
    pub iwholere: Option<Regex>,

    pub exclude_min_size: Option<i64>,
    pub exclude_max_size: Option<i64>,
    pub exclude_newer_than: Option<i64>,
    pub exclude_older_than: Option<i64>,
    pub exclude_name: Option<Regex>,
    pub exclude_iname: Option<Regex>,
    pub exclude_re: Option<Regex>,
    pub exclude_ire: Option<Regex>,
    pub exclude_wholere: Option<Regex>,
    pub exclude_iwholere: Option<Regex>,
}

impl PredicateBundle {
    /// `true` iff `fi` (found at `relpath` relative to the walk root)
    /// should be kept. Never called to decide whether to *descend* into
    /// a directory — only whether to emit it as `good`.
    #[must_use]
    pub fn evaluate(&self, fi: &FileInfo, relpath: &str) -> bool {
        // Positive predicates: every active one must match.
        if let Some(v) = self.min_size {
            if !matches_min_size(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.max_size {
            if !matches_max_size(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.newer_than {
            if !matches_newer_than(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.older_than {
            if !matches_older_than(v, fi) {
                return false;
            }
        }
        if let Some(re) = &self.name {
            if !matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.iname {
            if !matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.re {
            if !matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.ire {
            if !matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.wholere {
            if !matches_relpath(re, relpath) {
                return false;
            }
        }
        if let Some(re) = &self.iwholere {
            if !matches_relpath(re, relpath) {
                return false;
            }
        }

        // Exclude predicates: any active match discards the entry.
        if let Some(v) = self.exclude_min_size {
            if matches_min_size(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.exclude_max_size {
            if matches_max_size(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.exclude_newer_than {
            if matches_newer_than(v, fi) {
                return false;
            }
        }
        if let Some(v) = self.exclude_older_than {
            if matches_older_than(v, fi) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_name {
            if matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_iname {
            if matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_re {
            if matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_ire {
            if matches_basename(re, fi) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_wholere {
            if matches_relpath(re, relpath) {
                return false;
            }
        }
        if let Some(re) = &self.exclude_iwholere {
            if matches_relpath(re, relpath) {
                return false;
            }
        }

        true
    }
}

fn matches_min_size(value: i64, fi: &FileInfo) -> bool {
    fi.is_dir() || fi.size() >= value
}

fn matches_max_size(value: i64, fi: &FileInfo) -> bool {
    fi.is_dir() || fi.size() <= value
}

fn matches_newer_than(epoch_secs: i64, fi: &FileInfo) -> bool {
    fi.mtime() / 1000 >= epoch_secs
}

fn matches_older_than(epoch_secs: i64, fi: &FileInfo) -> bool {
    fi.mtime() / 1000 <= epoch_secs
}

fn matches_basename(re: &Regex, fi: &FileInfo) -> bool {
    re.is_match(fi.basename())
}

fn matches_relpath(re: &Regex, relpath: &str) -> bool {
    re.is_match(relpath)
}
