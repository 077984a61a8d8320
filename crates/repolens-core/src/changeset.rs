//! Change-set model.
//!
//! A [`FileDiff`] is one changed file as reported by the hosting API. A
//! [`ChangeSet`] is the categorized form consumed by delta sync: paths whose
//! content must be (re)indexed and paths whose entries must go.
//!
//! Renames are never path rewrites: the old path is deleted and the new
//! path is indexed from scratch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One changed file, in the shape of a GitLab v4 diff object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileDiff {
    #[serde(default)]
    pub old_path: Option<String>,
    #[serde(default)]
    pub new_path: Option<String>,
    /// Unified diff text (hunks only, no file headers).
    #[serde(default)]
    pub diff: Option<String>,
    #[serde(default)]
    pub new_file: bool,
    #[serde(default)]
    pub renamed_file: bool,
    #[serde(default)]
    pub deleted_file: bool,
}

impl FileDiff {
    /// The path the change is about: the new path, or the old one for
    /// deletions that carry no new path.
    pub fn path(&self) -> Option<&str> {
        self.new_path.as_deref().or(self.old_path.as_deref())
    }
}

/// Categorized set of paths touched by one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangeSet {
    pub fn new<U, D>(updated: U, deleted: D) -> Self
    where
        U: IntoIterator,
        U::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self {
            updated: updated.into_iter().map(Into::into).collect(),
            deleted: deleted.into_iter().map(Into::into).collect(),
        }
    }

    /// Categorize hosting-API diffs.
    ///
    /// - deleted file → old path deleted
    /// - renamed file → old path deleted, new path updated
    /// - anything else → new path updated
    pub fn from_diffs(diffs: &[FileDiff]) -> Self {
        let mut set = ChangeSet::default();
        for diff in diffs {
            if diff.deleted_file {
                if let Some(old) = diff.old_path.as_ref().or(diff.new_path.as_ref()) {
                    set.deleted.insert(old.clone());
                }
            } else if diff.renamed_file {
                if let Some(old) = &diff.old_path {
                    set.deleted.insert(old.clone());
                }
                if let Some(new) = &diff.new_path {
                    set.updated.insert(new.clone());
                }
            } else if let Some(path) = diff.path() {
                set.updated.insert(path.to_string());
            }
        }
        set
    }

    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Every path whose existing entries must be cleared before re-indexing.
    pub fn paths_to_clear(&self) -> impl Iterator<Item = &String> {
        self.deleted.union(&self.updated)
    }
}
