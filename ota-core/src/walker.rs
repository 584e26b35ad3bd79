//! Backup snapshot of a filesystem subtree.
//!
//! The walk runs right before a filesystem image replaces the data partition,
//! so the result is a point-in-time picture: a nested listing for the client
//! and the flat list of files it is expected to upload back afterwards.

use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::error::OtaError;
use crate::paths::{join_path, resolve};
use crate::restore::RestoreManifest;

/// Listing of one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirTree {
    pub path: String,
    pub children: Vec<DirNode>,
}

/// One entry of a [`DirTree`]. Directories carry their own listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirNode {
    pub name: String,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listing: Option<DirTree>,
}

impl DirTree {
    pub fn empty(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            children: Vec::new(),
        }
    }

    /// Number of plain files anywhere below this directory.
    pub fn file_count(&self) -> usize {
        self.children
            .iter()
            .map(|node| match &node.listing {
                Some(listing) => listing.file_count(),
                None if node.is_directory => 0,
                None => 1,
            })
            .sum()
    }

    /// Number of directories below this one (not counting itself).
    pub fn dir_count(&self) -> usize {
        self.children
            .iter()
            .filter_map(|node| node.listing.as_ref())
            .map(|listing| 1 + listing.dir_count())
            .sum()
    }
}

/// Result of walking the backup root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub tree: DirTree,
    pub manifest: RestoreManifest,
}

impl BackupSnapshot {
    pub fn empty(root: &str) -> Self {
        Self {
            tree: DirTree::empty(root),
            manifest: RestoreManifest::default(),
        }
    }
}

/// Walk `root` (a logical path below `mount`) depth first, pre-order.
///
/// A missing root gives an empty snapshot; callers that need files must check
/// the manifest themselves.
pub fn walk(mount: &Path, root: &str) -> BackupSnapshot {
    let real_root = match resolve(mount, root) {
        Ok(path) => path,
        Err(e) => {
            warn!("Backup walk skipped: {e}");
            return BackupSnapshot::empty(root);
        }
    };

    if !real_root.is_dir() {
        warn!("{}", OtaError::WalkerRootMissing(root.to_string()));
        return BackupSnapshot::empty(root);
    }

    let (tree, files) = list_dir(&real_root, root);
    debug!(
        "Backup walk of {}: {} files in {} directories",
        root,
        files.len(),
        tree.dir_count() + 1
    );

    BackupSnapshot {
        tree,
        manifest: RestoreManifest::new(files),
    }
}

fn list_dir(real: &Path, logical: &str) -> (DirTree, Vec<String>) {
    let mut tree = DirTree::empty(logical);
    let mut files = Vec::new();

    for (name, is_dir) in sorted_entries(real) {
        let child_logical = join_path(logical, &name);
        if is_dir {
            let (listing, nested_files) = list_dir(&real.join(&name), &child_logical);
            files.extend(nested_files);
            tree.children.push(DirNode {
                name,
                is_directory: true,
                listing: Some(listing),
            });
        } else {
            files.push(child_logical);
            tree.children.push(DirNode {
                name,
                is_directory: false,
                listing: None,
            });
        }
    }

    (tree, files)
}

/// Directory entries ordered by name; read_dir order is not stable across
/// filesystems.
fn sorted_entries(dir: &Path) -> Vec<(String, bool)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut listed: Vec<(String, bool)> = entries
        .flatten()
        .filter_map(|entry| {
            let is_dir = entry.file_type().ok()?.is_dir();
            Some((entry.file_name().to_string_lossy().into_owned(), is_dir))
        })
        .collect();
    listed.sort_by(|a, b| a.0.cmp(&b.0));
    listed
}
