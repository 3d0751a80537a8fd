// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Filename-stem index over an image directory tree.
//!
//! IAM line images ship in nested folders whose layout differs between
//! distributions (`lines/a01/a01-000u/a01-000u-00.png`, flat folders, ...),
//! so instead of reconstructing paths the whole tree is indexed once by
//! stem.

use std::{
    collections::{BTreeMap, btree_map::Entry},
    path::{Path, PathBuf},
};

use log::debug;
use walkdir::WalkDir;

use crate::Error;

/// Image file extensions indexed by default.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Index every image below `root` by filename stem.
///
/// The traversal is sorted by file name at every directory level, so when
/// two files share a stem the lexicographically first path wins on every
/// platform. Extensions are matched case-insensitively and may be given
/// with or without the leading dot. Returned paths are absolute.
///
/// # Errors
///
/// Returns [`Error::DirectoryNotFound`] if `root` does not exist.
///
/// # Example
///
/// ```rust,no_run
/// use htr_dataset::index::{index_images, IMAGE_EXTENSIONS};
///
/// let index = index_images("data/raw/lines", IMAGE_EXTENSIONS)?;
/// if let Some(path) = index.get("a01-000u-00") {
///     println!("{}", path.display());
/// }
/// # Ok::<(), htr_dataset::Error>(())
/// ```
pub fn index_images<P: AsRef<Path>, S: AsRef<str>>(
    root: P,
    extensions: &[S],
) -> Result<BTreeMap<String, PathBuf>, Error> {
    let root = root.as_ref();
    if !root.exists() {
        return Err(Error::DirectoryNotFound(root.to_path_buf()));
    }
    let root = std::path::absolute(root)?;

    let extensions: Vec<String> = if extensions.is_empty() {
        IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
    } else {
        extensions
            .iter()
            .map(|e| e.as_ref().trim_start_matches('.').to_lowercase())
            .collect()
    };

    let mut index: BTreeMap<String, PathBuf> = BTreeMap::new();

    for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };

        match index.entry(stem.to_owned()) {
            Entry::Occupied(existing) => debug!(
                "duplicate image stem {}: keeping {}, ignoring {}",
                stem,
                existing.get().display(),
                path.display()
            ),
            Entry::Vacant(slot) => {
                slot.insert(path.to_path_buf());
            }
        }
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_index_nested_layout() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        touch(&root.join("a01/a01-000u/a01-000u-00.png"));
        touch(&root.join("a01/a01-000u/a01-000u-01.PNG"));
        touch(&root.join("flat-line.jpeg"));
        touch(&root.join("a01/a01-000u/notes.txt"));

        let index = index_images(root, IMAGE_EXTENSIONS).unwrap();

        assert_eq!(index.len(), 3);
        assert!(index.contains_key("a01-000u-00"));
        assert!(index.contains_key("a01-000u-01"));
        assert!(index.contains_key("flat-line"));
        assert!(!index.contains_key("notes"));
        assert!(index.values().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_stem_collision_first_lexicographic_wins() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        touch(&root.join("b/dup.png"));
        touch(&root.join("a/dup.png"));
        touch(&root.join("c/dup.jpg"));

        let index = index_images(root, IMAGE_EXTENSIONS).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index["dup"].ends_with("a/dup.png"));
    }

    #[test]
    fn test_custom_extensions_with_dot() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();

        touch(&root.join("x.png"));
        touch(&root.join("y.tif"));

        let index = index_images(root, &[".TIF"]).unwrap();
        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = index_images(temp_dir.path().join("missing"), IMAGE_EXTENSIONS).unwrap_err();
        assert!(matches!(err, Error::DirectoryNotFound(_)));
    }
}
