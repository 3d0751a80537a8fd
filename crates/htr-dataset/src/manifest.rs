// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Manifest building.
//!
//! A manifest is the flat table of every retained handwriting line joined
//! with its image path, image dimensions and writer identity. It is built
//! once from the raw IAM annotations and consumed read-only by the split
//! engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use htr_dataset::{build_manifest, ManifestOptions};
//!
//! let options = ManifestOptions {
//!     forms_path: Some("data/raw/ascii/forms.txt".into()),
//!     ..ManifestOptions::new("data/raw/lines", "data/raw/ascii/lines.txt")
//! };
//! let manifest = build_manifest(&options, None)?;
//! println!("{} rows", manifest.len());
//! # Ok::<(), htr_dataset::Error>(())
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::Sender,
    },
};

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    index::{IMAGE_EXTENSIONS, index_images},
    parser::{DEFAULT_KEEP_STATUS, LineRecord, parse_forms, parse_lines},
};

/// Column names of a persisted manifest, in storage order.
pub const MANIFEST_COLUMNS: &[&str] = &[
    "line_id",
    "form_id",
    "writer_id",
    "image_path",
    "text",
    "status",
    "width",
    "height",
    "graylevel",
    "n_components",
    "bbox_x",
    "bbox_y",
    "bbox_w",
    "bbox_h",
];

/// Progress information for long-running operations.
///
/// # Example
///
/// ```rust
/// use htr_dataset::Progress;
///
/// let progress = Progress {
///     current: 25,
///     total: 100,
/// };
/// assert_eq!(progress.current * 4, progress.total);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Current number of completed items.
    pub current: usize,
    /// Total number of items to process.
    pub total: usize,
}

/// One row of the manifest table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub line_id: String,
    pub form_id: String,
    /// Writer identity, `None` when the form is not listed in `forms.txt`.
    pub writer_id: Option<String>,
    /// Image location, checked to exist when the manifest was built.
    pub image_path: String,
    pub text: String,
    pub status: String,
    pub width: u32,
    pub height: u32,
    pub graylevel: i64,
    pub n_components: u32,
    pub bbox_x: u32,
    pub bbox_y: u32,
    pub bbox_w: u32,
    pub bbox_h: u32,
}

impl ManifestRow {
    fn from_record(record: &LineRecord, image_path: &Path, (width, height): (u32, u32)) -> Self {
        ManifestRow {
            line_id: record.line_id.clone(),
            form_id: record.form_id(),
            writer_id: None,
            image_path: image_path.to_string_lossy().into_owned(),
            text: record.text.clone(),
            status: record.status.clone(),
            width,
            height,
            graylevel: record.graylevel,
            n_components: record.n_components,
            bbox_x: record.x,
            bbox_y: record.y,
            bbox_w: record.w,
            bbox_h: record.h,
        }
    }
}

/// Ordered collection of manifest rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn new(rows: Vec<ManifestRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestRow> {
        self.rows.iter()
    }

    /// Number of rows without a writer identity.
    pub fn missing_writers(&self) -> usize {
        self.rows.iter().filter(|r| r.writer_id.is_none()).count()
    }
}

impl FromIterator<ManifestRow> for Manifest {
    fn from_iter<I: IntoIterator<Item = ManifestRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestRow;
    type IntoIter = std::slice::Iter<'a, ManifestRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Inputs for [`build_manifest`].
#[derive(Debug, Clone)]
pub struct ManifestOptions {
    /// Directory tree containing the line images.
    pub images_root: PathBuf,
    /// Path to `lines.txt`.
    pub annotations_path: PathBuf,
    /// Path to `forms.txt`; without it every `writer_id` is null.
    pub forms_path: Option<PathBuf>,
    /// Accepted segmentation statuses.
    pub keep_status: Vec<String>,
    /// Keep only the first `limit` parsed records (`<= 0` = unlimited).
    pub limit: i64,
    /// Image extensions to index.
    pub extensions: Vec<String>,
    /// Probe image dimensions on the rayon thread pool.
    pub parallel: bool,
}

impl ManifestOptions {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(images_root: P, annotations_path: Q) -> Self {
        Self {
            images_root: images_root.into(),
            annotations_path: annotations_path.into(),
            forms_path: None,
            keep_status: DEFAULT_KEEP_STATUS.iter().map(|s| s.to_string()).collect(),
            limit: 0,
            extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            parallel: false,
        }
    }
}

/// Build a manifest from IAM annotations and a line image tree.
///
/// Rows follow the order of `lines.txt` (after status filtering and
/// `limit` truncation). Every row's image is opened once to read its
/// dimensions. With `parallel` set the probing runs on rayon, but errors are
/// still reported for the first failing record in input order.
///
/// # Errors
///
/// * [`Error::ImageNotFound`] if a line has no image with a matching stem.
/// * [`Error::ImageProbe`] if an image's dimensions cannot be read.
/// * [`Error::DirectoryNotFound`] if `images_root` does not exist.
/// * [`Error::IoError`] if `lines.txt` cannot be read.
///
/// No partial manifest is returned on failure.
#[cfg_attr(feature = "profiling", tracing::instrument(skip_all))]
pub fn build_manifest(
    options: &ManifestOptions,
    progress: Option<Sender<Progress>>,
) -> Result<Manifest, Error> {
    let mut records = parse_lines(&options.annotations_path, &options.keep_status)?;
    if options.limit > 0 {
        records.truncate(options.limit as usize);
    }
    info!(
        "parsed {} line records from {}",
        records.len(),
        options.annotations_path.display()
    );

    let index = index_images(&options.images_root, &options.extensions)?;
    info!(
        "indexed {} images under {}",
        index.len(),
        options.images_root.display()
    );

    let forms = match &options.forms_path {
        Some(path) => parse_forms(path)?,
        None => HashMap::new(),
    };
    if !forms.is_empty() {
        info!("loaded {} form to writer mappings", forms.len());
    }

    let total = records.len();
    let done = AtomicUsize::new(0);
    let report = || {
        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(tx) = &progress {
            let _ = tx.send(Progress { current, total });
        }
    };

    let build_row = |record: &LineRecord| -> Result<ManifestRow, Error> {
        let row = resolve_row(record, &index, &forms, &options.images_root);
        report();
        row
    };

    let rows: Vec<ManifestRow> = if options.parallel {
        let results: Vec<Result<ManifestRow, Error>> = records.par_iter().map(build_row).collect();
        results.into_iter().collect::<Result<_, _>>()?
    } else {
        records.iter().map(build_row).collect::<Result<_, _>>()?
    };

    let manifest = Manifest::new(rows);
    let missing = manifest.missing_writers();
    if options.forms_path.is_some() && missing > 0 {
        warn!("writer_id missing for {} of {} rows", missing, manifest.len());
    }
    info!("built manifest with {} rows", manifest.len());

    Ok(manifest)
}

fn resolve_row(
    record: &LineRecord,
    index: &BTreeMap<String, PathBuf>,
    forms: &HashMap<String, String>,
    images_root: &Path,
) -> Result<ManifestRow, Error> {
    let image_path = index
        .get(&record.line_id)
        .ok_or_else(|| Error::ImageNotFound {
            line_id: record.line_id.clone(),
            images_root: images_root.to_path_buf(),
        })?;

    let dimensions = probe_dimensions(image_path)?;

    let mut row = ManifestRow::from_record(record, image_path, dimensions);
    row.writer_id = forms.get(&row.form_id).cloned();
    Ok(row)
}

/// Read `(width, height)` from an image header without decoding pixels.
pub fn probe_dimensions(path: &Path) -> Result<(u32, u32), Error> {
    let probe_error = |message: String| Error::ImageProbe {
        path: path.to_path_buf(),
        message,
    };

    let size = imagesize::size(path).map_err(|e| probe_error(e.to_string()))?;
    let width = u32::try_from(size.width).map_err(|e| probe_error(e.to_string()))?;
    let height = u32::try_from(size.height).map_err(|e| probe_error(e.to_string()))?;
    if width == 0 || height == 0 {
        return Err(probe_error(format!("invalid size {}x{}", width, height)));
    }
    Ok((width, height))
}

/// Return a copy of `manifest` with `writer_id` taken from `forms.txt`.
///
/// Rows whose form is not listed get a null writer. The input manifest is
/// left untouched. A missing forms file nulls every writer.
pub fn attach_writer_id<P: AsRef<Path>>(manifest: &Manifest, forms_path: P) -> Result<Manifest, Error> {
    let forms = parse_forms(forms_path)?;
    Ok(attach_writer_map(manifest, &forms))
}

/// Same as [`attach_writer_id`] with an already parsed form map.
pub fn attach_writer_map(manifest: &Manifest, forms: &HashMap<String, String>) -> Manifest {
    manifest
        .iter()
        .map(|row| ManifestRow {
            writer_id: forms.get(&row.form_id).cloned(),
            ..row.clone()
        })
        .collect()
}
