// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Manifest persistence.
//!
//! Manifests are stored as Arrow IPC files and split partitions as CSV with
//! a header row. Both layouts use the column order of
//! [`MANIFEST_COLUMNS`](crate::MANIFEST_COLUMNS).
//!
//! Every write goes to a temporary file next to the destination and is
//! renamed into place, so a failed write never leaves a partial file behind.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use log::warn;
use polars::prelude::*;
use tempfile::NamedTempFile;

use crate::{Error, Manifest, ManifestRow, split::Split};

/// File names of the split partitions inside the output directory.
pub const SPLIT_FILES: [&str; 3] = ["train.csv", "val.csv", "test.csv"];

impl Manifest {
    /// Convert the manifest into a DataFrame with the manifest schema.
    pub fn to_dataframe(&self) -> Result<DataFrame, Error> {
        let columns: Vec<Column> = vec![
            Series::new("line_id".into(), column_values(self, |r| r.line_id.as_str())).into(),
            Series::new("form_id".into(), column_values(self, |r| r.form_id.as_str())).into(),
            Series::new("writer_id".into(), column_values(self, |r| r.writer_id.as_deref())).into(),
            Series::new("image_path".into(), column_values(self, |r| r.image_path.as_str())).into(),
            Series::new("text".into(), column_values(self, |r| r.text.as_str())).into(),
            Series::new("status".into(), column_values(self, |r| r.status.as_str())).into(),
            Series::new("width".into(), column_values(self, |r| r.width)).into(),
            Series::new("height".into(), column_values(self, |r| r.height)).into(),
            Series::new("graylevel".into(), column_values(self, |r| r.graylevel)).into(),
            Series::new("n_components".into(), column_values(self, |r| r.n_components)).into(),
            Series::new("bbox_x".into(), column_values(self, |r| r.bbox_x)).into(),
            Series::new("bbox_y".into(), column_values(self, |r| r.bbox_y)).into(),
            Series::new("bbox_w".into(), column_values(self, |r| r.bbox_w)).into(),
            Series::new("bbox_h".into(), column_values(self, |r| r.bbox_h)).into(),
        ];

        Ok(DataFrame::new(columns)?)
    }

    /// Rebuild a manifest from a DataFrame.
    ///
    /// Columns are cast to the manifest types, so CSV partitions read with
    /// every column as a string are accepted too. Only `writer_id` may be
    /// null; a null `text` is read as an empty transcription.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidManifest`] if a column is missing or holds a null or
    /// unconvertible value.
    pub fn from_dataframe(df: &DataFrame) -> Result<Self, Error> {
        let height = df.height();

        let mut line_id = strings(df, "line_id")?.into_iter();
        let mut form_id = strings(df, "form_id")?.into_iter();
        let mut writer_id = strings(df, "writer_id")?.into_iter();
        let mut image_path = strings(df, "image_path")?.into_iter();
        let mut text = strings(df, "text")?.into_iter();
        let mut status = strings(df, "status")?.into_iter();
        let mut width = unsigned(df, "width")?.into_iter();
        let mut height_col = unsigned(df, "height")?.into_iter();
        let mut graylevel = signed(df, "graylevel")?.into_iter();
        let mut n_components = unsigned(df, "n_components")?.into_iter();
        let mut bbox_x = unsigned(df, "bbox_x")?.into_iter();
        let mut bbox_y = unsigned(df, "bbox_y")?.into_iter();
        let mut bbox_w = unsigned(df, "bbox_w")?.into_iter();
        let mut bbox_h = unsigned(df, "bbox_h")?.into_iter();

        let mut rows = Vec::with_capacity(height);
        for idx in 0..height {
            rows.push(ManifestRow {
                line_id: non_null(line_id.next().flatten(), "line_id", idx)?,
                form_id: non_null(form_id.next().flatten(), "form_id", idx)?,
                writer_id: writer_id.next().flatten(),
                image_path: non_null(image_path.next().flatten(), "image_path", idx)?,
                text: text.next().flatten().unwrap_or_default(),
                status: non_null(status.next().flatten(), "status", idx)?,
                width: non_null(width.next().flatten(), "width", idx)?,
                height: non_null(height_col.next().flatten(), "height", idx)?,
                graylevel: non_null(graylevel.next().flatten(), "graylevel", idx)?,
                n_components: non_null(n_components.next().flatten(), "n_components", idx)?,
                bbox_x: non_null(bbox_x.next().flatten(), "bbox_x", idx)?,
                bbox_y: non_null(bbox_y.next().flatten(), "bbox_y", idx)?,
                bbox_w: non_null(bbox_w.next().flatten(), "bbox_w", idx)?,
                bbox_h: non_null(bbox_h.next().flatten(), "bbox_h", idx)?,
            });
        }

        Ok(Manifest::new(rows))
    }
}

fn column_values<'a, T>(manifest: &'a Manifest, f: impl Fn(&'a ManifestRow) -> T) -> Vec<T> {
    manifest.iter().map(f).collect()
}

fn required<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column, Error> {
    df.column(name)
        .map_err(|_| Error::InvalidManifest(format!("missing column '{}'", name)))
}

fn strings(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>, Error> {
    let column = required(df, name)?.cast(&DataType::String)?;
    Ok(column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_owned))
        .collect())
}

fn unsigned(df: &DataFrame, name: &str) -> Result<Vec<Option<u32>>, Error> {
    let column = required(df, name)?.cast(&DataType::UInt32)?;
    Ok(column.u32()?.into_iter().collect())
}

fn signed(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>, Error> {
    let column = required(df, name)?.cast(&DataType::Int64)?;
    Ok(column.i64()?.into_iter().collect())
}

fn non_null<T>(value: Option<T>, column: &str, row: usize) -> Result<T, Error> {
    value.ok_or_else(|| {
        Error::InvalidManifest(format!(
            "null or invalid value in column '{}' at row {}",
            column, row
        ))
    })
}

/// Create a temporary file in the destination directory of `path`.
fn staging_file(path: &Path) -> Result<NamedTempFile, Error> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    Ok(NamedTempFile::new_in(parent)?)
}

/// Write a manifest as an Arrow IPC file.
pub fn write_manifest<P: AsRef<Path>>(manifest: &Manifest, path: P) -> Result<(), Error> {
    let path = path.as_ref();
    let mut df = manifest.to_dataframe()?;

    let staging = staging_file(path)?;
    {
        let mut writer = BufWriter::new(staging.as_file());
        IpcWriter::new(&mut writer).finish(&mut df)?;
        writer.flush()?;
    }
    staging.persist(path)?;
    Ok(())
}

/// Read a manifest written by [`write_manifest`].
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Manifest, Error> {
    let file = File::open(path.as_ref())?;
    let df = IpcReader::new(file).finish()?;
    Manifest::from_dataframe(&df)
}

/// Write `manifest` as CSV into a temporary file next to `path`.
fn stage_csv(manifest: &Manifest, path: &Path) -> Result<NamedTempFile, Error> {
    let mut df = manifest.to_dataframe()?;

    let staging = staging_file(path)?;
    {
        let mut writer = BufWriter::new(staging.as_file());
        CsvWriter::new(&mut writer)
            .include_header(true)
            .finish(&mut df)?;
        writer.flush()?;
    }
    Ok(staging)
}

/// Write a manifest as CSV with a header row. Null writers become empty fields.
pub fn write_csv<P: AsRef<Path>>(manifest: &Manifest, path: P) -> Result<(), Error> {
    let path = path.as_ref();
    stage_csv(manifest, path)?.persist(path)?;
    Ok(())
}

/// Read a CSV partition written by [`write_csv`].
///
/// Every column is read as text and converted afterwards, so transcriptions
/// that look like numbers keep their exact spelling.
pub fn read_csv<P: AsRef<Path>>(path: P) -> Result<Manifest, Error> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;
    Manifest::from_dataframe(&df)
}

/// Write `train.csv`, `val.csv` and `test.csv` into `dir`.
///
/// All three partitions are staged before any is moved into place. If a
/// destination cannot be replaced, the partitions already moved are removed
/// again, so `dir` never holds a new partition next to stale ones.
///
/// Returns the written paths in train, val, test order.
pub fn write_split<P: AsRef<Path>>(split: &Split, dir: P) -> Result<[PathBuf; 3], Error> {
    let dir = dir.as_ref();
    let paths = SPLIT_FILES.map(|name| dir.join(name));

    if let Some(path) = paths.iter().find(|p| p.is_dir()) {
        return Err(Error::IoError(std::io::Error::other(format!(
            "split destination {} is a directory",
            path.display()
        ))));
    }

    let staged = [&split.train, &split.val, &split.test]
        .into_iter()
        .zip(&paths)
        .map(|(manifest, path)| stage_csv(manifest, path))
        .collect::<Result<Vec<_>, _>>()?;

    for (idx, (staging, path)) in staged.into_iter().zip(&paths).enumerate() {
        if let Err(err) = staging.persist(path) {
            for written in &paths[..idx] {
                if let Err(e) = std::fs::remove_file(written) {
                    warn!("failed to remove {}: {}", written.display(), e);
                }
            }
            return Err(err.into());
        }
    }
    Ok(paths)
}

/// Read the three partitions written by [`write_split`].
pub fn read_split<P: AsRef<Path>>(dir: P) -> Result<[Manifest; 3], Error> {
    let dir = dir.as_ref();
    Ok([
        read_csv(dir.join(SPLIT_FILES[0]))?,
        read_csv(dir.join(SPLIT_FILES[1]))?,
        read_csv(dir.join(SPLIT_FILES[2]))?,
    ])
}
