// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use std::path::PathBuf;

/// Error type for dataset preparation operations.
///
/// Every variant is fatal to the operation that raised it. Recoverable
/// conditions such as malformed annotation rows or a missing forms file are
/// handled inside the parsers and never surface here.
#[derive(Debug)]
pub enum Error {
    /// An I/O error occurred during file operations.
    IoError(std::io::Error),
    /// Configuration parsing or loading error.
    ConfigError(config::ConfigError),
    /// JSON serialization or deserialization error.
    JsonError(serde_json::Error),
    /// The configured image root directory does not exist.
    DirectoryNotFound(PathBuf),
    /// A line record could not be resolved to an image by filename stem.
    ImageNotFound {
        line_id: String,
        images_root: PathBuf,
    },
    /// An image was found but its dimensions could not be read.
    ImageProbe { path: PathBuf, message: String },
    /// A previous pipeline stage has not produced its output yet.
    PrerequisiteMissing(String),
    /// Unknown grouping strategy or column name.
    InvalidStrategy(String),
    /// Grouping column contains null values where none are allowed.
    MissingGroupValue { column: String, missing: usize },
    /// A persisted manifest is missing columns or has invalid values.
    InvalidManifest(String),
    /// Invalid parameters provided to an operation.
    InvalidParameters(String),
    /// Groups were found in more than one split partition.
    Leakage(String),
    /// Polars dataframe operation error (only with "polars" feature).
    #[cfg(feature = "polars")]
    PolarsError(polars::error::PolarsError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::ConfigError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::IoError(err.error)
    }
}

#[cfg(feature = "polars")]
impl From<polars::error::PolarsError> for Error {
    fn from(err: polars::error::PolarsError) -> Self {
        Error::PolarsError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::ConfigError(e) => write!(f, "Configuration error: {}", e),
            Error::JsonError(e) => write!(f, "JSON error: {}", e),
            Error::DirectoryNotFound(path) => {
                write!(f, "Images root not found: {}", path.display())
            }
            Error::ImageNotFound {
                line_id,
                images_root,
            } => write!(
                f,
                "Image not found for line_id={}. Searched under images_root={} by filename stem.",
                line_id,
                images_root.display()
            ),
            Error::ImageProbe { path, message } => write!(
                f,
                "Cannot read image dimensions of {}: {}",
                path.display(),
                message
            ),
            Error::PrerequisiteMissing(s) => write!(f, "Prerequisite missing: {}", s),
            Error::InvalidStrategy(s) => {
                write!(f, "Unknown split strategy '{}' (expected 'form' or 'writer')", s)
            }
            Error::MissingGroupValue { column, missing } => write!(
                f,
                "{} missing for {} rows. Rebuild manifest with data.forms_path pointing to ascii/forms.txt.",
                column, missing
            ),
            Error::InvalidManifest(s) => write!(f, "Invalid manifest: {}", s),
            Error::InvalidParameters(s) => write!(f, "Invalid parameters: {}", s),
            Error::Leakage(s) => write!(f, "Group leakage detected: {}", s),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => write!(f, "Polars error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::ConfigError(e) => Some(e),
            Error::JsonError(e) => Some(e),
            #[cfg(feature = "polars")]
            Error::PolarsError(e) => Some(e),
            _ => None,
        }
    }
}
