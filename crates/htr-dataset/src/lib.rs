// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # HTR Dataset Library
//!
//! Dataset preparation for handwritten text recognition on the IAM
//! Handwriting Database. The library turns the raw IAM line annotations and
//! line images into a flat manifest, then partitions that manifest into
//! train, validation and test sets without letting any form or writer leak
//! across partitions.
//!
//! ## Features
//!
//! - **Annotation parsing**: `lines.txt` and `forms.txt` readers tolerant of
//!   comments and malformed records
//! - **Image indexing**: deterministic recursive index of line images by id
//! - **Manifest building**: join of annotations, images, dimensions and
//!   writers, optionally probed in parallel
//! - **Group splitting**: seeded, reproducible splits by form or writer with
//!   leakage checks
//! - **Settings**: layered defaults, configuration file, environment and
//!   overrides
//! - **Run tracking**: parameters, metrics and settings snapshots per run
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use htr_dataset::{
//!     Error, build_manifest, settings::SettingsLoader, split::split, write_manifest,
//! };
//!
//! fn main() -> Result<(), Error> {
//!     let settings = SettingsLoader::new().load()?;
//!
//!     let manifest = build_manifest(&settings.manifest_options(), None)?;
//!     write_manifest(&manifest, &settings.data.manifest_path)?;
//!
//!     let split = split(
//!         &manifest,
//!         settings.split.group_column()?,
//!         settings.split.seed,
//!         settings.split.fractions(),
//!     );
//!     println!("train={} val={} test={}", split.train.len(), split.val.len(), split.test.len());
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Optional Features
//!
//! - `polars` (default): Arrow IPC and CSV persistence through Polars
//! - `profiling`: tracing spans around manifest building and splitting

mod error;
pub mod index;
#[cfg(feature = "polars")]
pub mod io;
mod manifest;
pub mod parser;
pub mod settings;
pub mod split;
pub mod tracking;

pub use crate::{
    error::Error,
    index::index_images,
    manifest::{
        MANIFEST_COLUMNS, Manifest, ManifestOptions, ManifestRow, Progress, attach_writer_id,
        attach_writer_map, build_manifest, probe_dimensions,
    },
    parser::{LineRecord, parse_forms, parse_lines},
    settings::{Settings, SettingsLoader},
    split::{Fractions, GroupColumn, Split, check_group_values, group_overlaps},
    tracking::{RunGuard, Tracker},
};

#[cfg(feature = "polars")]
pub use crate::io::{read_csv, read_manifest, read_split, write_csv, write_manifest, write_split};

#[cfg(test)]
mod tests {
    #[ctor::ctor]
    fn init() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .is_test(true)
            .init();
    }
}
