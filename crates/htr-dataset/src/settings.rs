// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Layered pipeline settings.
//!
//! Settings are resolved from, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. an optional configuration file (any format supported by `config`),
//! 3. `HTR_*` environment variables, using `__` between sections
//!    (`HTR_SPLIT__SEED=7`),
//! 4. `key=value` overrides such as `split.seed=7` or
//!    `data.keep_status=ok,err`.
//!
//! # Example
//!
//! ```rust
//! use htr_dataset::settings::SettingsLoader;
//!
//! let settings = SettingsLoader::new()
//!     .with_environment(Default::default())
//!     .with_overrides(["split.seed=7", "split.strategy=writer"])
//!     .load()?;
//! assert_eq!(settings.split.seed, 7);
//! assert_eq!(settings.split.strategy, "writer");
//! # Ok::<(), htr_dataset::Error>(())
//! ```

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    Error, ManifestOptions,
    index::IMAGE_EXTENSIONS,
    parser::DEFAULT_KEEP_STATUS,
    split::{Fractions, GroupColumn},
};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HTR";

/// Fully resolved settings for every pipeline stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub split: SplitSettings,
    pub tracking: TrackingSettings,
}

/// Dataset locations and manifest build parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub images_root: PathBuf,
    pub annotations_path: PathBuf,
    /// `forms.txt`; an empty path disables writer lookup.
    pub forms_path: Option<PathBuf>,
    pub processed_dir: PathBuf,
    pub manifest_path: PathBuf,
    #[serde(deserialize_with = "string_or_list")]
    pub keep_status: Vec<String>,
    pub limit: i64,
    pub parallel: bool,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            images_root: "data/raw/lines".into(),
            annotations_path: "data/raw/ascii/lines.txt".into(),
            forms_path: Some("data/raw/ascii/forms.txt".into()),
            processed_dir: "data/processed".into(),
            manifest_path: "data/processed/manifest.arrow".into(),
            keep_status: DEFAULT_KEEP_STATUS.iter().map(|s| s.to_string()).collect(),
            limit: 0,
            parallel: false,
        }
    }
}

/// Group split parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// `form` or `writer`.
    pub strategy: String,
    pub seed: u64,
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl Default for SplitSettings {
    fn default() -> Self {
        let fractions = Fractions::default();
        Self {
            strategy: "form".to_owned(),
            seed: 42,
            train: fractions.train,
            val: fractions.val,
            test: fractions.test,
        }
    }
}

impl SplitSettings {
    pub fn fractions(&self) -> Fractions {
        Fractions::new(self.train, self.val, self.test)
    }

    /// Grouping column for the configured strategy.
    pub fn group_column(&self) -> Result<GroupColumn, Error> {
        self.strategy.parse()
    }
}

/// Run tracking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    pub enabled: bool,
    /// Root directory of the local run store.
    pub dir: PathBuf,
    pub experiment: String,
    pub tags: BTreeMap<String, String>,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "runs".into(),
            experiment: "htr".to_owned(),
            tags: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Manifest build options derived from the `data` section.
    pub fn manifest_options(&self) -> ManifestOptions {
        let data = &self.data;
        ManifestOptions {
            forms_path: data
                .forms_path
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            keep_status: data.keep_status.clone(),
            limit: data.limit,
            extensions: IMAGE_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            parallel: data.parallel,
            ..ManifestOptions::new(&data.images_root, &data.annotations_path)
        }
    }

    /// Flatten settings into dotted `section.key -> value` strings.
    ///
    /// Nested maps are flattened recursively; lists are rendered as JSON.
    pub fn flatten(&self) -> Result<BTreeMap<String, String>, Error> {
        let value = serde_json::to_value(self)?;
        let mut out = BTreeMap::new();
        flatten_into(&value, "", &mut out);
        Ok(out)
    }
}

fn flatten_into(value: &serde_json::Value, prefix: &str, out: &mut BTreeMap<String, String>) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(value, &key, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_owned(), s.clone());
        }
        other => {
            out.insert(prefix.to_owned(), other.to_string());
        }
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        StringOrList::Many(list) => list,
    })
}

/// Builder resolving [`Settings`] from file, environment and overrides.
#[derive(Debug, Clone, Default)]
pub struct SettingsLoader {
    file: Option<PathBuf>,
    overrides: Vec<String>,
    environment: Option<config::Map<String, String>>,
}

impl SettingsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a configuration file; it must exist.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Apply `key=value` overrides, highest priority.
    pub fn with_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.overrides.extend(overrides.into_iter().map(Into::into));
        self
    }

    /// Use the given variables instead of the process environment.
    pub fn with_environment(mut self, vars: config::Map<String, String>) -> Self {
        self.environment = Some(vars);
        self
    }

    /// Resolve the settings.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameters`] for an override without `=`, and
    /// [`Error::ConfigError`] for unreadable files or mistyped values.
    pub fn load(self) -> Result<Settings, Error> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .source(self.environment),
        );

        for item in &self.overrides {
            let (key, value) = item.split_once('=').ok_or_else(|| {
                Error::InvalidParameters(format!("override '{}' must be key=value", item))
            })?;
            builder = builder.set_override(key.trim(), value.trim())?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
