// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Experiment run tracking.
//!
//! Every pipeline invocation records its effective parameters and a
//! snapshot of the resolved settings. Backends implement [`Tracker`]; the
//! pipeline only holds a [`RunGuard`] scoped to one invocation.
//!
//! # Backends
//!
//! - [`LocalTracker`]: JSON files under `{dir}/{experiment}/{run_id}/`
//! - [`NoopTracker`]: tracking disabled
//!
//! # Example
//!
//! ```rust,no_run
//! use htr_dataset::{settings::Settings, tracking::{tracker_for, RunGuard}};
//!
//! # fn main() -> Result<(), htr_dataset::Error> {
//! let settings = Settings::default();
//! let tracker = tracker_for(&settings.tracking);
//! let mut run = RunGuard::start(tracker.as_ref(), "make_manifest", &settings)?;
//! run.log_metric("rows", 6482.0)?;
//! run.finish()?;
//! # Ok(())
//! # }
//! ```

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Error,
    settings::{Settings, TrackingSettings},
};

/// Lifecycle state of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Tracking backend.
pub trait Tracker: Send + Sync {
    /// Open a new run.
    fn start_run(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TrackedRun>, Error>;
}

/// An open run returned by [`Tracker::start_run`].
pub trait TrackedRun: Send {
    fn run_id(&self) -> &str;

    /// Record parameters; later values for the same key replace earlier ones.
    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<(), Error>;

    fn log_metric(&mut self, key: &str, value: f64) -> Result<(), Error>;

    /// Store `contents` as `{artifact_path}/{name}`.
    fn log_artifact(&mut self, artifact_path: &str, name: &str, contents: &[u8])
    -> Result<(), Error>;

    /// Close the run with a final status.
    fn end(&mut self, status: RunStatus) -> Result<(), Error>;
}

/// Select the backend configured in `settings`.
pub fn tracker_for(settings: &TrackingSettings) -> Box<dyn Tracker> {
    if settings.enabled {
        Box::new(LocalTracker::new(&settings.dir, &settings.experiment))
    } else {
        Box::new(NoopTracker)
    }
}

/// Tracker that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracker;

impl Tracker for NoopTracker {
    fn start_run(
        &self,
        _name: &str,
        _tags: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TrackedRun>, Error> {
        Ok(Box::new(NoopRun {
            id: Uuid::new_v4().simple().to_string(),
        }))
    }
}

struct NoopRun {
    id: String,
}

impl TrackedRun for NoopRun {
    fn run_id(&self) -> &str {
        &self.id
    }

    fn log_params(&mut self, _params: &BTreeMap<String, String>) -> Result<(), Error> {
        Ok(())
    }

    fn log_metric(&mut self, _key: &str, _value: f64) -> Result<(), Error> {
        Ok(())
    }

    fn log_artifact(&mut self, _: &str, _: &str, _: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn end(&mut self, _status: RunStatus) -> Result<(), Error> {
        Ok(())
    }
}

/// File-backed tracker.
///
/// Layout of one run:
///
/// ```text
/// {dir}/{experiment}/{run_id}/
/// ├── meta.json
/// ├── params.json
/// ├── metrics.json
/// └── artifacts/
/// ```
#[derive(Debug, Clone)]
pub struct LocalTracker {
    root: PathBuf,
}

impl LocalTracker {
    pub fn new<P: AsRef<Path>>(dir: P, experiment: &str) -> Self {
        Self {
            root: dir.as_ref().join(experiment),
        }
    }

    /// Directory holding the runs of this experiment.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Tracker for LocalTracker {
    fn start_run(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<Box<dyn TrackedRun>, Error> {
        let id = Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&id);
        fs::create_dir_all(dir.join("artifacts"))?;

        let run = LocalRun {
            meta: RunMeta {
                run_id: id,
                name: name.to_owned(),
                status: RunStatus::Running,
                start_time: Utc::now(),
                end_time: None,
                tags: tags.clone(),
            },
            dir,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
        };
        write_json(&run.dir.join("meta.json"), &run.meta)?;
        debug!("started run {} in {}", run.meta.run_id, run.dir.display());

        Ok(Box::new(run))
    }
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
}

struct LocalRun {
    dir: PathBuf,
    meta: RunMeta,
    params: BTreeMap<String, String>,
    metrics: BTreeMap<String, f64>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

impl TrackedRun for LocalRun {
    fn run_id(&self) -> &str {
        &self.meta.run_id
    }

    fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<(), Error> {
        self.params
            .extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));
        write_json(&self.dir.join("params.json"), &self.params)
    }

    fn log_metric(&mut self, key: &str, value: f64) -> Result<(), Error> {
        self.metrics.insert(key.to_owned(), value);
        write_json(&self.dir.join("metrics.json"), &self.metrics)
    }

    fn log_artifact(
        &mut self,
        artifact_path: &str,
        name: &str,
        contents: &[u8],
    ) -> Result<(), Error> {
        let dir = self.dir.join("artifacts").join(artifact_path);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(name), contents)?;
        Ok(())
    }

    fn end(&mut self, status: RunStatus) -> Result<(), Error> {
        self.meta.status = status;
        self.meta.end_time = Some(Utc::now());
        write_json(&self.dir.join("meta.json"), &self.meta)
    }
}

/// Commit of the working directory, or `unknown` outside a git checkout.
fn git_commit() -> String {
    std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_owned())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Tracked run scoped to one pipeline invocation.
///
/// [`RunGuard::finish`] marks the run finished. A guard dropped without
/// `finish`, for example while an error propagates, marks the run failed.
pub struct RunGuard {
    run: Option<Box<dyn TrackedRun>>,
}

impl RunGuard {
    /// Start a run, log the flattened settings and store the resolved
    /// settings as `config/config_resolved.json`.
    ///
    /// Tags from `settings.tracking.tags` are merged with `version`, `os`,
    /// `arch` and `git_commit` defaults; configured tags win.
    pub fn start(tracker: &dyn Tracker, name: &str, settings: &Settings) -> Result<Self, Error> {
        let mut tags = settings.tracking.tags.clone();
        let defaults = [
            ("version", env!("CARGO_PKG_VERSION").to_owned()),
            ("os", std::env::consts::OS.to_owned()),
            ("arch", std::env::consts::ARCH.to_owned()),
            ("git_commit", git_commit()),
        ];
        for (key, value) in defaults {
            tags.entry(key.to_owned()).or_insert(value);
        }

        let mut guard = Self {
            run: Some(tracker.start_run(name, &tags)?),
        };
        if let Some(run) = guard.run.as_mut() {
            run.log_params(&settings.flatten()?)?;
            run.log_artifact(
                "config",
                "config_resolved.json",
                &serde_json::to_vec_pretty(settings)?,
            )?;
        }
        Ok(guard)
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.run_id())
    }

    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<(), Error> {
        match self.run.as_mut() {
            Some(run) => run.log_metric(key, value),
            None => Ok(()),
        }
    }

    /// Close the run as finished.
    pub fn finish(mut self) -> Result<(), Error> {
        match self.run.take() {
            Some(mut run) => run.end(RunStatus::Finished),
            None => Ok(()),
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(mut run) = self.run.take()
            && let Err(err) = run.end(RunStatus::Failed)
        {
            warn!("failed to close run {}: {}", run.run_id(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn only_run_dir(tracker: &LocalTracker) -> PathBuf {
        let mut dirs: Vec<_> = fs::read_dir(tracker.root())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(dirs.len(), 1);
        dirs.remove(0)
    }

    fn read_meta(dir: &Path) -> RunMeta {
        serde_json::from_slice(&fs::read(dir.join("meta.json")).unwrap()).unwrap()
    }

    #[test]
    fn test_finished_run() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = LocalTracker::new(temp_dir.path(), "htr");

        let mut settings = Settings::default();
        settings.tracking.tags.insert("os".into(), "custom".into());

        let mut run = RunGuard::start(&tracker, "make_manifest", &settings).unwrap();
        run.log_metric("rows", 4.0).unwrap();
        run.finish().unwrap();

        let dir = only_run_dir(&tracker);
        let meta = read_meta(&dir);
        assert_eq!(meta.name, "make_manifest");
        assert_eq!(meta.status, RunStatus::Finished);
        assert!(meta.end_time.is_some());
        assert_eq!(meta.tags["os"], "custom");
        assert!(meta.tags.contains_key("git_commit"));
        assert_eq!(meta.tags["version"], env!("CARGO_PKG_VERSION"));

        let params: BTreeMap<String, String> =
            serde_json::from_slice(&fs::read(dir.join("params.json")).unwrap()).unwrap();
        assert_eq!(params["split.seed"], "42");

        let metrics: BTreeMap<String, f64> =
            serde_json::from_slice(&fs::read(dir.join("metrics.json")).unwrap()).unwrap();
        assert_eq!(metrics["rows"], 4.0);

        let snapshot: Settings = serde_json::from_slice(
            &fs::read(dir.join("artifacts/config/config_resolved.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(snapshot, settings);
    }

    #[test]
    fn test_dropped_run_is_failed() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = LocalTracker::new(temp_dir.path(), "htr");

        let result: Result<(), Error> = (|| {
            let _run = RunGuard::start(&tracker, "make_splits", &Settings::default())?;
            Err(Error::PrerequisiteMissing("manifest".into()))
        })();
        assert!(result.is_err());

        let meta = read_meta(&only_run_dir(&tracker));
        assert_eq!(meta.status, RunStatus::Failed);
    }

    #[test]
    fn test_tracker_for_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let settings = TrackingSettings {
            enabled: false,
            dir: temp_dir.path().join("runs"),
            ..Default::default()
        };

        let tracker = tracker_for(&settings);
        let run = RunGuard::start(tracker.as_ref(), "noop", &Settings::default()).unwrap();
        assert!(run.run_id().is_some());
        run.finish().unwrap();
        assert!(!settings.dir.exists());
    }
}
