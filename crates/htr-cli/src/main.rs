// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use htr_dataset::{
    Error, GroupColumn, Progress, RunGuard, Settings, SettingsLoader, attach_writer_id,
    build_manifest, check_group_values, group_overlaps, read_manifest, read_split,
    split::split, tracking::tracker_for, write_manifest, write_split,
};
use std::{path::PathBuf, sync::mpsc, thread};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file layered over the built-in defaults.
    #[clap(long, short, global = true, env = "HTR_CONFIG")]
    config: Option<PathBuf>,

    /// Pipeline command
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Build the line manifest from the IAM annotations and line images and
    /// save it to data.manifest_path.
    MakeManifest {
        /// Settings overrides such as data.limit=100
        overrides: Vec<String>,
    },
    /// Split the manifest into train, val and test CSV files in
    /// data.processed_dir, grouped by form or writer.
    MakeSplits {
        /// Settings overrides such as split.strategy=writer split.seed=7
        overrides: Vec<String>,
    },
    /// Rewrite the manifest with writer ids looked up in data.forms_path.
    AttachWriterId {
        /// Settings overrides such as data.forms_path=ascii/forms.txt
        overrides: Vec<String>,
    },
    /// Check that no group appears in more than one of the saved splits.
    /// Exits with an error if any group is shared.
    CheckLeakage {
        /// Group column to check, defaults to split.strategy
        #[clap(long)]
        column: Option<String>,

        /// Settings overrides
        overrides: Vec<String>,
    },
}

fn load_settings(config: Option<&PathBuf>, overrides: &[String]) -> Result<Settings, Error> {
    let loader = SettingsLoader::new().with_overrides(overrides.iter().cloned());
    match config {
        Some(path) => loader.with_file(path).load(),
        None => loader.load(),
    }
}

fn handle_make_manifest(settings: &Settings) -> Result<(), Error> {
    use indicatif::{ProgressBar, ProgressStyle};

    let tracker = tracker_for(&settings.tracking);
    let mut run = RunGuard::start(tracker.as_ref(), "make_manifest", settings)?;

    std::fs::create_dir_all(&settings.data.processed_dir)?;

    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise} ETA: {eta}] {msg}: {wide_bar:.yellow} {human_pos}/{human_len}",
    ) {
        bar.set_style(style.progress_chars("█▇▆▅▄▃▂▁  "));
    }
    bar.set_message("Probing images");

    let (tx, rx) = mpsc::channel::<Progress>();
    let progress = {
        let bar = bar.clone();
        thread::spawn(move || {
            while let Ok(progress) = rx.recv() {
                if progress.total > 0 {
                    bar.set_length(progress.total as u64);
                    bar.set_position(progress.current as u64);
                }
            }
        })
    };

    let manifest = build_manifest(&settings.manifest_options(), Some(tx));
    if progress.join().is_err() {
        log::warn!("progress reporter panicked");
    }
    bar.finish_and_clear();
    let manifest = manifest?;

    let path = &settings.data.manifest_path;
    write_manifest(&manifest, path)?;
    run.log_metric("rows", manifest.len() as f64)?;
    run.log_metric("missing_writer_id", manifest.missing_writers() as f64)?;

    println!(
        "Saved manifest: {} (rows={})",
        path.display(),
        manifest.len()
    );
    run.finish()
}

fn handle_make_splits(settings: &Settings) -> Result<(), Error> {
    let manifest_path = &settings.data.manifest_path;
    if !manifest_path.exists() {
        return Err(Error::PrerequisiteMissing(format!(
            "Manifest not found: {}. Run `htr make-manifest` first.",
            manifest_path.display()
        )));
    }

    let tracker = tracker_for(&settings.tracking);
    let mut run = RunGuard::start(tracker.as_ref(), "make_splits", settings)?;

    let column = settings.split.group_column()?;
    let manifest = read_manifest(manifest_path)?;
    check_group_values(&manifest, column)?;

    let parts = split(
        &manifest,
        column,
        settings.split.seed,
        settings.split.fractions(),
    );
    write_split(&parts, &settings.data.processed_dir)?;

    let groups = parts.groups.counts();
    run.log_metric("train_rows", parts.train.len() as f64)?;
    run.log_metric("val_rows", parts.val.len() as f64)?;
    run.log_metric("test_rows", parts.test.len() as f64)?;
    run.log_metric("train_groups", groups.train as f64)?;
    run.log_metric("val_groups", groups.val as f64)?;
    run.log_metric("test_groups", groups.test as f64)?;

    println!(
        "Saved splits to {}: train={}, val={}, test={} (group={})",
        settings.data.processed_dir.display(),
        parts.train.len(),
        parts.val.len(),
        parts.test.len(),
        column
    );
    run.finish()
}

fn handle_attach_writer_id(settings: &Settings) -> Result<(), Error> {
    let manifest_path = &settings.data.manifest_path;
    if !manifest_path.exists() {
        return Err(Error::PrerequisiteMissing(format!(
            "Manifest not found: {}. Run `htr make-manifest` first.",
            manifest_path.display()
        )));
    }
    let forms_path = match &settings.data.forms_path {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => {
            return Err(Error::InvalidParameters(
                "data.forms_path must point to ascii/forms.txt".to_owned(),
            ));
        }
    };
    if !forms_path.is_file() {
        return Err(Error::PrerequisiteMissing(format!(
            "Forms file not found: {}. Point data.forms_path to ascii/forms.txt.",
            forms_path.display()
        )));
    }

    let tracker = tracker_for(&settings.tracking);
    let mut run = RunGuard::start(tracker.as_ref(), "attach_writer_id", settings)?;

    let manifest = attach_writer_id(&read_manifest(manifest_path)?, forms_path)?;
    write_manifest(&manifest, manifest_path)?;

    let missing = manifest.missing_writers();
    run.log_metric("missing_writer_id", missing as f64)?;

    println!(
        "Saved manifest: {} (rows={}, missing writer_id={})",
        manifest_path.display(),
        manifest.len(),
        missing
    );
    run.finish()
}

fn handle_check_leakage(settings: &Settings, column: Option<String>) -> Result<(), Error> {
    let column: GroupColumn = match column {
        Some(column) => column.parse()?,
        None => settings.split.group_column()?,
    };

    let [train, val, test] = read_split(&settings.data.processed_dir)?;
    let overlaps = group_overlaps(&train, &val, &test, column);
    println!("Overlapping {} groups: {}", column, overlaps);

    if overlaps.is_clean() {
        Ok(())
    } else {
        Err(Error::Leakage(format!("{} groups {}", column, overlaps)))
    }
}

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // The log bridge is already taken by env_logger, so only spans land here.
    #[cfg(feature = "profiling")]
    {
        use tracing_subscriber::util::SubscriberInitExt as _;
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_env("HTR_TRACE"))
            .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
            .with_writer(std::io::stderr)
            .finish()
            .try_init();
    }

    let args = Args::parse();
    let config = args.config.as_ref();

    match args.cmd {
        Command::MakeManifest { overrides } => {
            handle_make_manifest(&load_settings(config, &overrides)?)
        }
        Command::MakeSplits { overrides } => handle_make_splits(&load_settings(config, &overrides)?),
        Command::AttachWriterId { overrides } => {
            handle_attach_writer_id(&load_settings(config, &overrides)?)
        }
        Command::CheckLeakage { column, overrides } => {
            handle_check_leakage(&load_settings(config, &overrides)?, column)
        }
    }
}
