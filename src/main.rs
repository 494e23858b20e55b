extern crate log;
pub mod collection;
pub mod geofile;
pub mod recording;
pub mod upload;
use crate::collection::kind::{CollectionKind, GeometryKind};
use crate::collection::manager::CollectionManager;
use crate::collection::paths::StoragePaths;
use crate::geofile::feature::Properties;
use crate::recording::session::{
    LocationFix, RecordingSession, SessionError, DEFAULT_MAX_HORIZONTAL_ACCURACY,
};
use crate::upload::coordinator::UploadCoordinator;
use crate::upload::submit::{HttpSubmitter, UploadEndpoint};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use geojson::JsonValue;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::{fs::read_to_string, path::Path};

/// Buffer GPS-tagged sidewalk markers locally and upload them in bulk.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input config file.
    #[arg(short, long)]
    config_filepath: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show how many features each collection holds.
    Status,
    /// Record a marker from location fixes and save it to its collection.
    Record {
        /// Collection to save to: sidewalk, curb-ramp or crossing.
        #[arg(short, long)]
        kind: CollectionKind,
        /// Geometry to record, defaults to the collection's usual geometry.
        #[arg(short, long, value_enum)]
        geometry: Option<GeometryKind>,
        /// Location fix as `lon,lat,accuracy_meters`. Repeat for every fix.
        #[arg(short, long = "fix", value_parser = parse_fix)]
        fixes: Vec<LocationFix>,
        /// Property as `key=value`, values that parse as JSON are stored as JSON.
        #[arg(short, long = "property", value_parser = parse_property)]
        properties: Vec<(String, JsonValue)>,
        /// Keep fixes that are not accurate enough instead of failing.
        #[arg(long)]
        accept_inaccurate: bool,
    },
    /// Upload all non-empty collections and clear them if every upload succeeds.
    Upload,
    /// Delete the given collections.
    Clear {
        kinds: Vec<CollectionKind>,
        /// Delete every collection.
        #[arg(long, conflicts_with = "kinds")]
        all: bool,
    },
    /// Store the user identity attached to uploads.
    Login {
        /// Identity field as `key=value`. Repeat for every field.
        #[arg(short, long = "field", value_parser = parse_property, required = true)]
        fields: Vec<(String, JsonValue)>,
    },
}

fn default_max_horizontal_accuracy() -> f64 {
    DEFAULT_MAX_HORIZONTAL_ACCURACY
}

#[derive(Deserialize, Debug)]
struct Config {
    data_dir: PathBuf,
    upload: UploadEndpoint,
    #[serde(default = "default_max_horizontal_accuracy")]
    max_horizontal_accuracy: f64,
}

fn parse_fix(value: &str) -> Result<LocationFix, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(format!(
            "expected `lon,lat,accuracy_meters`, got '{}'",
            value
        ));
    }
    let numbers: Result<Vec<f64>, _> = parts.iter().map(|part| part.parse::<f64>()).collect();
    let numbers = numbers.map_err(|err| format!("invalid number in '{}': {}", value, err))?;
    Ok(LocationFix::new(numbers[0], numbers[1], numbers[2]))
}

fn parse_property(value: &str) -> Result<(String, JsonValue), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("expected `key=value`, got '{}'", value))?;
    let parsed = serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    Ok((key.to_string(), parsed))
}

fn record(
    manager: &CollectionManager,
    config: &Config,
    kind: CollectionKind,
    geometry: Option<GeometryKind>,
    fixes: Vec<LocationFix>,
    properties: Properties,
    accept_inaccurate: bool,
) -> anyhow::Result<()> {
    let mut session = RecordingSession::with_geometry(
        kind,
        geometry.unwrap_or_else(|| kind.default_geometry()),
    )
    .with_max_horizontal_accuracy(config.max_horizontal_accuracy);

    for fix in fixes {
        match session.capture(fix) {
            Ok(_) => {}
            Err(SessionError::LowAccuracy { accuracy, threshold }) if accept_inaccurate => {
                log::warn!(
                    "Keeping fix with horizontal accuracy {} m (threshold {} m)",
                    accuracy,
                    threshold
                );
                session.capture_anyway(fix)?;
            }
            Err(err) => return Err(err.into()),
        }
        log::debug!("{:?}", session.view_flags());
    }
    if session.geometry_kind() == GeometryKind::Polygon {
        session.close()?;
    }
    session
        .commit(manager, properties)
        .with_context(|| format!("Saving {} recording", kind))?;
    log::info!(
        "Saved {} with {} fixes to {:?}",
        kind,
        session.fixes().len(),
        manager.store(kind).path()
    );
    Ok(())
}

fn upload(manager: &CollectionManager, config: &Config) -> anyhow::Result<()> {
    let coordinator = UploadCoordinator::new(HttpSubmitter::new(&config.upload)?);
    let report = coordinator.upload_all(manager)?;
    log::info!(
        "Upload finished: {} succeeded, {} failed",
        report.num_succeeded(),
        report.num_failed()
    );
    for (kind, err) in &report.failed {
        log::error!("{}: {}", kind, err);
    }
    if !report.is_success() {
        return Err(anyhow!(
            "{} collections failed to upload and were kept for retry",
            report.num_failed()
        ));
    }
    if let Some(invalidation) = &report.invalidation {
        for (kind, num_features) in &invalidation.retained {
            log::info!("{}: {} features recorded during the upload are kept", kind, num_features);
        }
        if !invalidation.is_success() {
            return Err(anyhow!(
                "Uploaded, but {} collections could not be cleared",
                invalidation.num_failed()
            ));
        }
    }
    Ok(())
}

fn clear(manager: &CollectionManager, kinds: Vec<CollectionKind>, all: bool) -> anyhow::Result<()> {
    let targets: BTreeSet<CollectionKind> = if all {
        CollectionKind::ALL.into_iter().collect()
    } else {
        kinds.into_iter().collect()
    };
    if targets.is_empty() {
        return Err(anyhow!("Nothing to clear, name collections or pass --all"));
    }
    let report = manager.invalidate(&targets);
    log::info!(
        "Cleared {} collections, {} failed",
        report.num_cleared(),
        report.num_failed()
    );
    if !report.is_success() {
        return Err(anyhow!("Could not clear {} collections", report.num_failed()));
    }
    Ok(())
}

fn status(manager: &CollectionManager) {
    for collection_status in manager.status() {
        match collection_status.num_features {
            Ok(num_features) => println!("{}: {}", collection_status.kind, num_features),
            Err(err) => println!("{}: {}", collection_status.kind, err),
        }
    }
    println!(
        "logged in: {}",
        if manager.credential().exists() { "yes" } else { "no" }
    );
}

fn try_main() -> anyhow::Result<()> {
    let args = Args::try_parse()?;
    if !Path::new(&args.config_filepath).exists() {
        return Err(anyhow!("Config file {} not found", &args.config_filepath));
    }
    let config_contents = read_to_string(args.config_filepath)?;
    let config: Config = serde_yaml::from_str(&config_contents)?;
    log::debug!("{:?}", config);

    let manager = CollectionManager::new(StoragePaths::new(&config.data_dir));
    match args.command {
        Command::Status => status(&manager),
        Command::Record {
            kind,
            geometry,
            fixes,
            properties,
            accept_inaccurate,
        } => record(
            &manager,
            &config,
            kind,
            geometry,
            fixes,
            properties.into_iter().collect(),
            accept_inaccurate,
        )?,
        Command::Upload => upload(&manager, &config)?,
        Command::Clear { kinds, all } => clear(&manager, kinds, all)?,
        Command::Login { fields } => {
            manager.credential().save(&fields.into_iter().collect())?;
            log::info!("Saved credential to {:?}", manager.credential().path());
        }
    }
    Ok(())
}

fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    env_logger::init();
    if let Err(e) = try_main() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1)
    }
}
