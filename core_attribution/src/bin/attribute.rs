use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use attribution_schema::{
    render_link_values_csv, render_person_exposure_csv, ActivityLog, CalibrationRequest,
    FieldRecord, LocationSet, NetworkRecord,
};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use tracing::info;

use core_attribution::{
    attribute_and_price, attribute_exposure, estimate_from_request,
    load_attribution_config_from_env, ActivityTiles, AttributionConfig, ConcentrationField,
    CostFactors, LinkAttributor, Network,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Attribute pollutant fields to network links and persons", long_about = None)]
struct Args {
    /// Attribution config; defaults to ATTRIBUTION_CONFIG_PATH or the builtin document.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Attribute a concentration field to links and write ledgers and cost schedules.
    Links {
        #[arg(long)]
        network: PathBuf,
        #[arg(long)]
        field: PathBuf,
        /// Activity log for exposure-based attribution.
        #[arg(long)]
        activities: Option<PathBuf>,
        /// Known locations activities snap to.
        #[arg(long, requires = "activities")]
        locations: Option<PathBuf>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Estimate the smoothing radius for one receptor.
    Calibrate {
        #[arg(long)]
        request: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Links {
            network,
            field,
            activities,
            locations,
            out,
        } => run_links(
            &config,
            &network,
            &field,
            activities.as_deref(),
            locations.as_deref(),
            &out,
        ),
        Command::Calibrate { request } => run_calibrate(&config, &request),
    }
}

fn load_config(path: Option<&Path>) -> Result<Arc<AttributionConfig>> {
    match path {
        Some(path) => {
            let config = AttributionConfig::from_file(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            Ok(Arc::new(config))
        }
        None => {
            let (config, _metadata) = load_attribution_config_from_env();
            config.validate().context("validating attribution config")?;
            Ok(config)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn run_links(
    config: &AttributionConfig,
    network_path: &Path,
    field_path: &Path,
    activities_path: Option<&Path>,
    locations_path: Option<&Path>,
    out: &Path,
) -> Result<()> {
    let network_record: NetworkRecord = read_json(network_path)?;
    let field_record: FieldRecord = read_json(field_path)?;
    let activity_log: Option<ActivityLog> = activities_path.map(read_json::<ActivityLog>).transpose()?;
    let location_set: Option<LocationSet> = locations_path.map(read_json::<LocationSet>).transpose()?;

    let network = Network::from_records(&network_record.links)?;
    let field = ConcentrationField::from_records(
        &field_record.rasters,
        config.time_bin_size,
        config.time_bin_start,
    )?;
    let factors = CostFactors::from_config(&config.costs)?;
    let attributor = LinkAttributor::build(&network, *field.layout(), &config.link_attribution)?;

    let emissions = attribute_and_price(&attributor, &field, &factors)?;
    let exposure = match &activity_log {
        Some(log) => {
            let tiles = ActivityTiles::from_records(
                *field.layout(),
                &log.activities,
                location_set.as_ref(),
                &config.exposure,
            );
            Some(attribute_exposure(&attributor, &field, &tiles, &factors)?)
        }
        None => None,
    };

    // Nothing is written unless every result above was computed.
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let species = names(emissions.ledger.species());
    write(
        &out.join("link_values.csv"),
        render_link_values_csv(&emissions.ledger.rows(), &species),
    )?;
    write(
        &out.join("cost_schedule.json"),
        serde_json::to_string_pretty(&emissions.schedule.to_toll_scheme("emissions"))?,
    )?;

    if let Some(exposure) = &exposure {
        let species = names(exposure.links.ledger.species());
        write(
            &out.join("exposure_values.csv"),
            render_link_values_csv(&exposure.links.ledger.rows(), &species),
        )?;
        write(
            &out.join("exposure_cost_schedule.json"),
            serde_json::to_string_pretty(&exposure.links.schedule.to_toll_scheme("exposure"))?,
        )?;
        let species = names(exposure.persons.species());
        write(
            &out.join("person_exposure.csv"),
            render_person_exposure_csv(&exposure.persons.rows(), &species),
        )?;
    }

    info!(
        target: "attribution::links",
        out = %out.display(),
        links = emissions.schedule.len(),
        total_cost = emissions.schedule.total(),
        exposure = exposure.is_some(),
        "attribution.finished"
    );
    Ok(())
}

fn run_calibrate(config: &AttributionConfig, request_path: &Path) -> Result<()> {
    let request: CalibrationRequest = read_json(request_path)?;
    let estimate = estimate_from_request(&request, &config.radius_estimate)?;
    println!(
        "radius={} iterations={} residual={}",
        estimate.radius, estimate.iterations, estimate.residual
    );
    Ok(())
}

fn names<I, S>(species: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: ToString,
{
    species.into_iter().map(|s| s.to_string()).collect()
}

fn write(path: &Path, contents: String) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}
