use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{DvfArgs, FilterArgs, GeocoderArgs, Locality, StoreArgs};
use filter::PropertyFilter;
use geocode::Nominatim;
use store::{MemoryStore, Store};

pub mod config;
pub mod dvf;
pub mod error;
pub mod export;
pub mod extract;
pub mod filter;
pub mod geocode;
#[cfg(test)]
mod http_stub;
pub mod model;
pub mod pipeline;
pub mod rest;
pub mod store;

pub const DEFAULT_POSTAL_CODE: &str = "94200";
pub const DEFAULT_CITY: &str = "IVRY-SUR-SEINE";
pub const DEFAULT_COMMUNE_CODE: &str = "94041";

pub const DEFAULT_DVF_BASE_URL: &str = "https://files.data.gouv.fr/geo-dvf/latest/communes";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const USER_AGENT: &str = "HomesIvry/1.0";

// Nominatim's usage policy allows one request per second.
pub const DEFAULT_REQUEST_DELAY_MS: u64 = 1000;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BATCH_INTERVAL_SECS: u64 = 10;

#[derive(Parser)]
#[command(name = "ivry_homes", version, about = "Loads DVF property sales for one town and prepares them for the map")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replace properties and price history with the contents of a DVF file.
    Import(ImportArgs),
    /// Download the geo-dvf CSV of the commune into the raw transactions table.
    FetchDvf(FetchDvfArgs),
    /// Look up coordinates for properties that have none.
    Geocode(GeocodeArgs),
    /// Write the filtered properties as GeoJSON for the map.
    Query(QueryArgs),
    /// Print the filter bounds the map should offer.
    Ranges(RangesArgs),
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Pipe-delimited ValeursFoncieres extract.
    Flat,
    /// geo-dvf per-commune CSV.
    Csv,
}

#[derive(clap::Args)]
struct ImportArgs {
    path: PathBuf,

    #[arg(long, value_enum, default_value_t = Format::Flat)]
    format: Format,

    /// Run against an in-memory store and only report counts.
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    locality: Locality,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(clap::Args)]
struct FetchDvfArgs {
    #[command(flatten)]
    dvf: DvfArgs,

    #[command(flatten)]
    locality: Locality,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(clap::Args)]
struct GeocodeArgs {
    /// Keep running batches until every property is located.
    #[arg(long)]
    all: bool,

    #[command(flatten)]
    geocoder: GeocoderArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(clap::Args)]
struct QueryArgs {
    #[arg(long, default_value = "properties.geojson")]
    out: PathBuf,

    #[command(flatten)]
    filter: FilterArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[derive(clap::Args)]
struct RangesArgs {
    #[command(flatten)]
    store: StoreArgs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Import(args) => run_import(args),
        Command::FetchDvf(args) => run_fetch_dvf(args),
        Command::Geocode(args) => run_geocode(args),
        Command::Query(args) => run_query(args),
        Command::Ranges(args) => run_ranges(args),
    }
}

fn run_import(args: ImportArgs) -> Result<()> {
    let rows = match args.format {
        Format::Flat => extract::scan_flat_file(&args.path, &args.locality)
            .with_context(|| format!("reading {}", args.path.display()))?
            .rows,
        Format::Csv => dvf::read_file(&args.path)
            .with_context(|| format!("reading {}", args.path.display()))?
            .into_iter()
            .filter(|(_, r)| args.locality.matches(&r.code_postal, &r.nom_commune))
            .map(|(line, r)| r.to_raw(line))
            .collect(),
    };
    info!(rows = rows.len(), city = %args.locality.city, "rows in locality");

    let report = if args.dry_run {
        pipeline::run_import(&mut MemoryStore::default(), &rows, &args.locality)?
    } else {
        let mut store = args.store.connect()?;
        pipeline::run_import(&mut store, &rows, &args.locality).context("import failed")?
    };

    info!(
        properties = report.properties,
        transactions = report.transactions,
        price_entries = report.price_entries,
        dropped = report.dropped,
        dry_run = args.dry_run,
        "import complete"
    );
    Ok(())
}

fn run_fetch_dvf(args: FetchDvfArgs) -> Result<()> {
    let url = args.dvf.commune_url(&args.locality.commune_code);
    let client = reqwest::blocking::Client::builder().user_agent(USER_AGENT).build()?;
    let records = dvf::fetch(&client, &url)?;

    let mut store = args.store.connect()?;
    let count = dvf::load(&mut store, &records).context("loading dvf transactions")?;
    println!("{}", serde_json::json!({ "success": true, "recordCount": count }));
    Ok(())
}

fn run_geocode(args: GeocodeArgs) -> Result<()> {
    let mut store = args.store.connect()?;
    store.ping()?;
    let mut geocoder = Nominatim::new(&args.geocoder.geocoder_url, &args.geocoder.user_agent, args.geocoder.delay())?;

    let report = if args.all {
        geocode::run_until_done(&mut store, &mut geocoder, args.geocoder.batch_size, args.geocoder.interval())?
    } else {
        geocode::run_batch(&mut store, &mut geocoder, args.geocoder.batch_size)?
    };
    println!("{}", serde_json::json!({ "processed": report.processed, "updated": report.updated }));
    Ok(())
}

fn run_query(args: QueryArgs) -> Result<()> {
    let store = args.store.connect()?;
    let properties = store.list_properties().context("listing properties")?;
    let filter = PropertyFilter::from(args.filter);
    let selected = filter.apply(&properties);
    info!(total = properties.len(), selected = selected.len(), "properties filtered");

    let collection = export::to_collection(selected)?;
    export::write_collection(&args.out, collection)?;
    Ok(())
}

fn run_ranges(args: RangesArgs) -> Result<()> {
    let store = args.store.connect()?;
    let properties = store.list_properties().context("listing properties")?;
    let points = properties.iter().flat_map(|p| &p.price_history);

    let (min_price, max_price) = filter::price_range(points.clone());
    let (start, end) = filter::date_range(points, Local::now().date_naive());
    let ranges = serde_json::json!({
        "propertyTypes": filter::property_types(&properties),
        "price": { "min": min_price, "max": max_price },
        "date": { "start": start.to_string(), "end": end.to_string() },
    });
    println!("{}", serde_json::to_string_pretty(&ranges)?);
    Ok(())
}
