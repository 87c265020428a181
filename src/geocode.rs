use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use geo::Point;
use regex::Regex;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{CoordinateUpdate, PendingLocation};
use crate::store::Store;

static NUMBER_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)\s*,\s*").expect("valid regex"));
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\s*").expect("valid regex"));

const COUNTRY: &str = "France";

/// Address lookup service.
pub trait Geocoder {
    /// First match for a free-text query, `None` when the service knows nothing.
    fn search(&mut self, query: &str) -> Result<Option<Point<f64>>>;
}

/// Keeps a minimum gap between consecutive calls.
#[derive(Debug)]
pub struct Pacer {
    delay: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self { delay, last: None }
    }

    pub fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                thread::sleep(self.delay - elapsed);
            }
        }
        self.last = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    lat: String,
    lon: String,
}

/// OpenStreetMap Nominatim search API.
pub struct Nominatim {
    client: Client,
    endpoint: String,
    pacer: Pacer,
}

impl Nominatim {
    pub fn new(endpoint: &str, user_agent: &str, delay: Duration) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client, endpoint, delay))
    }

    pub fn with_client(client: Client, endpoint: &str, delay: Duration) -> Self {
        Self { client, endpoint: endpoint.to_owned(), pacer: Pacer::new(delay) }
    }
}

impl Geocoder for Nominatim {
    fn search(&mut self, query: &str) -> Result<Option<Point<f64>>> {
        self.pacer.wait();
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("format", "json"), ("limit", "1"), ("countrycodes", "fr")])
            .send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Fetch { url: self.endpoint.clone(), status: status.as_u16() });
        }
        let hits: Vec<SearchHit> = resp.json()?;
        match hits.first() {
            Some(hit) => {
                let lat: f64 = hit.lat.parse().map_err(|_| Error::Invalid(format!("latitude {:?}", hit.lat)))?;
                let lon: f64 = hit.lon.parse().map_err(|_| Error::Invalid(format!("longitude {:?}", hit.lon)))?;
                Ok(Some(Point::new(lon, lat)))
            }
            None => Ok(None),
        }
    }
}

/// `12 , rue X` -> `12 rue X`, with runs of whitespace collapsed.
pub fn clean_address(address: &str) -> String {
    let fixed = NUMBER_COMMA.replace(address.trim(), "$1 ");
    SPACES.replace_all(&fixed, " ").trim().to_owned()
}

pub fn strip_street_number(address: &str) -> String {
    LEADING_NUMBER.replace(address, "").trim().to_owned()
}

pub fn full_query(p: &PendingLocation) -> String {
    format!("{}, {} {}, {}", clean_address(&p.address), p.postal_code, p.city, COUNTRY)
}

pub fn street_query(p: &PendingLocation) -> String {
    format!("{}, {}, {}", strip_street_number(&clean_address(&p.address)), p.city, COUNTRY)
}

/// Full address first, then the street alone when the full address is unknown.
pub fn locate<G: Geocoder>(geocoder: &mut G, p: &PendingLocation) -> Result<Option<Point<f64>>> {
    if let Some(point) = geocoder.search(&full_query(p))? {
        return Ok(Some(point));
    }
    let street = street_query(p);
    info!(id = p.id, query = %street, "retrying with street only");
    geocoder.search(&street)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub updated: usize,
}

fn geocode_pending<S: Store, G: Geocoder>(store: &mut S, geocoder: &mut G, pending: &[PendingLocation]) -> BatchReport {
    let mut report = BatchReport { processed: pending.len(), updated: 0 };

    for p in pending {
        let point = match locate(geocoder, p) {
            Ok(Some(point)) => point,
            Ok(None) => {
                warn!(id = p.id, address = %p.address, "no geocoding result");
                continue;
            }
            Err(e) => {
                warn!(id = p.id, "geocoding failed: {}", e);
                continue;
            }
        };

        match store.update_coordinates(p.id, &CoordinateUpdate::new(point, Utc::now())) {
            Ok(()) => report.updated += 1,
            Err(e) => warn!(id = p.id, "failed to update property: {}", e),
        }
    }

    info!(processed = report.processed, updated = report.updated, "geocoding batch done");
    report
}

/// Geocodes up to `batch_size` properties that have no coordinates yet.
/// Per-property failures are logged and skipped.
pub fn run_batch<S: Store, G: Geocoder>(store: &mut S, geocoder: &mut G, batch_size: usize) -> Result<BatchReport> {
    let pending = store.properties_missing_coordinates(None, batch_size)?;
    Ok(geocode_pending(store, geocoder, &pending))
}

/// Runs batches until every property has coordinates, pausing `interval` between
/// batches. Each property is tried once per run: failed rows stay pending and
/// the next batch starts after the highest id already tried.
pub fn run_until_done<S: Store, G: Geocoder>(
    store: &mut S,
    geocoder: &mut G,
    batch_size: usize,
    interval: Duration,
) -> Result<BatchReport> {
    let mut total = BatchReport::default();
    let remaining = store.count_missing_coordinates()?;
    info!(remaining, "properties without coordinates");
    if remaining == 0 {
        return Ok(total);
    }

    let mut after = None;
    loop {
        let pending = store.properties_missing_coordinates(after, batch_size)?;
        let Some(last) = pending.last() else {
            warn!(remaining = store.count_missing_coordinates()?, "every pending property tried, stopping");
            break;
        };
        after = Some(last.id);

        let batch = geocode_pending(store, geocoder, &pending);
        total.processed += batch.processed;
        total.updated += batch.updated;

        let remaining = store.count_missing_coordinates()?;
        info!(remaining, "properties remaining");
        if remaining == 0 {
            info!("all properties geocoded");
            break;
        }
        thread::sleep(interval);
    }
    Ok(total)
}
