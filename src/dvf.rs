use std::{fs::File, io::Read, path::Path};

use csv::{ReaderBuilder, StringRecord};
use geo::Point;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::extract::RawMutation;
use crate::store::Store;

/// A row of the geo-dvf per-commune CSV, as published.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DvfRecord {
    pub id_mutation: String,
    pub date_mutation: String,
    pub nature_mutation: String,
    pub valeur_fonciere: String,
    pub adresse_numero: String,
    pub adresse_suffixe: String,
    pub adresse_nom_voie: String,
    pub code_postal: String,
    pub code_commune: String,
    pub nom_commune: String,
    pub code_departement: String,
    pub id_parcelle: String,
    pub type_local: String,
    pub surface_reelle_bati: String,
    pub nombre_pieces_principales: String,
    pub surface_terrain: String,
    pub longitude: String,
    pub latitude: String,
}

impl DvfRecord {
    pub fn location(&self) -> Option<Point<f64>> {
        match (parse_opt::<f64>(&self.longitude), parse_opt::<f64>(&self.latitude)) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    /// Feeds the row into the same normalization as the flat extract.
    pub fn to_raw(&self, line: usize) -> RawMutation {
        RawMutation {
            line,
            date: self.date_mutation.trim().to_owned(),
            price: self.valeur_fonciere.trim().to_owned(),
            street_number: format!("{}{}", self.adresse_numero.trim(), self.adresse_suffixe.trim()),
            street_type: String::new(),
            street_name: self.adresse_nom_voie.trim().to_owned(),
            postal_code: self.code_postal.trim().to_owned(),
            city: self.nom_commune.trim().to_owned(),
            type_local: self.type_local.trim().to_owned(),
            area: self.surface_reelle_bati.trim().to_owned(),
            rooms: self.nombre_pieces_principales.trim().to_owned(),
            location: self.location(),
        }
    }
}

/// Typed row of the `dvf_transactions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DvfTransaction {
    pub date_mutation: String,
    pub nature_mutation: String,
    pub valeur_fonciere: Option<f64>,
    pub adresse_numero: String,
    pub adresse_suffixe: String,
    pub adresse_nom_voie: String,
    pub code_postal: String,
    pub code_commune: String,
    pub nom_commune: String,
    pub code_departement: String,
    pub id_parcelle: String,
    pub type_local: String,
    pub surface_reelle_bati: Option<f64>,
    pub nombre_pieces_principales: Option<u32>,
    pub surface_terrain: Option<f64>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
}

impl From<&DvfRecord> for DvfTransaction {
    fn from(r: &DvfRecord) -> Self {
        Self {
            date_mutation: r.date_mutation.clone(),
            nature_mutation: r.nature_mutation.clone(),
            valeur_fonciere: parse_opt(&r.valeur_fonciere),
            adresse_numero: r.adresse_numero.clone(),
            adresse_suffixe: r.adresse_suffixe.clone(),
            adresse_nom_voie: r.adresse_nom_voie.clone(),
            code_postal: r.code_postal.clone(),
            code_commune: r.code_commune.clone(),
            nom_commune: r.nom_commune.clone(),
            code_departement: r.code_departement.clone(),
            id_parcelle: r.id_parcelle.clone(),
            type_local: r.type_local.clone(),
            surface_reelle_bati: parse_opt(&r.surface_reelle_bati),
            nombre_pieces_principales: parse_opt(&r.nombre_pieces_principales),
            surface_terrain: parse_opt(&r.surface_terrain),
            longitude: parse_opt(&r.longitude),
            latitude: parse_opt(&r.latitude),
        }
    }
}

fn parse_opt<T: std::str::FromStr>(raw: &str) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        None
    } else {
        raw.parse().ok()
    }
}

/// Parses a geo-dvf CSV. Rows that fail to deserialize are logged and skipped.
/// Each record comes back with its line number (header = 0).
pub fn parse_records<R: Read>(reader: R) -> Result<Vec<(usize, DvfRecord)>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).flexible(true).from_reader(reader);
    let headers = rdr.headers()?.clone();

    let mut records = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("skipping geo-dvf row: {}", e);
                continue;
            }
        }
        let line = record.position().map_or(records.len() + 1, |p| p.line() as usize - 1);
        match record.deserialize::<DvfRecord>(Some(&headers)) {
            Ok(r) => records.push((line, r)),
            Err(e) => warn!(line, "skipping geo-dvf row: {}", e),
        }
    }
    Ok(records)
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<(usize, DvfRecord)>> {
    info!(path = %path.as_ref().display(), "reading geo-dvf csv");
    parse_records(File::open(path.as_ref())?)
}

pub fn fetch(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<(usize, DvfRecord)>> {
    info!(url, "fetching geo-dvf data");
    let response = client.get(url).send()?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Fetch { url: url.to_owned(), status: status.as_u16() });
    }
    let body = response.text()?;
    parse_records(body.as_bytes())
}

/// Replaces the raw `dvf_transactions` table with the feed contents.
pub fn load<S: Store>(store: &mut S, records: &[(usize, DvfRecord)]) -> Result<usize> {
    let rows: Vec<DvfTransaction> = records.iter().map(|(_, r)| DvfTransaction::from(r)).collect();
    let count = store.replace_dvf_transactions(&rows)?;
    info!(count, "dvf transactions loaded");
    Ok(count)
}
