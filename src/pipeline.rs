use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::Locality;
use crate::error::Result;
use crate::extract::RawMutation;
use crate::model::{NewProperty, PriceEntry, PropertyType, StoredProperty};
use crate::store::Store;

/// Natural key of a property unit: one address may hold many units.
#[derive(Debug, Clone)]
pub struct UnitKey {
    pub address: String,
    pub property_type: PropertyType,
    pub area: f64,
}

impl UnitKey {
    pub fn of_new(p: &NewProperty) -> Self {
        Self { address: p.address.clone(), property_type: p.property_type, area: p.area }
    }

    pub fn of_stored(p: &StoredProperty) -> Self {
        Self { address: p.address.clone(), property_type: p.property_type, area: p.area }
    }
}

impl PartialEq for UnitKey {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.property_type == other.property_type
            && self.area.to_bits() == other.area.to_bits()
    }
}

impl Eq for UnitKey {}

impl Hash for UnitKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.property_type.hash(state);
        self.area.to_bits().hash(state);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub key: UnitKey,
    pub price: f64,
    pub date: NaiveDate,
}

/// A normalized row: the unit it describes plus the sale.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub property: NewProperty,
    pub transaction: Transaction,
}

/// Leading decimal number of `raw`, ignoring anything after it. `None` when there is no digit.
fn leading_float(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let mut end = 0;
    let mut seen_dot = false;
    let mut seen_digit = false;
    for (i, c) in raw.char_indices() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            '-' | '+' if i == 0 => {}
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if !seen_digit {
        return None;
    }
    raw[..end].trim_end_matches('.').parse().ok()
}

fn leading_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let end = raw
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(raw.len(), |(i, _)| i);
    raw[..end].parse().ok()
}

/// Sale price with French decimal commas. Unparsable values read as 0.
pub fn parse_price(raw: &str) -> f64 {
    leading_float(&raw.replace(',', ".")).unwrap_or(0.0)
}

/// Built surface; only the first comma is a decimal separator.
pub fn parse_area(raw: &str) -> Option<f64> {
    if raw.trim().is_empty() {
        return None;
    }
    leading_float(&raw.replacen(',', ".", 1))
}

/// Main room count. Zero and garbage both mean "unknown".
pub fn parse_rooms(raw: &str) -> Option<u32> {
    leading_int(raw).filter(|&n| n > 0).and_then(|n| u32::try_from(n).ok())
}

/// `dd/mm/yyyy` from the flat file, `yyyy-mm-dd` from geo-dvf.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let (sep, day_first) = if raw.contains('/') { ('/', true) } else { ('-', false) };
    let parts: Vec<&str> = raw.split(sep).collect();
    if parts.len() != 3 {
        return None;
    }
    let (y, m, d) = if day_first { (parts[2], parts[1], parts[0]) } else { (parts[0], parts[1], parts[2]) };
    NaiveDate::from_ymd_opt(y.trim().parse().ok()?, m.trim().parse().ok()?, d.trim().parse().ok()?)
}

pub fn join_address(parts: &[&str]) -> String {
    parts.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect::<Vec<_>>().join(" ")
}

/// Turns one raw row into a candidate, or `None` when the row is not a priced dwelling.
pub fn normalize(raw: &RawMutation, locality: &Locality) -> Option<Candidate> {
    let Some(date) = parse_date(&raw.date) else {
        debug!(line = raw.line, date = %raw.date, "unparsable mutation date");
        return None;
    };

    let address = join_address(&[&raw.street_number, &raw.street_type, &raw.street_name]);
    let price = parse_price(&raw.price);
    let property_type = PropertyType::parse(&raw.type_local);
    let area = parse_area(&raw.area)?;

    if price <= 0.0 || address.is_empty() || area <= 0.0 || !property_type.is_dwelling() {
        return None;
    }

    let property = NewProperty {
        external_id: raw.line.to_string(),
        address,
        city: locality.city.clone(),
        postal_code: locality.postal_code.clone(),
        property_type,
        rooms: parse_rooms(&raw.rooms),
        area,
        latitude: raw.location.map(|p| p.y()),
        longitude: raw.location.map(|p| p.x()),
    };
    let transaction = Transaction { key: UnitKey::of_new(&property), price, date };
    Some(Candidate { property, transaction })
}

/// Unique property units in first-seen order, plus every transaction.
#[derive(Debug, Default)]
pub struct Catalog {
    properties: Vec<NewProperty>,
    index: HashMap<UnitKey, usize>,
    transactions: Vec<Transaction>,
}

impl Catalog {
    pub fn add(&mut self, candidate: Candidate) {
        let key = candidate.transaction.key.clone();
        if !self.index.contains_key(&key) {
            self.index.insert(key, self.properties.len());
            self.properties.push(candidate.property);
        }
        self.transactions.push(candidate.transaction);
    }

    pub fn build(rows: &[RawMutation], locality: &Locality) -> Self {
        let candidates: Vec<Candidate> = rows.par_iter().filter_map(|r| normalize(r, locality)).collect();
        let mut catalog = Catalog::default();
        for c in candidates {
            catalog.add(c);
        }
        catalog
    }

    pub fn properties(&self) -> &[NewProperty] {
        &self.properties
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }
}

/// Sums same-day sales of a unit into one history entry. Transactions whose unit
/// did not come back from the store are counted as dropped.
pub fn aggregate_price_history(transactions: &[Transaction], ids: &HashMap<UnitKey, i64>) -> (Vec<PriceEntry>, usize) {
    let mut entries: Vec<PriceEntry> = Vec::new();
    let mut slots: HashMap<(i64, NaiveDate), usize> = HashMap::new();
    let mut dropped = 0;

    for t in transactions {
        let Some(&property_id) = ids.get(&t.key) else {
            dropped += 1;
            continue;
        };
        if let Some(&slot) = slots.get(&(property_id, t.date)) {
            entries[slot].price += t.price;
        } else {
            slots.insert((property_id, t.date), entries.len());
            entries.push(PriceEntry { property_id, price: t.price, transaction_date: t.date });
        }
    }

    (entries, dropped)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ImportReport {
    pub matched: usize,
    pub properties: usize,
    pub transactions: usize,
    pub price_entries: usize,
    pub dropped: usize,
}

/// Replaces the store's properties and price history with the units found in `rows`.
pub fn run_import<S: Store>(store: &mut S, rows: &[RawMutation], locality: &Locality) -> Result<ImportReport> {
    store.ping()?;
    info!("clearing existing data");
    store.clear_properties()?;

    let catalog = Catalog::build(rows, locality);
    info!(
        matched = rows.len(),
        properties = catalog.properties().len(),
        transactions = catalog.transactions().len(),
        "rows normalized"
    );

    info!("inserting properties");
    let stored = store.insert_properties(catalog.properties())?;
    let ids: HashMap<UnitKey, i64> = stored.iter().map(|p| (UnitKey::of_stored(p), p.id)).collect();

    let (entries, dropped) = aggregate_price_history(catalog.transactions(), &ids);
    if dropped > 0 {
        warn!(dropped, "transactions without a stored property");
    }

    info!(entries = entries.len(), "inserting price history");
    store.insert_price_history(&entries)?;

    Ok(ImportReport {
        matched: rows.len(),
        properties: stored.len(),
        transactions: catalog.transactions().len(),
        price_entries: entries.len(),
        dropped,
    })
}
