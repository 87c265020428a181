use std::{fs::File, io::Read, path::Path};

use csv::{ReaderBuilder, StringRecord};
use geo::Point;
use tracing::{info, warn};

use crate::config::Locality;
use crate::error::Result;

// Column positions in the DVF "ValeursFoncieres" pipe-delimited extract.
pub const COL_DATE: usize = 8;
pub const COL_PRICE: usize = 10;
pub const COL_STREET_NUMBER: usize = 11;
pub const COL_STREET_TYPE: usize = 13;
pub const COL_STREET_NAME: usize = 15;
pub const COL_POSTAL_CODE: usize = 16;
pub const COL_CITY: usize = 17;
pub const COL_TYPE_CODE: usize = 35;
pub const COL_AREA: usize = 39;
pub const COL_ROOMS: usize = 40;

const PROGRESS_EVERY: usize = 100_000;

/// One source row, still as text. Both import formats land here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMutation {
    /// Line number in the source file, header is line 0.
    pub line: usize,
    pub date: String,
    pub price: String,
    pub street_number: String,
    pub street_type: String,
    pub street_name: String,
    pub postal_code: String,
    pub city: String,
    pub type_local: String,
    pub area: String,
    pub rooms: String,
    pub location: Option<Point<f64>>,
}

impl RawMutation {
    pub fn from_flat_record(line: usize, record: &StringRecord) -> Self {
        let field = |i: usize| record.get(i).unwrap_or("").trim().to_owned();
        Self {
            line,
            date: field(COL_DATE),
            price: field(COL_PRICE),
            street_number: field(COL_STREET_NUMBER),
            street_type: field(COL_STREET_TYPE),
            street_name: field(COL_STREET_NAME),
            postal_code: field(COL_POSTAL_CODE),
            city: field(COL_CITY),
            type_local: field(COL_TYPE_CODE),
            area: field(COL_AREA),
            rooms: field(COL_ROOMS),
            location: None,
        }
    }
}

/// Rows kept by a scan, with counts for the import report.
#[derive(Debug, Default)]
pub struct Scan {
    /// Physical lines read after the header, blank lines included.
    pub scanned: usize,
    pub rows: Vec<RawMutation>,
}

/// Fires once each time the line count passes a multiple of `every`.
#[derive(Debug)]
struct Progress {
    every: usize,
    next: usize,
}

impl Progress {
    fn new(every: usize) -> Self {
        Self { every, next: every }
    }

    fn advance(&mut self, line: usize) -> bool {
        if line < self.next {
            return false;
        }
        self.next = (line / self.every + 1) * self.every;
        true
    }
}

pub fn scan_flat_file<P: AsRef<Path>>(path: P, locality: &Locality) -> Result<Scan> {
    info!(path = %path.as_ref().display(), "reading flat file");
    let file = File::open(path.as_ref())?;
    scan_flat_reader(file, locality)
}

/// Reads the extract and keeps the rows of `locality`.
pub fn scan_flat_reader<R: Read>(reader: R, locality: &Locality) -> Result<Scan> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut scan = Scan::default();
    let mut progress = Progress::new(PROGRESS_EVERY);
    let mut record = StringRecord::new();
    loop {
        match rdr.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_io_error() => return Err(e.into()),
            Err(e) => {
                warn!("skipping unreadable row: {}", e);
                continue;
            }
        }
        // csv positions are 1-based and include the header line.
        let line = record.position().map_or(scan.scanned + 1, |p| p.line() as usize - 1);
        scan.scanned = line;

        let postal_code = record.get(COL_POSTAL_CODE).unwrap_or("");
        let city = record.get(COL_CITY).unwrap_or("");
        if locality.matches(postal_code, city) {
            scan.rows.push(RawMutation::from_flat_record(line, &record));
        }

        if progress.advance(line) {
            info!("scanned {} lines", line);
        }
    }

    info!(scanned = scan.scanned, matched = scan.rows.len(), city = %locality.city, "flat file scanned");
    Ok(scan)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Builds an extract line with the columns the importer reads.
    pub(crate) fn flat_line(date: &str, price: &str, number: &str, street_type: &str, street: &str, postal: &str, city: &str, code: &str, area: &str, rooms: &str) -> String {
        let mut cols = vec![String::new(); 43];
        cols[COL_DATE] = date.into();
        cols[COL_PRICE] = price.into();
        cols[COL_STREET_NUMBER] = number.into();
        cols[COL_STREET_TYPE] = street_type.into();
        cols[COL_STREET_NAME] = street.into();
        cols[COL_POSTAL_CODE] = postal.into();
        cols[COL_CITY] = city.into();
        cols[COL_TYPE_CODE] = code.into();
        cols[COL_AREA] = area.into();
        cols[COL_ROOMS] = rooms.into();
        cols.join("|")
    }

    pub(crate) fn header() -> String {
        (0..43).map(|i| format!("c{i}")).collect::<Vec<_>>().join("|")
    }

    #[test]
    fn keeps_only_target_locality() {
        let text = [
            header(),
            flat_line("03/01/2024", "250000,00", "12", "RUE", "DE LA PAIX", "94200", "IVRY-SUR-SEINE", "2", "45", "2"),
            flat_line("04/01/2024", "300000,00", "1", "AV", "FOCH", "75016", "PARIS 16", "2", "60", "3"),
            flat_line("05/01/2024", "180000,00", "3", "", "VOIE X", "94200", "IVRY-SUR-SEINE", "1", "70", "4"),
        ]
        .join("\n");

        let scan = scan_flat_reader(text.as_bytes(), &Locality::default()).unwrap();
        assert_eq!(scan.scanned, 3);
        assert_eq!(scan.rows.len(), 2);
        assert_eq!(scan.rows[0].line, 1);
        assert_eq!(scan.rows[0].street_name, "DE LA PAIX");
        assert_eq!(scan.rows[0].type_local, "2");
        assert_eq!(scan.rows[1].line, 3);
    }

    #[test]
    fn short_rows_read_as_empty_fields() {
        let text = format!("{}\n1|2|3\n", header());
        let scan = scan_flat_reader(text.as_bytes(), &Locality::default()).unwrap();
        assert_eq!(scan.scanned, 1);
        assert!(scan.rows.is_empty());
    }

    #[test]
    fn blank_lines_count_as_scanned() {
        let text = [
            header(),
            flat_line("03/01/2024", "1,00", "1", "", "RUE A", "94200", "IVRY-SUR-SEINE", "1", "10", "1"),
            String::new(),
            flat_line("04/01/2024", "2,00", "2", "", "RUE B", "94200", "IVRY-SUR-SEINE", "1", "10", "1"),
        ]
        .join("\n");

        let scan = scan_flat_reader(text.as_bytes(), &Locality::default()).unwrap();
        assert_eq!(scan.scanned, 3);
        assert_eq!(scan.rows.iter().map(|r| r.line).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn progress_fires_once_per_step() {
        let mut progress = Progress::new(3);
        let fired: Vec<usize> = [1, 2, 4, 5, 6, 7, 13].into_iter().filter(|&line| progress.advance(line)).collect();
        // 4 covers the skipped 3, 13 covers 9 and 12.
        assert_eq!(fired, vec![4, 6, 13]);
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}", header()).unwrap();
        writeln!(file, "{}", flat_line("03/01/2024", "1,00", "1", "", "RUE A", "94200", "IVRY-SUR-SEINE", "1", "10", "1")).unwrap();

        let scan = scan_flat_file(file.path(), &Locality::default()).unwrap();
        assert_eq!(scan.rows.len(), 1);
    }
}
