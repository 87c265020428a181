use chrono::{DateTime, NaiveDate, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

/// Property categories of the DVF "type local" column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PropertyType {
    House,
    Apartment,
    Outbuilding,
    Commercial,
    Unknown,
}

impl PropertyType {
    pub fn label(&self) -> &'static str {
        match self {
            PropertyType::House => "Maison",
            PropertyType::Apartment => "Appartement",
            PropertyType::Outbuilding => "Dépendance",
            PropertyType::Commercial => "Local industriel. commercial ou assimilé",
            PropertyType::Unknown => "Unknown type",
        }
    }

    /// Numeric code from the flat-file extract ("1".."4").
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "1" => PropertyType::House,
            "2" => PropertyType::Apartment,
            "3" => PropertyType::Outbuilding,
            "4" => PropertyType::Commercial,
            _ => PropertyType::Unknown,
        }
    }

    /// Accepts either a numeric code or a label as written by the geo-dvf feed.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match PropertyType::from_code(raw) {
            PropertyType::Unknown => PropertyType::from_label(raw),
            t => t,
        }
    }

    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        [
            PropertyType::House,
            PropertyType::Apartment,
            PropertyType::Outbuilding,
            PropertyType::Commercial,
        ]
        .into_iter()
        .find(|t| t.label().eq_ignore_ascii_case(label))
        .unwrap_or(PropertyType::Unknown)
    }

    /// Only dwellings end up on the map.
    pub fn is_dwelling(&self) -> bool {
        matches!(self, PropertyType::House | PropertyType::Apartment)
    }
}

impl From<String> for PropertyType {
    fn from(value: String) -> Self {
        PropertyType::from_label(&value)
    }
}

impl From<PropertyType> for String {
    fn from(value: PropertyType) -> Self {
        value.label().to_owned()
    }
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A property row as sent to the store, before it has an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProperty {
    pub external_id: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub property_type: PropertyType,
    pub rooms: Option<u32>,
    pub area: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A property row as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredProperty {
    pub id: i64,
    pub external_id: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub property_type: PropertyType,
    pub rooms: Option<u32>,
    pub area: f64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub price_history: Vec<PricePoint>,
}

impl StoredProperty {
    pub fn location(&self) -> Option<Point<f64>> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some(Point::new(lon, lat)),
            _ => None,
        }
    }

    /// Most recent transaction, by date.
    pub fn latest_price(&self) -> Option<&PricePoint> {
        self.price_history.iter().max_by_key(|p| p.transaction_date)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: f64,
    pub transaction_date: NaiveDate,
}

/// One row of the `price_history` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub property_id: i64,
    pub price: f64,
    pub transaction_date: NaiveDate,
}

/// The subset of a property the geocoder needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingLocation {
    pub id: i64,
    pub address: String,
    pub city: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoordinateUpdate {
    pub latitude: f64,
    pub longitude: f64,
    pub updated_at: DateTime<Utc>,
}

impl CoordinateUpdate {
    pub fn new(point: Point<f64>, updated_at: DateTime<Utc>) -> Self {
        Self { latitude: point.y(), longitude: point.x(), updated_at }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_labels_resolve_to_same_type() {
        assert_eq!(PropertyType::parse("2"), PropertyType::Apartment);
        assert_eq!(PropertyType::parse("Appartement"), PropertyType::Apartment);
        assert_eq!(PropertyType::parse(" maison "), PropertyType::House);
        assert_eq!(PropertyType::parse("7"), PropertyType::Unknown);
        assert_eq!(PropertyType::parse(""), PropertyType::Unknown);
    }

    #[test]
    fn property_type_serializes_as_label() {
        let json = serde_json::to_string(&PropertyType::Outbuilding).unwrap();
        assert_eq!(json, "\"Dépendance\"");
        let back: PropertyType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PropertyType::Outbuilding);
    }

    #[test]
    fn latest_price_picks_newest_date() {
        let p = StoredProperty {
            id: 1,
            external_id: "3".into(),
            address: "1 RUE X".into(),
            city: "IVRY-SUR-SEINE".into(),
            postal_code: "94200".into(),
            property_type: PropertyType::House,
            rooms: None,
            area: 80.0,
            latitude: None,
            longitude: None,
            price_history: vec![
                PricePoint { price: 300000.0, transaction_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap() },
                PricePoint { price: 200000.0, transaction_date: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap() },
            ],
        };
        assert_eq!(p.latest_price().unwrap().price, 300000.0);
        assert!(p.location().is_none());
    }
}
