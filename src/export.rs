use std::path::Path;

use geojson::{Feature, FeatureCollection, GeoJson, Geometry};
use tracing::info;

use crate::error::Result;
use crate::model::StoredProperty;

/// Map marker for a property. `None` until the property is geocoded.
pub fn to_feature(p: &StoredProperty) -> Result<Option<Feature>> {
    let Some(point) = p.location() else {
        return Ok(None);
    };

    let mut feature = Feature {
        bbox: None,
        geometry: Some(Geometry::new(geojson::Value::from(&point))),
        id: Some(geojson::feature::Id::Number(p.id.into())),
        properties: None,
        foreign_members: None,
    };
    feature.set_property("id", p.id);
    feature.set_property("external_id", p.external_id.clone());
    feature.set_property("address", p.address.clone());
    feature.set_property("city", p.city.clone());
    feature.set_property("postal_code", p.postal_code.clone());
    feature.set_property("property_type", p.property_type.label());
    feature.set_property("rooms", p.rooms);
    feature.set_property("area", p.area);
    if let Some(latest) = p.latest_price() {
        feature.set_property("price", latest.price);
        feature.set_property("transaction_date", latest.transaction_date.to_string());
    }

    let mut history = p.price_history.clone();
    history.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
    feature.set_property("price_history", serde_json::to_value(&history)?);

    Ok(Some(feature))
}

pub fn to_collection<'a, I: IntoIterator<Item = &'a StoredProperty>>(properties: I) -> Result<FeatureCollection> {
    let mut features = Vec::new();
    for p in properties {
        if let Some(f) = to_feature(p)? {
            features.push(f);
        }
    }
    Ok(features.into_iter().collect())
}

pub fn write_collection<P: AsRef<Path>>(path: P, collection: FeatureCollection) -> Result<usize> {
    let count = collection.features.len();
    let out = GeoJson::from(collection);
    std::fs::write(path.as_ref(), out.to_string())?;
    info!(path = %path.as_ref().display(), features = count, "map feed written");
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PricePoint, PropertyType};
    use chrono::NaiveDate;

    fn property(id: i64, located: bool) -> StoredProperty {
        StoredProperty {
            id,
            external_id: "9".into(),
            address: "12 RUE DE LA PAIX".into(),
            city: "IVRY-SUR-SEINE".into(),
            postal_code: "94200".into(),
            property_type: PropertyType::Apartment,
            rooms: Some(2),
            area: 45.0,
            latitude: located.then_some(48.81),
            longitude: located.then_some(2.38),
            price_history: vec![
                PricePoint { price: 150000.0, transaction_date: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() },
                PricePoint { price: 250000.0, transaction_date: NaiveDate::from_ymd_opt(2024, 1, 3).unwrap() },
            ],
        }
    }

    #[test]
    fn feature_carries_latest_sale() {
        let f = to_feature(&property(1, true)).unwrap().unwrap();
        assert_eq!(f.property("price").and_then(|v| v.as_f64()), Some(250000.0));
        assert_eq!(f.property("transaction_date").and_then(|v| v.as_str()), Some("2024-01-03"));
        assert_eq!(f.property("property_type").and_then(|v| v.as_str()), Some("Appartement"));
        let history = f.property("price_history").and_then(|v| v.as_array()).unwrap();
        assert_eq!(history[0]["transaction_date"], "2024-01-03");

        match f.geometry.unwrap().value {
            geojson::Value::Point(c) => assert_eq!(c, vec![2.38, 48.81]),
            other => panic!("unexpected geometry {other:?}"),
        }
    }

    #[test]
    fn unlocated_properties_are_left_out() {
        let props = vec![property(1, true), property(2, false)];
        let fc = to_collection(&props).unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[test]
    fn writes_collection_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.geojson");
        let props = vec![property(1, true)];
        let n = write_collection(&path, to_collection(&props).unwrap()).unwrap();
        assert_eq!(n, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let back: FeatureCollection = text.parse().unwrap();
        assert_eq!(back.features.len(), 1);
    }
}
