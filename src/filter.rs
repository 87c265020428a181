use chrono::{Datelike, NaiveDate};
use itertools::{Itertools, MinMaxResult};

use crate::model::{PricePoint, PropertyType, StoredProperty};

const DEFAULT_MAX_PRICE: f64 = 1_000_000.0;

/// Map filter. Every bound is optional and inclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyFilter {
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_area: Option<f64>,
    pub max_area: Option<f64>,
    pub min_rooms: Option<u32>,
    pub max_rooms: Option<u32>,
    pub property_types: Vec<PropertyType>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl PropertyFilter {
    fn bounds_sale(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some() || self.start_date.is_some() || self.end_date.is_some()
    }

    fn matches_unit(&self, p: &StoredProperty) -> bool {
        if !self.property_types.is_empty() && !self.property_types.contains(&p.property_type) {
            return false;
        }
        if self.min_rooms.is_some() || self.max_rooms.is_some() {
            let Some(rooms) = p.rooms else { return false };
            if self.min_rooms.is_some_and(|min| rooms < min) || self.max_rooms.is_some_and(|max| rooms > max) {
                return false;
            }
        }
        !(self.min_area.is_some_and(|min| p.area < min) || self.max_area.is_some_and(|max| p.area > max))
    }

    // Price and date bounds look at the latest sale only.
    fn matches_sale(&self, latest: &PricePoint) -> bool {
        !(self.min_price.is_some_and(|min| latest.price < min)
            || self.max_price.is_some_and(|max| latest.price > max)
            || self.start_date.is_some_and(|start| latest.transaction_date < start)
            || self.end_date.is_some_and(|end| latest.transaction_date > end))
    }

    pub fn matches(&self, p: &StoredProperty) -> bool {
        if !self.matches_unit(p) {
            return false;
        }
        if !self.bounds_sale() {
            return true;
        }
        p.latest_price().is_some_and(|latest| self.matches_sale(latest))
    }

    pub fn apply<'a>(&self, properties: &'a [StoredProperty]) -> Vec<&'a StoredProperty> {
        properties.iter().filter(|p| self.matches(p)).collect()
    }
}

/// Distinct type labels, sorted.
pub fn property_types(properties: &[StoredProperty]) -> Vec<String> {
    properties.iter().map(|p| p.property_type.label().to_owned()).sorted().dedup().collect()
}

/// Whole-euro price bounds over all sales.
pub fn price_range<'a, I: IntoIterator<Item = &'a PricePoint>>(points: I) -> (f64, f64) {
    match points.into_iter().map(|p| p.price).minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => (0.0, DEFAULT_MAX_PRICE),
        MinMaxResult::OneElement(x) => (x.floor(), x.ceil()),
        MinMaxResult::MinMax(min, max) => (min.floor(), max.ceil()),
    }
}

/// Earliest and latest sale dates. Without sales: Jan 1 of last year to `today`.
pub fn date_range<'a, I: IntoIterator<Item = &'a PricePoint>>(points: I, today: NaiveDate) -> (NaiveDate, NaiveDate) {
    match points.into_iter().map(|p| p.transaction_date).minmax() {
        MinMaxResult::NoElements => {
            let start = NaiveDate::from_ymd_opt(today.year() - 1, 1, 1).unwrap_or(today);
            (start, today)
        }
        MinMaxResult::OneElement(d) => (d, d),
        MinMaxResult::MinMax(start, end) => (start, end),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn property(id: i64, t: PropertyType, rooms: Option<u32>, area: f64, history: &[(f64, NaiveDate)]) -> StoredProperty {
        StoredProperty {
            id,
            external_id: id.to_string(),
            address: format!("{id} RUE A"),
            city: "IVRY-SUR-SEINE".into(),
            postal_code: "94200".into(),
            property_type: t,
            rooms,
            area,
            latitude: None,
            longitude: None,
            price_history: history
                .iter()
                .map(|&(price, transaction_date)| PricePoint { price, transaction_date })
                .collect(),
        }
    }

    fn sample() -> Vec<StoredProperty> {
        vec![
            property(1, PropertyType::Apartment, Some(2), 40.0, &[(200000.0, date(2024, 3, 1)), (150000.0, date(2018, 1, 1))]),
            property(2, PropertyType::House, Some(5), 120.0, &[(450000.0, date(2022, 6, 1))]),
            property(3, PropertyType::Apartment, None, 25.0, &[]),
        ]
    }

    fn ids(found: Vec<&StoredProperty>) -> Vec<i64> {
        found.iter().map(|p| p.id).collect()
    }

    #[test]
    fn empty_filter_keeps_everything() {
        assert_eq!(ids(PropertyFilter::default().apply(&sample())), vec![1, 2, 3]);
    }

    #[test]
    fn unit_bounds() {
        let props = sample();
        let f = PropertyFilter { property_types: vec![PropertyType::Apartment], ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![1, 3]);

        let f = PropertyFilter { min_rooms: Some(1), ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![1, 2]);

        let f = PropertyFilter { min_area: Some(30.0), max_area: Some(100.0), ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![1]);
    }

    #[test]
    fn price_bounds_use_latest_sale() {
        let props = sample();
        // Property 1 sold at 150k in 2018 but 200k most recently.
        let f = PropertyFilter { max_price: Some(160000.0), ..Default::default() };
        assert!(f.apply(&props).is_empty());

        let f = PropertyFilter { min_price: Some(190000.0), max_price: Some(210000.0), ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![1]);
    }

    #[test]
    fn date_bounds_drop_properties_without_history() {
        let props = sample();
        let f = PropertyFilter { start_date: Some(date(2020, 1, 1)), ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![1, 2]);

        let f = PropertyFilter { end_date: Some(date(2023, 1, 1)), ..Default::default() };
        assert_eq!(ids(f.apply(&props)), vec![2]);
    }

    #[test]
    fn distinct_types() {
        assert_eq!(property_types(&sample()), vec!["Appartement".to_owned(), "Maison".to_owned()]);
    }

    #[test]
    fn ranges_over_history() {
        let props = sample();
        let points: Vec<&PricePoint> = props.iter().flat_map(|p| &p.price_history).collect();
        assert_eq!(price_range(points.iter().copied()), (150000.0, 450000.0));
        assert_eq!(date_range(points.iter().copied(), date(2025, 1, 1)), (date(2018, 1, 1), date(2024, 3, 1)));
    }

    #[test]
    fn ranges_default_without_history() {
        let none: Vec<PricePoint> = Vec::new();
        assert_eq!(price_range(&none), (0.0, 1_000_000.0));
        assert_eq!(date_range(&none, date(2025, 6, 15)), (date(2024, 1, 1), date(2025, 6, 15)));

        let one = vec![PricePoint { price: 1234.5, transaction_date: date(2024, 1, 1) }];
        assert_eq!(price_range(&one), (1234.0, 1235.0));
    }
}
