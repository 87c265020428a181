use crate::dvf::DvfTransaction;
use crate::error::{Error, Result};
use crate::model::{CoordinateUpdate, NewProperty, PendingLocation, PriceEntry, PricePoint, StoredProperty};

/// Data access the jobs need from the relational store.
pub trait Store {
    /// Fails when the store cannot be reached.
    fn ping(&self) -> Result<()>;

    /// Removes all price history, then all properties.
    fn clear_properties(&mut self) -> Result<()>;

    /// Inserts rows and returns them with their generated ids, in input order.
    fn insert_properties(&mut self, properties: &[NewProperty]) -> Result<Vec<StoredProperty>>;

    fn insert_price_history(&mut self, entries: &[PriceEntry]) -> Result<()>;

    /// All properties with their nested price history.
    fn list_properties(&self) -> Result<Vec<StoredProperty>>;

    /// Up to `limit` properties without coordinates, ordered by id, starting
    /// past `after` when given.
    fn properties_missing_coordinates(&self, after: Option<i64>, limit: usize) -> Result<Vec<PendingLocation>>;

    fn count_missing_coordinates(&self) -> Result<usize>;

    fn update_coordinates(&mut self, id: i64, update: &CoordinateUpdate) -> Result<()>;

    /// Replaces the whole raw feed table, returns the number of rows written.
    fn replace_dvf_transactions(&mut self, rows: &[DvfTransaction]) -> Result<usize>;
}

/// In-process tables. Backs dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    properties: Vec<StoredProperty>,
    price_history: Vec<PriceEntry>,
    dvf: Vec<DvfTransaction>,
    next_id: i64,
}

impl MemoryStore {
    pub fn price_history(&self) -> &[PriceEntry] {
        &self.price_history
    }

    pub fn dvf_transactions(&self) -> &[DvfTransaction] {
        &self.dvf
    }
}

impl Store for MemoryStore {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn clear_properties(&mut self) -> Result<()> {
        self.price_history.clear();
        self.properties.clear();
        Ok(())
    }

    fn insert_properties(&mut self, properties: &[NewProperty]) -> Result<Vec<StoredProperty>> {
        let mut stored = Vec::with_capacity(properties.len());
        for p in properties {
            self.next_id += 1;
            let row = StoredProperty {
                id: self.next_id,
                external_id: p.external_id.clone(),
                address: p.address.clone(),
                city: p.city.clone(),
                postal_code: p.postal_code.clone(),
                property_type: p.property_type,
                rooms: p.rooms,
                area: p.area,
                latitude: p.latitude,
                longitude: p.longitude,
                price_history: Vec::new(),
            };
            self.properties.push(row.clone());
            stored.push(row);
        }
        Ok(stored)
    }

    fn insert_price_history(&mut self, entries: &[PriceEntry]) -> Result<()> {
        if let Some(orphan) = entries.iter().find(|e| !self.properties.iter().any(|p| p.id == e.property_id)) {
            return Err(Error::Store {
                status: 409,
                body: format!("price_history references missing property {}", orphan.property_id),
            });
        }
        self.price_history.extend_from_slice(entries);
        Ok(())
    }

    fn list_properties(&self) -> Result<Vec<StoredProperty>> {
        Ok(self
            .properties
            .iter()
            .map(|p| {
                let mut p = p.clone();
                p.price_history = self
                    .price_history
                    .iter()
                    .filter(|e| e.property_id == p.id)
                    .map(|e| PricePoint { price: e.price, transaction_date: e.transaction_date })
                    .collect();
                p
            })
            .collect())
    }

    fn properties_missing_coordinates(&self, after: Option<i64>, limit: usize) -> Result<Vec<PendingLocation>> {
        Ok(self
            .properties
            .iter()
            .filter(|p| p.latitude.is_none() && after.map_or(true, |after| p.id > after))
            .take(limit)
            .map(|p| PendingLocation {
                id: p.id,
                address: p.address.clone(),
                city: p.city.clone(),
                postal_code: p.postal_code.clone(),
            })
            .collect())
    }

    fn count_missing_coordinates(&self) -> Result<usize> {
        Ok(self.properties.iter().filter(|p| p.latitude.is_none()).count())
    }

    fn update_coordinates(&mut self, id: i64, update: &CoordinateUpdate) -> Result<()> {
        match self.properties.iter_mut().find(|p| p.id == id) {
            Some(p) => {
                p.latitude = Some(update.latitude);
                p.longitude = Some(update.longitude);
                Ok(())
            }
            None => Err(Error::Store { status: 404, body: format!("no property {id}") }),
        }
    }

    fn replace_dvf_transactions(&mut self, rows: &[DvfTransaction]) -> Result<usize> {
        self.dvf = rows.to_vec();
        Ok(self.dvf.len())
    }
}
