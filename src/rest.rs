use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::Method;
use serde::Serialize;
use tracing::debug;

use crate::dvf::DvfTransaction;
use crate::error::{Error, Result};
use crate::model::{CoordinateUpdate, NewProperty, PendingLocation, PriceEntry, StoredProperty};
use crate::store::Store;

const PROPERTIES: &str = "properties";
const PRICE_HISTORY: &str = "price_history";
const DVF_TRANSACTIONS: &str = "dvf_transactions";

/// Rows per page when listing.
const PAGE_SIZE: usize = 1000;

/// PostgREST tables behind a Supabase-style `/rest/v1` endpoint.
pub struct RestStore {
    client: Client,
    base_url: String,
    key: String,
    /// `None` writes each table in a single request.
    insert_chunk: Option<usize>,
}

impl RestStore {
    pub fn new(base_url: &str, key: &str) -> Result<Self> {
        Ok(Self::with_client(Client::builder().build()?, base_url, key))
    }

    pub fn with_client(client: Client, base_url: &str, key: &str) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_owned(), key: key.to_owned(), insert_chunk: None }
    }

    pub fn with_insert_chunk(mut self, rows: Option<usize>) -> Self {
        self.insert_chunk = rows;
        self
    }

    fn chunk_size(&self, rows: usize) -> usize {
        self.insert_chunk.unwrap_or(rows).max(1)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    fn insert_chunked<T: Serialize>(&self, table: &str, rows: &[T]) -> Result<()> {
        for chunk in rows.chunks(self.chunk_size(rows.len())) {
            let resp = self
                .request(Method::POST, table)
                .header("Prefer", "return=minimal")
                .json(chunk)
                .send()?;
            check(resp)?;
            debug!(table, rows = chunk.len(), "inserted chunk");
        }
        Ok(())
    }
}

fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        let body = resp.text().unwrap_or_default();
        Err(Error::Store { status: status.as_u16(), body })
    }
}

/// Total from a PostgREST `Content-Range` header: `0-24/312` or `*/0`.
pub fn parse_content_range(header: &str) -> Option<usize> {
    header.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}

fn total_rows(resp: &Response) -> Option<usize> {
    resp.headers().get("content-range").and_then(|v| v.to_str().ok()).and_then(parse_content_range)
}

impl Store for RestStore {
    fn ping(&self) -> Result<()> {
        let resp = self.request(Method::HEAD, PROPERTIES).query(&[("select", "count")]).send()?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Unreachable(self.base_url.clone()))
        }
    }

    fn clear_properties(&mut self) -> Result<()> {
        // price_history has a foreign key on properties.
        for table in [PRICE_HISTORY, PROPERTIES] {
            let resp = self.request(Method::DELETE, table).query(&[("id", "neq.0")]).send()?;
            check(resp)?;
        }
        Ok(())
    }

    fn insert_properties(&mut self, properties: &[NewProperty]) -> Result<Vec<StoredProperty>> {
        let mut stored = Vec::with_capacity(properties.len());
        for chunk in properties.chunks(self.chunk_size(properties.len())) {
            let resp = self
                .request(Method::POST, PROPERTIES)
                .header("Prefer", "return=representation")
                .json(chunk)
                .send()?;
            let rows: Vec<StoredProperty> = check(resp)?.json()?;
            if rows.len() != chunk.len() {
                return Err(Error::Invalid(format!("sent {} properties, store returned {}", chunk.len(), rows.len())));
            }
            stored.extend(rows);
        }
        Ok(stored)
    }

    fn insert_price_history(&mut self, entries: &[PriceEntry]) -> Result<()> {
        self.insert_chunked(PRICE_HISTORY, entries)
    }

    // The server may cap pages below PAGE_SIZE, so the exact count decides when to stop.
    fn list_properties(&self) -> Result<Vec<StoredProperty>> {
        let mut all = Vec::new();
        loop {
            let limit = PAGE_SIZE.to_string();
            let offset = all.len().to_string();
            let resp = self
                .request(Method::GET, PROPERTIES)
                .header("Prefer", "count=exact")
                .query(&[
                    ("select", "*,price_history(price,transaction_date)"),
                    ("order", "id"),
                    ("limit", limit.as_str()),
                    ("offset", offset.as_str()),
                ])
                .send()?;
            let resp = check(resp)?;
            let total = total_rows(&resp);
            let page: Vec<StoredProperty> = resp.json()?;
            let done = match total {
                Some(total) => page.is_empty() || all.len() + page.len() >= total,
                None => page.len() < PAGE_SIZE,
            };
            all.extend(page);
            if done {
                break;
            }
        }
        Ok(all)
    }

    fn properties_missing_coordinates(&self, after: Option<i64>, limit: usize) -> Result<Vec<PendingLocation>> {
        let limit = limit.to_string();
        let mut query = vec![
            ("select", "id,address,city,postal_code".to_owned()),
            ("latitude", "is.null".to_owned()),
            ("order", "id".to_owned()),
            ("limit", limit),
        ];
        if let Some(after) = after {
            query.push(("id", format!("gt.{after}")));
        }
        let resp = self.request(Method::GET, PROPERTIES).query(&query).send()?;
        Ok(check(resp)?.json()?)
    }

    fn count_missing_coordinates(&self) -> Result<usize> {
        let resp = self
            .request(Method::HEAD, PROPERTIES)
            .header("Prefer", "count=exact")
            .query(&[("select", "id"), ("latitude", "is.null")])
            .send()?;
        total_rows(&check(resp)?).ok_or_else(|| Error::Invalid("missing content-range on count".into()))
    }

    fn update_coordinates(&mut self, id: i64, update: &CoordinateUpdate) -> Result<()> {
        let resp = self
            .request(Method::PATCH, PROPERTIES)
            .header("Prefer", "return=minimal")
            .query(&[("id", format!("eq.{id}"))])
            .json(update)
            .send()?;
        check(resp)?;
        Ok(())
    }

    fn replace_dvf_transactions(&mut self, rows: &[DvfTransaction]) -> Result<usize> {
        let resp = self
            .request(Method::DELETE, DVF_TRANSACTIONS)
            .query(&[("id", "neq.00000000-0000-0000-0000-000000000000")])
            .send()?;
        check(resp)?;
        self.insert_chunked(DVF_TRANSACTIONS, rows)?;
        Ok(rows.len())
    }
}
