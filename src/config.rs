use std::time::Duration;

use chrono::NaiveDate;
use clap::Args;

use crate::error::{Error, Result};
use crate::filter::PropertyFilter;
use crate::model::PropertyType;
use crate::rest::RestStore;
use crate::{
    DEFAULT_BATCH_INTERVAL_SECS, DEFAULT_BATCH_SIZE, DEFAULT_CITY, DEFAULT_COMMUNE_CODE, DEFAULT_DVF_BASE_URL,
    DEFAULT_GEOCODER_URL, DEFAULT_POSTAL_CODE, DEFAULT_REQUEST_DELAY_MS, USER_AGENT,
};

/// The municipality the tool is scoped to.
#[derive(Debug, Clone, Args)]
pub struct Locality {
    #[arg(long, default_value = DEFAULT_POSTAL_CODE)]
    pub postal_code: String,

    #[arg(long, default_value = DEFAULT_CITY)]
    pub city: String,

    /// INSEE commune code, used to pick the geo-dvf file.
    #[arg(long, default_value = DEFAULT_COMMUNE_CODE)]
    pub commune_code: String,
}

impl Default for Locality {
    fn default() -> Self {
        Self {
            postal_code: DEFAULT_POSTAL_CODE.to_owned(),
            city: DEFAULT_CITY.to_owned(),
            commune_code: DEFAULT_COMMUNE_CODE.to_owned(),
        }
    }
}

impl Locality {
    pub fn matches(&self, postal_code: &str, city: &str) -> bool {
        postal_code.trim() == self.postal_code && city.trim().eq_ignore_ascii_case(&self.city)
    }
}

#[derive(Debug, Clone, Args)]
pub struct StoreArgs {
    /// Base URL of the PostgREST/Supabase project.
    #[arg(long, env = "SUPABASE_URL")]
    pub store_url: Option<String>,

    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub store_key: Option<String>,

    /// Split inserts into requests of at most this many rows. Without it each
    /// table is written in one request, so a failure leaves nothing behind.
    #[arg(long)]
    pub insert_chunk: Option<usize>,
}

impl StoreArgs {
    pub fn connect(&self) -> Result<RestStore> {
        let url = self
            .store_url
            .as_deref()
            .ok_or_else(|| Error::Config("no store url (set --store-url or SUPABASE_URL)".into()))?;
        let key = self
            .store_key
            .as_deref()
            .ok_or_else(|| Error::Config("no store key (set --store-key or SUPABASE_SERVICE_ROLE_KEY)".into()))?;
        Ok(RestStore::new(url, key)?.with_insert_chunk(self.insert_chunk))
    }
}

#[derive(Debug, Clone, Args)]
pub struct GeocoderArgs {
    /// Nominatim-compatible search endpoint.
    #[arg(long, default_value = DEFAULT_GEOCODER_URL)]
    pub geocoder_url: String,

    #[arg(long, default_value = USER_AGENT)]
    pub user_agent: String,

    /// Minimum gap between two requests to the geocoder.
    #[arg(long, default_value_t = DEFAULT_REQUEST_DELAY_MS)]
    pub delay_ms: u64,

    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Pause between batches when running with --all.
    #[arg(long, default_value_t = DEFAULT_BATCH_INTERVAL_SECS)]
    pub interval_secs: u64,
}

impl GeocoderArgs {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Args)]
pub struct DvfArgs {
    #[arg(long, default_value = DEFAULT_DVF_BASE_URL)]
    pub dvf_base_url: String,
}

impl DvfArgs {
    pub fn commune_url(&self, commune_code: &str) -> String {
        format!("{}/{}.csv", self.dvf_base_url.trim_end_matches('/'), commune_code)
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    #[arg(long)]
    pub min_price: Option<f64>,
    #[arg(long)]
    pub max_price: Option<f64>,
    #[arg(long)]
    pub min_area: Option<f64>,
    #[arg(long)]
    pub max_area: Option<f64>,
    #[arg(long)]
    pub min_rooms: Option<u32>,
    #[arg(long)]
    pub max_rooms: Option<u32>,

    /// Property type, by code or label. Repeatable.
    #[arg(long = "type", value_parser = parse_property_type)]
    pub property_types: Vec<PropertyType>,

    /// Earliest transaction date (YYYY-MM-DD).
    #[arg(long)]
    pub start_date: Option<NaiveDate>,
    #[arg(long)]
    pub end_date: Option<NaiveDate>,
}

impl From<FilterArgs> for PropertyFilter {
    fn from(args: FilterArgs) -> Self {
        PropertyFilter {
            min_price: args.min_price,
            max_price: args.max_price,
            min_area: args.min_area,
            max_area: args.max_area,
            min_rooms: args.min_rooms,
            max_rooms: args.max_rooms,
            property_types: args.property_types,
            start_date: args.start_date,
            end_date: args.end_date,
        }
    }
}

fn parse_property_type(raw: &str) -> std::result::Result<PropertyType, String> {
    match PropertyType::parse(raw) {
        PropertyType::Unknown => Err(format!("unknown property type: {raw}")),
        t => Ok(t),
    }
}
