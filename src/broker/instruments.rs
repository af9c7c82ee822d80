//! Dhan instrument master: trading symbol to numeric security id.
//!
//! Dhan addresses instruments by security id, so orders need a lookup table.
//! The table is downloaded once when the client is built and kept in memory.

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::FetchError;

pub const DHAN_SCRIP_MASTER_URL: &str = "https://images.dhan.co/api-data/api-scrip-master.csv";

/// The scrip master is tens of megabytes; this replaces the client's
/// per-call timeout for the download.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct ScripRow {
    #[serde(rename = "SEM_TRADING_SYMBOL")]
    symbol: Option<String>,
    #[serde(rename = "SEM_SMST_SECURITY_ID")]
    security_id: Option<String>,
    #[serde(rename = "SEM_EXM_EXCH_ID", default)]
    exchange: Option<String>,
}

/// Cached symbol to security id map.
#[derive(Debug, Clone, Default)]
pub struct InstrumentMaster {
    ids: HashMap<String, String>,
}

impl InstrumentMaster {
    /// Parse a scrip master CSV.
    ///
    /// When `exchange` is given, rows that name a different exchange are
    /// skipped; rows without an exchange column always count. The first row
    /// seen for a symbol wins.
    pub fn parse<R: Read>(reader: R, exchange: Option<&str>) -> Result<Self, csv::Error> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut ids = HashMap::new();
        for row in csv_reader.deserialize::<ScripRow>() {
            let row = row?;
            let (Some(symbol), Some(security_id)) = (row.symbol, row.security_id) else {
                continue;
            };
            if symbol.is_empty() || security_id.is_empty() {
                continue;
            }
            if let (Some(wanted), Some(actual)) = (exchange, row.exchange.as_deref()) {
                if !actual.eq_ignore_ascii_case(wanted) {
                    continue;
                }
            }
            ids.entry(symbol).or_insert(security_id);
        }

        Ok(Self { ids })
    }

    /// Download and parse the scrip master.
    pub async fn fetch(
        http: &reqwest::Client,
        url: &str,
        exchange: Option<&str>,
    ) -> Result<Self, FetchError> {
        info!(url = %url, "Downloading Dhan instrument master");

        let response = download_request(http, url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(FetchError::Rejected {
                status,
                message: "instrument master download failed".to_string(),
            });
        }
        let body = response.bytes().await?;

        let master = Self::parse(body.as_ref(), exchange)
            .map_err(|e| FetchError::Malformed(format!("instrument master: {e}")))?;

        if master.is_empty() {
            error!("Instrument map is empty after parsing the scrip master, check its format");
        } else {
            debug!(instruments = master.len(), "Instrument master parsed");
        }
        Ok(master)
    }

    pub fn security_id(&self, symbol: &str) -> Option<&str> {
        self.ids.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

fn download_request(http: &reqwest::Client, url: &str) -> reqwest::RequestBuilder {
    http.get(url).timeout(DOWNLOAD_TIMEOUT)
}

impl FromIterator<(String, String)> for InstrumentMaster {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "SEM_TRADING_SYMBOL,SEM_SMST_SECURITY_ID,SEM_CUSTOM_SYMBOL
RELIANCE,1234,RELIANCE-EQ
TCS,5678,TCS-EQ
";

    #[test]
    fn test_parse_scrip_master() {
        let master = InstrumentMaster::parse(SAMPLE.as_bytes(), None).unwrap();

        assert_eq!(master.len(), 2);
        assert_eq!(master.security_id("RELIANCE"), Some("1234"));
        assert_eq!(master.security_id("TCS"), Some("5678"));
        assert_eq!(master.security_id("INFY"), None);
    }

    #[test]
    fn test_parse_skips_incomplete_rows() {
        let csv = "SEM_TRADING_SYMBOL,SEM_SMST_SECURITY_ID
RELIANCE,
,999
INFY,1594
";
        let master = InstrumentMaster::parse(csv.as_bytes(), None).unwrap();

        assert_eq!(master.len(), 1);
        assert_eq!(master.security_id("INFY"), Some("1594"));
    }

    #[test]
    fn test_parse_filters_by_exchange() {
        let csv = "SEM_EXM_EXCH_ID,SEM_SMST_SECURITY_ID,SEM_TRADING_SYMBOL
BSE,500325,RELIANCE
NSE,2885,RELIANCE
NSE,11536,TCS
";
        let nse = InstrumentMaster::parse(csv.as_bytes(), Some("NSE")).unwrap();
        assert_eq!(nse.security_id("RELIANCE"), Some("2885"));
        assert_eq!(nse.len(), 2);

        // Without a filter the first row for a symbol wins
        let any = InstrumentMaster::parse(csv.as_bytes(), None).unwrap();
        assert_eq!(any.security_id("RELIANCE"), Some("500325"));
    }

    #[test]
    fn test_download_outlives_broker_call_timeout() {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap();
        let request = download_request(&http, DHAN_SCRIP_MASTER_URL).build().unwrap();

        assert_eq!(request.timeout(), Some(&DOWNLOAD_TIMEOUT));
        assert!(DOWNLOAD_TIMEOUT > Duration::from_secs(15));
    }
}
