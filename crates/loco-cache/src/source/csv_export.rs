//! Spreadsheet source backed by the CSV export endpoint of a published sheet

use crate::source::{SheetGrid, SheetSource, SourceError};
use async_trait::async_trait;
use csv::ReaderBuilder;
use std::time::Duration;
use tracing::debug;

/// Default export host
pub const DEFAULT_BASE_URL: &str = "https://docs.google.com";

/// Fetches sheets as CSV over HTTP.
///
/// Network errors, non-success statuses, timeouts and payloads that are not
/// CSV all surface as [`SourceError::Unavailable`].
#[derive(Clone)]
pub struct CsvExportSource {
    client: reqwest::Client,
    base_url: String,
}

impl CsvExportSource {
    /// Create a source talking to `base_url` with a per-request `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::unavailable("*", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Export URL of one sheet
    pub fn export_url(&self, sheet_id: &str, sheet_name: &str) -> String {
        format!(
            "{}/spreadsheets/d/{}/gviz/tq?tqx=out:csv&sheet={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(sheet_id),
            urlencoding::encode(sheet_name),
        )
    }
}

/// Parse a CSV body into a grid without interpreting the header row.
///
/// Rows may have differing lengths; the normalizer treats missing trailing
/// cells as blank.
pub fn parse_csv_grid(body: &str) -> Result<SheetGrid, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(body.as_bytes());

    reader
        .records()
        .map(|record| record.map(|r| r.iter().map(str::to_string).collect()))
        .collect()
}

#[async_trait]
impl SheetSource for CsvExportSource {
    async fn fetch_sheet(&self, sheet_id: &str, sheet_name: &str) -> Result<SheetGrid, SourceError> {
        let url = self.export_url(sheet_id, sheet_name);
        debug!(sheet = sheet_name, %url, "fetching sheet export");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SourceError::unavailable(sheet_name, e))?;

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::unavailable(sheet_name, e))?;

        let grid = parse_csv_grid(&body)
            .map_err(|e| SourceError::unavailable(sheet_name, format!("undecodable CSV payload: {e}")))?;

        debug!(sheet = sheet_name, rows = grid.len(), "sheet export fetched");
        Ok(grid)
    }

    fn name(&self) -> &'static str {
        "csv-export"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_export_url_encodes_sheet_name() {
        let source = CsvExportSource::new("https://sheets.example/", Duration::from_secs(5)).unwrap();

        assert_eq!(
            source.export_url("abc123", "Loco Schedules"),
            "https://sheets.example/spreadsheets/d/abc123/gviz/tq?tqx=out:csv&sheet=Loco%20Schedules"
        );
    }

    #[test]
    fn test_parse_csv_grid_keeps_header_and_ragged_rows() {
        let body = "\"Loco No.\",\"Sch \",\"Remarks\"\n\"27865\",\"IA\",\"ok, done\"\n\"27866\"\n";

        let grid = parse_csv_grid(body).unwrap();

        assert_eq!(
            grid,
            vec![
                vec!["Loco No.".to_string(), "Sch ".to_string(), "Remarks".to_string()],
                vec!["27865".to_string(), "IA".to_string(), "ok, done".to_string()],
                vec!["27866".to_string()],
            ]
        );
    }

    #[test]
    fn test_parse_csv_grid_empty_body() {
        assert!(parse_csv_grid("").unwrap().is_empty());
    }
}
