//! Collaborators around the item loop
//!
//! An `ItemSource` turns an assigned area into the targets to fetch, and a
//! `RecordSink` takes ownership of whatever was fetched. Extraction of listing
//! details happens behind the sink; the crawler only moves pages.

use crate::config::{AreaEntry, Config};
use crate::crawler::fetcher::{Content, Target};
use crate::HarvestError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashMap;
use url::Url;

/// Expands an area into the targets of its listing pages
pub trait ItemSource {
    fn items(&mut self, area: &str) -> Result<Vec<Target>, HarvestError>;
}

/// Default source: `path?page=1..=pages` for each configured `[[area]]`
#[derive(Debug, Clone)]
pub struct PagedAreaSource {
    base_url: Url,
    areas: HashMap<String, AreaEntry>,
}

impl PagedAreaSource {
    pub fn new(base_url: Url, areas: &[AreaEntry]) -> Self {
        Self {
            base_url,
            areas: areas
                .iter()
                .map(|a| (a.id.clone(), a.clone()))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&config.target.base_url)?;
        Ok(Self::new(base_url, &config.areas))
    }
}

impl ItemSource for PagedAreaSource {
    fn items(&mut self, area: &str) -> Result<Vec<Target>, HarvestError> {
        let entry = self.areas.get(area).ok_or_else(|| {
            HarvestError::FatalSession(format!("Area '{}' is not configured", area))
        })?;

        let page_url = self.base_url.join(&entry.path)?;
        Ok((1..=entry.pages)
            .map(|page| {
                let mut url = page_url.clone();
                url.query_pairs_mut().append_pair("page", &page.to_string());
                Target::new(area, url)
            })
            .collect())
    }
}

/// A fetched page with its provenance
#[derive(Debug, Clone, Serialize)]
pub struct FetchedRecord {
    pub session_id: String,
    pub date_key: String,
    pub slot_name: String,
    pub area: String,
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub body: String,
}

impl FetchedRecord {
    pub fn new(
        session_id: &str,
        date_key: NaiveDate,
        slot_name: &str,
        target: &Target,
        content: Content,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            date_key: crate::storage::date_to_key(date_key),
            slot_name: slot_name.to_string(),
            area: target.area.clone(),
            url: content.url,
            status: content.status,
            content_type: content.content_type,
            fetched_at: Utc::now(),
            latency_ms: content.latency.as_millis() as u64,
            body: content.body,
        }
    }
}

/// What the sink made of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Stored,
    /// The page was valid but had nothing to keep
    NoData,
}

/// Receives fetched records
pub trait RecordSink {
    fn accept(&mut self, record: FetchedRecord) -> Result<SinkOutcome, HarvestError>;

    /// Called once after the item loop ends, whatever the outcome
    fn finish(&mut self) -> Result<(), HarvestError> {
        Ok(())
    }
}

/// Keeps records in memory
///
/// Useful for embedding the scheduler and for tests. Empty bodies are
/// reported as `NoData` and not kept.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub records: Vec<FetchedRecord>,
    pub finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn accept(&mut self, record: FetchedRecord) -> Result<SinkOutcome, HarvestError> {
        if record.body.trim().is_empty() {
            return Ok(SinkOutcome::NoData);
        }
        self.records.push(record);
        Ok(SinkOutcome::Stored)
    }

    fn finish(&mut self) -> Result<(), HarvestError> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn areas() -> Vec<AreaEntry> {
        vec![
            AreaEntry {
                id: "shibuya".to_string(),
                path: "/area/shibuya/list".to_string(),
                pages: 3,
            },
            AreaEntry {
                id: "meguro".to_string(),
                path: "/area/meguro/list".to_string(),
                pages: 1,
            },
        ]
    }

    fn source() -> PagedAreaSource {
        PagedAreaSource::new(Url::parse("https://listings.example.com").unwrap(), &areas())
    }

    #[test]
    fn test_paged_source_expands_pages() {
        let mut source = source();
        let targets = source.items("shibuya").unwrap();

        let urls: Vec<String> = targets.iter().map(|t| t.url.to_string()).collect();
        assert_eq!(
            urls,
            vec![
                "https://listings.example.com/area/shibuya/list?page=1",
                "https://listings.example.com/area/shibuya/list?page=2",
                "https://listings.example.com/area/shibuya/list?page=3",
            ]
        );
        assert!(targets.iter().all(|t| t.area == "shibuya"));
    }

    #[test]
    fn test_paged_source_unknown_area() {
        let mut source = source();
        assert!(matches!(
            source.items("nakano"),
            Err(HarvestError::FatalSession(_))
        ));
    }

    #[test]
    fn test_memory_sink_reports_empty_pages_as_no_data() {
        let mut sink = MemorySink::new();
        let target = Target::new(
            "meguro",
            Url::parse("https://listings.example.com/area/meguro/list?page=1").unwrap(),
        );
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let content = |body: &str| Content {
            url: target.url.to_string(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.to_string(),
            latency: Duration::from_millis(800),
        };

        let stored = sink
            .accept(FetchedRecord::new("s", date, "morning-1", &target, content("<li>")))
            .unwrap();
        let empty = sink
            .accept(FetchedRecord::new("s", date, "morning-1", &target, content("  ")))
            .unwrap();

        assert_eq!(stored, SinkOutcome::Stored);
        assert_eq!(empty, SinkOutcome::NoData);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.records[0].date_key, "2025-01-15");
        assert_eq!(sink.records[0].latency_ms, 800);
    }
}
