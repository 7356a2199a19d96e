//! HTTP-polling `ReadingSource`: fetches a JSON snapshot from a configured
//! aggregator URL and maps it to an [`EnergyReading`] (section 6.1, 10.5).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use pb_shared_types::{EnergyReading, ReadingSource, ReadingSourceError, SourceStatus};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AggregatorSnapshot {
    generation_mw: f64,
    consumption_mw: f64,
    #[serde(default)]
    sources: Vec<AggregatorSourceStatus>,
}

#[derive(Debug, Deserialize)]
struct AggregatorSourceStatus {
    name: String,
    status: String,
    #[serde(default)]
    value_mw: Option<f64>,
}

/// Polls a single aggregator endpoint expected to return the JSON shape
/// above; the timestamp stamped onto the resulting reading is always this
/// process's wall-clock capture time, not anything the aggregator reports
/// (section 6.1: "the core's wall-clock capture time").
pub struct HttpReadingSource {
    client: reqwest::Client,
    url: String,
}

impl HttpReadingSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ReadingSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| ReadingSourceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReadingSource for HttpReadingSource {
    async fn fetch(&self) -> Result<EnergyReading, ReadingSourceError> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                ReadingSourceError::Timeout(Duration::from_secs(0))
            } else {
                ReadingSourceError::Transport(e.to_string())
            }
        })?;

        if !resp.status().is_success() {
            return Err(ReadingSourceError::Transport(format!(
                "aggregator responded with status {}",
                resp.status()
            )));
        }

        let snapshot: AggregatorSnapshot = resp
            .json()
            .await
            .map_err(|e| ReadingSourceError::MalformedResponse(e.to_string()))?;

        let sources = snapshot
            .sources
            .into_iter()
            .map(|s| SourceStatus {
                name: s.name,
                status: s.status,
                value_mw: s.value_mw,
            })
            .collect();

        Ok(EnergyReading::new(
            Utc::now(),
            snapshot.generation_mw,
            snapshot.consumption_mw,
            sources,
        ))
    }
}
