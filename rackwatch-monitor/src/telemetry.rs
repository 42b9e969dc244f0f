//! InfluxDB v2 telemetry sink (line protocol over the HTTP write API).

use async_trait::async_trait;
use rackwatch_core::{Sample, Sink, SinkError};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::time::Duration;

use crate::config::TelemetrySettings;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid telemetry url {url}: {reason}")]
    Url { url: String, reason: String },
    #[error("telemetry request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub struct InfluxSink {
    client: Client,
    write_url: Url,
    token: String,
    measurement: String,
}

impl InfluxSink {
    pub fn new(settings: &TelemetrySettings, token: String) -> Result<Self, TelemetryError> {
        let base = settings.url.trim_end_matches('/');
        let write_url = Url::parse_with_params(
            &format!("{base}/api/v2/write"),
            &[
                ("org", settings.org.as_str()),
                ("bucket", settings.bucket.as_str()),
                ("precision", "s"),
            ],
        )
        .map_err(|e| TelemetryError::Url { url: settings.url.clone(), reason: e.to_string() })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()?;

        Ok(Self { client, write_url, token, measurement: settings.measurement.clone() })
    }

    pub async fn publish(&self, sample: &Sample) -> Result<(), TelemetryError> {
        self.client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line_protocol(&self.measurement, sample))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Sink for InfluxSink {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn deliver(&self, sample: &Sample) -> Result<(), SinkError> {
        self.publish(sample).await.map_err(SinkError::delivery)
    }
}

/// One point: measurement, numeric fields when there is a reading, the
/// status as a string field, timestamp in seconds.
pub fn line_protocol(measurement: &str, sample: &Sample) -> String {
    let mut fields = Vec::with_capacity(3);
    if let Some(reading) = sample.reading {
        fields.push(format!("temperature={}", reading.temperature));
        fields.push(format!("humidity={}", reading.humidity));
    }
    fields.push(format!("status=\"{}\"", sample.status));

    format!(
        "{} {} {}",
        escape_measurement(measurement),
        fields.join(","),
        sample.captured_at.unix_timestamp()
    )
}

fn escape_measurement(name: &str) -> String {
    name.replace(',', "\\,").replace(' ', "\\ ")
}
