use std::future::Future;

use chrono::{DateTime, Utc};
use reqwest::header::DATE;
use url::Url;

use crate::{HttpClient, MadoResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    /// Response time reported by the server, if it sent a readable `Date` header.
    pub server_time: Option<DateTime<Utc>>,
}

impl ProbeResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Checks whether a segment exists, without retrieving its payload.
pub trait Prober {
    fn probe(&self, url: &Url) -> impl Future<Output = MadoResult<ProbeResponse>> + Send;
}

/// Probes segments with HTTP `HEAD` requests.
#[derive(Clone)]
pub struct HttpProber {
    client: HttpClient,
}

impl HttpProber {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }
}

impl Prober for HttpProber {
    async fn probe(&self, url: &Url) -> MadoResult<ProbeResponse> {
        let response = self.client.head(url.clone()).send().await?;
        let server_time = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| match parse_http_date(value) {
                Ok(time) => Some(time),
                Err(e) => {
                    tracing::warn!(%url, date = value, error = %e, "Failed to parse Date header");
                    None
                }
            });

        Ok(ProbeResponse {
            status: response.status().as_u16(),
            server_time,
        })
    }
}

/// Parses an HTTP `Date` header, e.g. `Mon, 01 Jan 2024 00:00:00 GMT`.
pub fn parse_http_date(value: &str) -> MadoResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc2822(value)?.with_timezone(&Utc))
}
