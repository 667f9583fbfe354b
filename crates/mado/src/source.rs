use std::future::Future;

use url::Url;

use crate::{manifest::ManifestSnapshot, HttpClient, MadoError, MadoResult};

/// Yields a decoded snapshot of the manifest every time it is asked to.
pub trait ManifestSource {
    fn fetch(&self) -> impl Future<Output = MadoResult<ManifestSnapshot>> + Send;
}

/// Fetches and decodes an MPD over HTTP.
pub struct HttpManifestSource {
    client: HttpClient,
    mpd_url: Url,
}

impl HttpManifestSource {
    pub fn new(client: HttpClient, mpd_url: Url) -> Self {
        Self { client, mpd_url }
    }
}

impl ManifestSource for HttpManifestSource {
    async fn fetch(&self) -> MadoResult<ManifestSnapshot> {
        let response = self.client.get(self.mpd_url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(MadoError::HttpError(response.status()));
        }

        // relative BaseURLs resolve against the final location after redirects
        let mpd_url = response.url().clone();
        let text = response.text().await?;
        ManifestSnapshot::parse(&text, &mpd_url)
    }
}
