use std::{ops::Deref, sync::Arc};

use reqwest::{Client, ClientBuilder};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::MadoResult;

/// `reqwest` client sharing one cookie store between manifest fetches and segment probes.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpClient {
    pub fn new(builder: ClientBuilder) -> MadoResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: &Url) {
        let Ok(mut lock) = self.cookies_store.lock() else {
            tracing::warn!("Cookie store is poisoned, cookies are not added");
            return;
        };
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, url) {
                tracing::warn!(error = %e, "Failed to parse cookie");
            }
        }
    }
}

impl Deref for HttpClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}
